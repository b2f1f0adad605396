//! Transfer server: accepts submissions and feeds the relay queue

use crate::acceptor::Acceptor;
use crate::config::{DomainTable, TransferConfig};
use crate::dmtp::{self, DmtpError, MailSink};
use crate::email::{Address, Email};
use crate::monitoring::MonitoringReporter;
use crate::transfer::relay::{DmtpOutbound, Outbound, Relay, RelayJob};
use crate::Result;

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

/// Puts completed submissions on the relay queue, blocking while it is full
#[derive(Debug, Clone)]
pub struct QueueSink {
    queue: SyncSender<RelayJob>,
}

impl QueueSink {
    pub fn new(queue: SyncSender<RelayJob>) -> Self {
        Self { queue }
    }
}

impl MailSink for QueueSink {
    fn accept_recipients(&self, recipients: &[Address]) -> std::result::Result<usize, DmtpError> {
        Ok(recipients.len())
    }

    fn deliver(&self, email: Email) -> std::result::Result<(), DmtpError> {
        self.queue
            .send(RelayJob::Deliver(email))
            .map_err(|_| DmtpError::Unavailable)
    }
}

/// Transfer server: acceptor, producer pool, bounded queue and consumers
#[derive(Debug, Clone)]
pub struct TransferServer {
    config: TransferConfig,
    domains: DomainTable,
}

impl TransferServer {
    pub fn new(config: TransferConfig, domains: DomainTable) -> Self {
        Self { config, domains }
    }

    /// Bind the configured port and start serving
    pub fn start(&self) -> Result<TransferHandle> {
        let listener = TcpListener::bind(self.config.bind_address())?;
        self.start_with_listener(listener)
    }

    /// Start serving on a listener that is already bound
    pub fn start_with_listener(&self, listener: TcpListener) -> Result<TransferHandle> {
        let outbound = Arc::new(DmtpOutbound::new(
            self.config.connect_timeout(),
            self.config.read_timeout(),
        ));
        self.start_with_outbound(listener, outbound)
    }

    /// Start serving with a custom delivery backend
    pub fn start_with_outbound(
        &self,
        listener: TcpListener,
        outbound: Arc<dyn Outbound>,
    ) -> Result<TransferHandle> {
        let local_addr = listener.local_addr()?;
        let mut relay = Relay::new(self.domains.clone(), outbound, mailer_ip(local_addr));
        if let Some(target) = &self.config.monitoring {
            relay = relay.with_reporter(MonitoringReporter::new(target)?);
        }
        let relay = Arc::new(relay);

        let (queue, jobs) = mpsc::sync_channel(self.config.queue_capacity);
        let jobs = Arc::new(Mutex::new(jobs));

        let consumer_count = self.config.consumer_workers.max(1);
        let mut consumers = Vec::with_capacity(consumer_count);
        for n in 0..consumer_count {
            let relay = Arc::clone(&relay);
            let jobs = Arc::clone(&jobs);
            let consumer = thread::Builder::new()
                .name(format!("relay-{n}"))
                .spawn(move || relay.run(&jobs))?;
            consumers.push(consumer);
        }

        let acceptor = Acceptor::new("transfer", listener)?;
        let sink = QueueSink::new(queue.clone());
        let accept_thread = acceptor.spawn(
            self.config.producer_workers,
            move |stream| {
                if let Err(e) = dmtp::server::handle_client(stream, &sink) {
                    warn!(error = %e, "dmtp session ended with error");
                }
            },
            move |result| {
                if let Err(e) = result {
                    error!(error = %e, "listener failed, shutting down transfer server");
                }
                // producers have drained, so these land behind every queued email
                for _ in 0..consumer_count {
                    if queue.send(RelayJob::Shutdown).is_err() {
                        break;
                    }
                }
            },
        )?;

        info!(addr = %local_addr, consumers = consumer_count, "transfer server started");
        Ok(TransferHandle {
            acceptor,
            accept_thread: Some(accept_thread),
            consumers,
        })
    }
}

/// Bounces are signed with the listener's address, loopback if unbound
fn mailer_ip(local_addr: SocketAddr) -> IpAddr {
    match local_addr.ip() {
        ip if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        ip => ip,
    }
}

/// A running transfer server
#[derive(Debug)]
pub struct TransferHandle {
    acceptor: Arc<Acceptor>,
    accept_thread: Option<JoinHandle<()>>,
    consumers: Vec<JoinHandle<()>>,
}

impl TransferHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    /// Stop accepting; sessions drain and consumers exit on their own
    pub fn stop(&self) {
        self.acceptor.stop();
    }

    /// Stop and wait until every queued email has been relayed
    pub fn shutdown(self) {
        self.stop();
        self.wait();
        info!("transfer server stopped");
    }

    /// Block until the server has stopped on its own
    pub fn wait(mut self) {
        if let Some(thread) = self.accept_thread.take() {
            if thread.join().is_err() {
                error!("transfer accept thread panicked");
            }
        }
        for consumer in self.consumers.drain(..) {
            if consumer.join().is_err() {
                error!("relay consumer panicked");
            }
        }
    }
}
