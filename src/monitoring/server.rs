//! Monitoring collector: counts delivery reports received over UDP

use crate::config::MonitoringConfig;
use crate::Result;

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Reply to a well-formed report
pub const SUCCESS: &str = "success";

/// Reply to anything else
pub const FORMAT_ERROR: &str =
    "error provided message does not fit the expected format: <host>:<port> <email-address>";

const MAX_DATAGRAM: usize = 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// One `<host>:<port> <email-address>` report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// `host:port` of the reporting transfer server
    pub server: String,
    pub address: String,
}

/// Parse a datagram payload. Trailing NULs and line endings are ignored;
/// anything other than exactly one line of two space-separated fields,
/// the first of them `host:port`, is rejected.
pub fn parse_report(payload: &str) -> Option<DeliveryReport> {
    let line = payload.trim_end_matches(['\0', '\r', '\n']);
    if line.contains('\n') {
        return None;
    }

    let (server, address) = match line.split(char::is_whitespace).collect::<Vec<_>>()[..] {
        [server, address] if !address.is_empty() => (server, address),
        _ => return None,
    };

    match server.split(':').collect::<Vec<_>>()[..] {
        [host, port] if !host.is_empty() && !port.is_empty() => Some(DeliveryReport {
            server: server.to_owned(),
            address: address.to_owned(),
        }),
        _ => None,
    }
}

/// Report counters per server and per sender address
#[derive(Debug, Default, Clone)]
pub struct Statistics {
    servers: HashMap<String, u64>,
    addresses: HashMap<String, u64>,
}

impl Statistics {
    pub fn record(&mut self, report: &DeliveryReport) {
        *self.servers.entry(report.server.clone()).or_default() += 1;
        *self.addresses.entry(report.address.clone()).or_default() += 1;
    }

    /// `(host:port, count)` sorted by server
    pub fn servers(&self) -> Vec<(String, u64)> {
        sorted(&self.servers)
    }

    /// `(address, count)` sorted by address
    pub fn addresses(&self) -> Vec<(String, u64)> {
        sorted(&self.addresses)
    }
}

fn sorted(counts: &HashMap<String, u64>) -> Vec<(String, u64)> {
    let mut entries: Vec<_> = counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
    entries.sort();
    entries
}

/// UDP monitoring collector
#[derive(Debug, Clone)]
pub struct MonitoringServer {
    config: MonitoringConfig,
}

impl MonitoringServer {
    pub fn new(config: MonitoringConfig) -> Self {
        Self { config }
    }

    /// Bind the configured UDP port and start collecting
    pub fn start(&self) -> Result<MonitoringHandle> {
        let socket = UdpSocket::bind((self.config.host.as_str(), self.config.udp_port))?;
        Self::start_with_socket(socket)
    }

    /// Collect on a socket that is already bound
    pub fn start_with_socket(socket: UdpSocket) -> Result<MonitoringHandle> {
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        let local_addr = socket.local_addr()?;
        let statistics = Arc::new(Mutex::new(Statistics::default()));
        let stopping = Arc::new(AtomicBool::new(false));

        let thread = {
            let statistics = Arc::clone(&statistics);
            let stopping = Arc::clone(&stopping);
            thread::Builder::new()
                .name("monitoring".to_string())
                .spawn(move || collect(&socket, &statistics, &stopping))?
        };

        info!(addr = %local_addr, "monitoring server started");
        Ok(MonitoringHandle {
            local_addr,
            statistics,
            stopping,
            thread: Some(thread),
        })
    }
}

fn collect(socket: &UdpSocket, statistics: &Mutex<Statistics>, stopping: &AtomicBool) {
    let mut buf = [0u8; MAX_DATAGRAM];

    while !stopping.load(Ordering::SeqCst) {
        let (len, peer) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                continue;
            }
            Err(e) => {
                error!(error = %e, "monitoring socket failed");
                break;
            }
        };

        let payload = String::from_utf8_lossy(&buf[..len]);
        let reply = match parse_report(&payload) {
            Some(report) => {
                debug!(%peer, server = %report.server, address = %report.address, "report received");
                statistics
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record(&report);
                SUCCESS
            }
            None => {
                warn!(%peer, payload = %payload, "malformed report");
                FORMAT_ERROR
            }
        };

        if let Err(e) = socket.send_to(reply.as_bytes(), peer) {
            warn!(%peer, error = %e, "monitoring reply failed");
        }
    }

    debug!("monitoring loop finished");
}

/// A running monitoring collector
#[derive(Debug)]
pub struct MonitoringHandle {
    local_addr: SocketAddr,
    statistics: Arc<Mutex<Statistics>>,
    stopping: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MonitoringHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn snapshot(&self) -> Statistics {
        self.statistics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn servers(&self) -> Vec<(String, u64)> {
        self.snapshot().servers()
    }

    pub fn addresses(&self) -> Vec<(String, u64)> {
        self.snapshot().addresses()
    }

    /// Ask the receive loop to stop; it notices within one poll interval
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    /// Stop and wait for the receive loop to exit
    pub fn shutdown(mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("monitoring thread panicked");
            }
        }
        info!("monitoring server stopped");
    }
}
