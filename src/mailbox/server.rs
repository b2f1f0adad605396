//! Mailbox server: DMTP ingestion into the store, DMAP access to it

use crate::acceptor::Acceptor;
use crate::config::{MailboxConfig, UserTable};
use crate::dmap;
use crate::dmtp::{self, DmtpError, MailSink};
use crate::email::{Address, Email};
use crate::mailbox::store::MailboxStore;
use crate::Result;

use std::collections::BTreeSet;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info, warn};

/// Receives relayed mail for one domain and deposits it per local user
#[derive(Debug)]
pub struct MailboxSink {
    domain: String,
    users: Arc<UserTable>,
    store: Arc<MailboxStore>,
}

impl MailboxSink {
    pub fn new(domain: &str, users: Arc<UserTable>, store: Arc<MailboxStore>) -> Self {
        Self {
            domain: domain.to_owned(),
            users,
            store,
        }
    }

    fn local_users<'e>(&self, recipients: &'e [Address]) -> BTreeSet<&'e str> {
        recipients
            .iter()
            .filter(|r| r.is_in_domain(&self.domain) && self.users.contains(r.local()))
            .map(Address::local)
            .collect()
    }
}

impl MailSink for MailboxSink {
    fn accept_recipients(&self, recipients: &[Address]) -> std::result::Result<usize, DmtpError> {
        let mut count = 0;
        for recipient in recipients.iter().filter(|r| r.is_in_domain(&self.domain)) {
            if !self.users.contains(recipient.local()) {
                return Err(DmtpError::UnknownRecipient(recipient.local().to_owned()));
            }
            count += 1;
        }

        if count == 0 {
            return Err(DmtpError::NoKnownDomain);
        }
        Ok(count)
    }

    fn deliver(&self, email: Email) -> std::result::Result<(), DmtpError> {
        for user in self.local_users(&email.recipients) {
            let id = self.store.deposit(user, email.clone());
            info!(user, id, sender = %email.sender, "mail stored");
        }
        Ok(())
    }
}

/// Mailbox server for one domain
#[derive(Debug, Clone)]
pub struct MailboxServer {
    config: MailboxConfig,
}

impl MailboxServer {
    pub fn new(config: MailboxConfig) -> Self {
        Self { config }
    }

    /// Bind both listeners from the configuration and start serving
    pub fn start(&self) -> Result<MailboxHandle> {
        let dmtp = TcpListener::bind((self.config.host.as_str(), self.config.dmtp_port))?;
        let dmap = TcpListener::bind((self.config.host.as_str(), self.config.dmap_port))?;
        self.start_with_listeners(dmtp, dmap)
    }

    /// Start serving on listeners that are already bound
    pub fn start_with_listeners(&self, dmtp: TcpListener, dmap: TcpListener) -> Result<MailboxHandle> {
        let store = Arc::new(MailboxStore::new());
        let users = Arc::new(self.config.users.clone());
        let sink = Arc::new(MailboxSink::new(
            &self.config.domain,
            Arc::clone(&users),
            Arc::clone(&store),
        ));

        let dmtp = Acceptor::new("mailbox-dmtp", dmtp)?;
        let dmap = Acceptor::new("mailbox-dmap", dmap)?;

        let ingest = {
            let peer = Arc::clone(&dmap);
            dmtp.spawn(
                self.config.workers,
                move |stream| {
                    if let Err(e) = dmtp::server::handle_client(stream, sink.as_ref()) {
                        warn!(error = %e, "dmtp session ended with error");
                    }
                },
                move |result| stop_on_failure(result, &peer),
            )?
        };

        let access = {
            let peer = Arc::clone(&dmtp);
            let store = Arc::clone(&store);
            let spawned = dmap.spawn(
                self.config.workers,
                move |stream| {
                    if let Err(e) = dmap::server::handle_client(stream, &users, &store) {
                        warn!(error = %e, "dmap session ended with error");
                    }
                },
                move |result| stop_on_failure(result, &peer),
            );
            match spawned {
                Ok(thread) => thread,
                Err(e) => {
                    abandon(&dmtp, ingest);
                    return Err(e.into());
                }
            }
        };

        info!(
            domain = %self.config.domain,
            dmtp = %dmtp.local_addr(),
            dmap = %dmap.local_addr(),
            "mailbox server started"
        );

        Ok(MailboxHandle {
            domain: self.config.domain.clone(),
            store,
            dmtp,
            dmap,
            threads: vec![ingest, access],
        })
    }
}

/// A listener that dies takes the whole mailbox server down with it
fn stop_on_failure(result: std::io::Result<()>, peer: &Acceptor) {
    if let Err(e) = result {
        error!(error = %e, "listener failed, shutting down mailbox server");
        peer.stop();
    }
}

/// Stop a listener that is already serving and wait for it
fn abandon(acceptor: &Acceptor, thread: JoinHandle<()>) {
    acceptor.stop();
    if thread.join().is_err() {
        error!("mailbox listener thread panicked");
    }
}

/// A running mailbox server
#[derive(Debug)]
pub struct MailboxHandle {
    domain: String,
    store: Arc<MailboxStore>,
    dmtp: Arc<Acceptor>,
    dmap: Arc<Acceptor>,
    threads: Vec<JoinHandle<()>>,
}

impl MailboxHandle {
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Address accepting relayed mail
    pub fn dmtp_addr(&self) -> SocketAddr {
        self.dmtp.local_addr()
    }

    /// Address serving mailbox access
    pub fn dmap_addr(&self) -> SocketAddr {
        self.dmap.local_addr()
    }

    pub fn store(&self) -> &Arc<MailboxStore> {
        &self.store
    }

    /// Ask both listeners to stop without waiting for them
    pub fn stop(&self) {
        self.dmtp.stop();
        self.dmap.stop();
    }

    /// Stop and wait until every session has finished
    pub fn shutdown(mut self) {
        self.stop();
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                error!("mailbox listener thread panicked");
            }
        }
        info!(domain = %self.domain, "mailbox server stopped");
    }
}
