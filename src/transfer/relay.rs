//! Relay consumers: route queued mail by recipient domain and bounce failures

use crate::config::{Authority, DomainTable};
use crate::dmtp::{DmtpClient, DmtpError};
use crate::email::{Address, Email};
use crate::monitoring::MonitoringReporter;

use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Subject of the bounce sent when one destination rejects or fails
pub const TRANSFER_FAILED: &str = "There was an error transferring this email";

/// Subject prefix of the bounce sent when no recipient domain is known
pub const UNKNOWN_DOMAINS: &str = "Email couldn't be sent to these unknown domains:";

/// Local part of the bounce sender
pub const MAILER: &str = "mailer";

/// An entry on the relay queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayJob {
    Deliver(Email),
    /// Ends exactly one consumer
    Shutdown,
}

/// Hands one email to one destination server
pub trait Outbound: Send + Sync {
    /// Deliver `email` to `authority` and return the local address of the
    /// connection that carried it
    fn send(&self, authority: &Authority, email: &Email) -> Result<SocketAddr, DmtpError>;
}

/// Delivers over a fresh DMTP client session per call
#[derive(Debug, Clone)]
pub struct DmtpOutbound {
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl DmtpOutbound {
    pub fn new(connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            io_timeout,
        }
    }
}

impl Outbound for DmtpOutbound {
    fn send(&self, authority: &Authority, email: &Email) -> Result<SocketAddr, DmtpError> {
        let mut client =
            DmtpClient::connect(&authority.to_string(), self.connect_timeout, self.io_timeout)?;
        let local = client.local_addr()?;

        client.transfer(email)?;
        // the mail is stored once `send` is acknowledged
        if let Err(e) = client.quit() {
            debug!(%authority, error = %e, "quit failed after delivery");
        }
        Ok(local)
    }
}

/// What happened to one queued email
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The sender's domain is unknown, so there is nobody to bounce to
    Dropped,
    /// No recipient domain resolved; one bounce was attempted
    Unroutable { domains: Vec<String> },
    /// Sessions that succeeded and bounces attempted for the ones that failed
    Delivered { delivered: usize, bounced: usize },
}

/// Routes emails to destination authorities. Shared by every consumer.
pub struct Relay {
    domains: DomainTable,
    outbound: Arc<dyn Outbound>,
    reporter: Option<MonitoringReporter>,
    mailer: String,
}

impl Relay {
    /// `mailer_ip` becomes the domain of the bounce sender
    pub fn new(domains: DomainTable, outbound: Arc<dyn Outbound>, mailer_ip: IpAddr) -> Self {
        Self {
            domains,
            outbound,
            reporter: None,
            mailer: format!("{MAILER}@{mailer_ip}"),
        }
    }

    pub fn with_reporter(mut self, reporter: MonitoringReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Sender address used for bounces
    pub fn mailer(&self) -> &str {
        &self.mailer
    }

    /// Take jobs until a `Shutdown` arrives or the queue disconnects
    pub fn run(&self, jobs: &Mutex<Receiver<RelayJob>>) {
        loop {
            let job = jobs.lock().unwrap_or_else(PoisonError::into_inner).recv();
            match job {
                Ok(RelayJob::Deliver(email)) => {
                    let outcome = self.relay(&email);
                    debug!(?outcome, "relay finished");
                }
                Ok(RelayJob::Shutdown) | Err(_) => break,
            }
        }
        debug!("relay consumer finished");
    }

    /// Deliver `email` to every destination authority its recipients map to
    pub fn relay(&self, email: &Email) -> RelayOutcome {
        let Some((sender, home)) = self.sender_route(email) else {
            warn!(sender = %email.sender, "sender domain unknown, mail dropped");
            return RelayOutcome::Dropped;
        };

        let mut authorities = BTreeSet::new();
        let mut unknown = BTreeSet::new();
        for recipient in &email.recipients {
            match self.domains.resolve(recipient.domain()) {
                Some(authority) => {
                    authorities.insert(authority.clone());
                }
                None => {
                    unknown.insert(recipient.domain().to_owned());
                }
            }
        }
        let unknown: Vec<String> = unknown.into_iter().collect();

        if authorities.is_empty() {
            warn!(sender = %email.sender, domains = ?unknown, "no recipient domain known");
            let subject = format!("{UNKNOWN_DOMAINS} {}", unknown.join(", "));
            self.bounce(email, &sender, &home, &subject);
            return RelayOutcome::Unroutable { domains: unknown };
        }
        if !unknown.is_empty() {
            warn!(sender = %email.sender, domains = ?unknown, "skipping unknown recipient domains");
        }

        let mut delivered = 0;
        let mut bounced = 0;
        for authority in &authorities {
            match self.outbound.send(authority, email) {
                Ok(local) => {
                    info!(%authority, sender = %email.sender, "mail relayed");
                    delivered += 1;
                    self.report(local, &email.sender);
                }
                Err(e) => {
                    error!(%authority, sender = %email.sender, error = %e, "relay failed");
                    self.bounce(email, &sender, &home, TRANSFER_FAILED);
                    bounced += 1;
                }
            }
        }

        RelayOutcome::Delivered { delivered, bounced }
    }

    fn sender_route(&self, email: &Email) -> Option<(Address, Authority)> {
        let sender = email.sender_address()?;
        let home = self.domains.resolve(sender.domain())?.clone();
        Some((sender, home))
    }

    /// One attempt, never bounced again
    fn bounce(&self, original: &Email, sender: &Address, home: &Authority, subject: &str) {
        let bounce = Email::new(
            vec![sender.clone()],
            &self.mailer,
            subject,
            &original.to_string(),
        );

        match self.outbound.send(home, &bounce) {
            Ok(local) => {
                info!(authority = %home, recipient = %sender, "bounce sent");
                self.report(local, &bounce.sender);
            }
            Err(e) => error!(authority = %home, recipient = %sender, error = %e, "bounce failed"),
        }
    }

    fn report(&self, local: SocketAddr, sender: &str) {
        let Some(reporter) = &self.reporter else {
            return;
        };
        if let Err(e) = reporter.report(&local.to_string(), sender) {
            warn!(collector = %reporter.collector(), error = %e, "delivery report failed");
        }
    }
}
