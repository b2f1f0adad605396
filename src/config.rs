//! Configuration for the transfer, mailbox and monitoring components.
//!
//! Each process reads one TOML file. Sections a component does not use may
//! be left out.

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::{MailError, Result};

/// A `host:port` pair identifying a reachable server
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub struct Authority {
    host: String,
    port: u16,
}

impl Authority {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_owned(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for Authority {
    type Err = MailError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || MailError::InvalidAuthority(s.to_owned());
        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for Authority {
    type Error = MailError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Domain name to mailbox server authority, read-only once loaded
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct DomainTable(HashMap<String, Authority>);

impl DomainTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly for tests and embedding
    pub fn with(mut self, domain: &str, authority: Authority) -> Self {
        self.0.insert(domain.to_owned(), authority);
        self
    }

    /// Look up the authority serving `domain`; `None` means unknown domain
    pub fn resolve(&self, domain: &str) -> Option<&Authority> {
        self.0.get(domain).or_else(|| {
            self.0
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(domain))
                .map(|(_, authority)| authority)
        })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Why a login attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginFailure {
    UnknownUser,
    WrongPassword,
}

/// Username to plaintext password
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct UserTable(HashMap<String, String>);

impl UserTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, user: &str, password: &str) -> Self {
        self.0.insert(user.to_owned(), password.to_owned());
        self
    }

    pub fn contains(&self, user: &str) -> bool {
        self.0.contains_key(user)
    }

    /// Check a credential pair
    pub fn verify(&self, user: &str, password: &str) -> std::result::Result<(), LoginFailure> {
        match self.0.get(user) {
            None => Err(LoginFailure::UnknownUser),
            Some(expected) if expected != password => Err(LoginFailure::WrongPassword),
            Some(_) => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Minimum level: trace, debug, info, warn or error.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file written in addition to stdout.
    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Where a transfer server sends delivery reports.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringTarget {
    pub host: String,
    pub port: u16,
    /// How long to wait for the collector's answer.
    #[serde(default = "default_report_timeout")]
    pub timeout_ms: u64,
}

fn default_report_timeout() -> u64 {
    1000
}

impl MonitoringTarget {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Transfer server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// DMTP port for submitting clients.
    #[serde(default = "default_transfer_port")]
    pub port: u16,
    /// Threads serving client connections.
    #[serde(default = "default_producer_workers")]
    pub producer_workers: usize,
    /// Threads relaying queued mail.
    #[serde(default = "default_consumer_workers")]
    pub consumer_workers: usize,
    /// Emails that may wait for relay before submitters block.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Connect timeout towards mailbox servers in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Read/write timeout towards mailbox servers in milliseconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// Delivery report collector, if any.
    #[serde(default)]
    pub monitoring: Option<MonitoringTarget>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_transfer_port() -> u16 {
    11000
}

fn default_producer_workers() -> usize {
    20
}

fn default_consumer_workers() -> usize {
    10
}

fn default_queue_capacity() -> usize {
    100
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_read_timeout() -> u64 {
    10_000
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_transfer_port(),
            producer_workers: default_producer_workers(),
            consumer_workers: default_consumer_workers(),
            queue_capacity: default_queue_capacity(),
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
            monitoring: None,
        }
    }
}

impl TransferConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// `host:port` to bind
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Mailbox server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MailboxConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Domain this server stores mail for.
    pub domain: String,
    /// Port accepting relayed mail (DMTP).
    pub dmtp_port: u16,
    /// Port serving mailbox access (DMAP).
    pub dmap_port: u16,
    /// Threads per listener.
    #[serde(default = "default_mailbox_workers")]
    pub workers: usize,
    /// Known users and their passwords.
    #[serde(default)]
    pub users: UserTable,
}

fn default_mailbox_workers() -> usize {
    10
}

impl MailboxConfig {
    pub fn new(domain: &str, users: UserTable) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            domain: domain.to_owned(),
            dmtp_port: 0,
            dmap_port: 0,
            workers: default_mailbox_workers(),
            users,
        }
    }
}

/// Monitoring collector configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// UDP port receiving delivery reports.
    pub udp_port: u16,
}

/// Complete configuration of one component process.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub transfer: Option<TransferConfig>,
    #[serde(default)]
    pub mailbox: Option<MailboxConfig>,
    #[serde(default)]
    pub monitoring: Option<MonitoringConfig>,
    /// Routing table used by transfer servers.
    #[serde(default)]
    pub domains: DomainTable,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(MailError::Io)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| MailError::Config(format!("config parse error: {e}")))
    }

    pub fn transfer(&self) -> Result<&TransferConfig> {
        self.transfer
            .as_ref()
            .ok_or_else(|| MailError::Config("missing [transfer] section".into()))
    }

    pub fn mailbox(&self) -> Result<&MailboxConfig> {
        self.mailbox
            .as_ref()
            .ok_or_else(|| MailError::Config("missing [mailbox] section".into()))
    }

    pub fn monitoring(&self) -> Result<&MonitoringConfig> {
        self.monitoring
            .as_ref()
            .ok_or_else(|| MailError::Config("missing [monitoring] section".into()))
    }
}
