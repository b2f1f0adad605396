//! Crate-level error type for startup, configuration and I/O

use thiserror::Error;

/// Errors raised while configuring or starting a server component
#[derive(Error, Debug)]
pub enum MailError {
    /// I/O error, e.g. binding a listening socket
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file missing, malformed or incomplete
    #[error("configuration error: {0}")]
    Config(String),

    /// A `host:port` value that does not parse
    #[error("invalid authority '{0}': expected host:port")]
    InvalidAuthority(String),

    /// Logging could not be initialised
    #[error("logging error: {0}")]
    Logging(String),
}

/// Result type alias for relaymail operations.
pub type Result<T> = std::result::Result<T, MailError>;
