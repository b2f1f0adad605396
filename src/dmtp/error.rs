//! Error types for the DMTP engine

use crate::response::Reply;
use thiserror::Error;

/// Everything that can go wrong in a DMTP exchange, on either side.
///
/// The `Display` text of the server-side variants is exactly what follows
/// `error ` on the wire.
#[derive(Error, Debug)]
pub enum DmtpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error")]
    ProtocolError,

    #[error("command not supported")]
    CommandNotSupported,

    #[error("invalid email pattern {0}")]
    InvalidAddress(String),

    #[error("unknown recipient {0}")]
    UnknownRecipient(String),

    #[error("no known domain")]
    NoKnownDomain,

    #[error("email is missing {0}")]
    MissingField(&'static str),

    #[error("line too long")]
    LineTooLong,

    #[error("service unavailable")]
    Unavailable,

    #[error("unexpected reply to '{command}': {reply}")]
    UnexpectedReply { command: String, reply: String },

    #[error("connection closed by peer")]
    ConnectionClosed,
}

impl DmtpError {
    /// Reply sent to the client for this error
    pub fn to_reply(&self) -> Reply {
        Reply::error(self)
    }

    /// Whether the server closes the session after replying
    pub fn terminates_session(&self) -> bool {
        match self {
            DmtpError::UnknownRecipient(_)
            | DmtpError::NoKnownDomain
            | DmtpError::MissingField(_) => false,
            DmtpError::Io(_)
            | DmtpError::ProtocolError
            | DmtpError::CommandNotSupported
            | DmtpError::InvalidAddress(_)
            | DmtpError::LineTooLong
            | DmtpError::Unavailable
            | DmtpError::UnexpectedReply { .. }
            | DmtpError::ConnectionClosed => true,
        }
    }
}
