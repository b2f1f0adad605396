//! Error types for the DMAP engine

use crate::config::LoginFailure;
use crate::mailbox::store::StoreError;
use crate::response::Reply;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DmapError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown user")]
    UnknownUser,

    #[error("wrong password")]
    WrongPassword,

    #[error("command not supported")]
    CommandNotSupported,

    #[error("line too long")]
    LineTooLong,

    #[error("no mailbox found")]
    NoMailbox,

    #[error("invalid number")]
    InvalidNumber,

    #[error("no mail with id {0}")]
    NoSuchMail(u64),
}

impl From<StoreError> for DmapError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NoMailbox => DmapError::NoMailbox,
            StoreError::NoSuchMail(id) => DmapError::NoSuchMail(id),
        }
    }
}

impl From<LoginFailure> for DmapError {
    fn from(e: LoginFailure) -> Self {
        match e {
            LoginFailure::UnknownUser => DmapError::UnknownUser,
            LoginFailure::WrongPassword => DmapError::WrongPassword,
        }
    }
}

impl DmapError {
    /// Reply sent to the client for this error
    pub fn to_reply(&self) -> Reply {
        Reply::error(self)
    }

    /// Login failures and grammar violations end the session; lookups
    /// that come up empty do not
    pub fn terminates_session(&self) -> bool {
        match self {
            DmapError::NoMailbox | DmapError::InvalidNumber | DmapError::NoSuchMail(_) => false,
            DmapError::Io(_)
            | DmapError::UnknownUser
            | DmapError::WrongPassword
            | DmapError::CommandNotSupported
            | DmapError::LineTooLong => true,
        }
    }
}
