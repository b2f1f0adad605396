//! DMTP, the mail transfer protocol: server role, client role and grammar

pub mod client;
pub mod commands;
pub mod error;
pub mod server;
pub mod session;

pub use client::DmtpClient;
pub use commands::{DmtpCommand, DmtpCommandHandler, MailSink};
pub use error::DmtpError;
pub use session::{DmtpSession, DmtpState};
