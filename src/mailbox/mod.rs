//! Mailbox server: the message store plus its ingestion and access sides

pub mod server;
pub mod store;

pub use server::{MailboxHandle, MailboxServer, MailboxSink};
pub use store::{MailboxStore, StoreError};
