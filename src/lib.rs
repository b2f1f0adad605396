//! # relaymail
//!
//! relaymail is a small distributed mail system built from three kinds of
//! server:
//!
//! - **transfer servers** accept mail from clients over DMTP and relay it to
//!   the mailbox server responsible for each recipient domain,
//! - **mailbox servers** accept relayed mail over DMTP and let users read it
//!   over DMAP,
//! - a **monitoring server** counts delivery reports sent over UDP.
//!
//! ## Quick Start
//!
//! ```rust
//! use relaymail::config::{MailboxConfig, UserTable};
//! use relaymail::MailboxServer;
//! use std::io::{BufRead, BufReader, Write};
//! use std::net::TcpStream;
//!
//! let users = UserTable::new().with("zaphod", "42");
//! let server = MailboxServer::new(MailboxConfig::new("univer.ze", users));
//! let handle = server.start().unwrap();
//!
//! // Relay a message into the mailbox
//! let mut stream = TcpStream::connect(handle.dmtp_addr()).unwrap();
//! let mut reader = BufReader::new(stream.try_clone().unwrap());
//! let mut line = String::new();
//! reader.read_line(&mut line).unwrap();
//! assert_eq!(line, "ok DMTP\n");
//!
//! for command in ["begin", "to zaphod@univer.ze", "from trillian@earth.planet",
//!                 "subject hi", "data hello", "send", "quit"] {
//!     writeln!(stream, "{command}").unwrap();
//!     line.clear();
//!     reader.read_line(&mut line).unwrap();
//!     assert!(line.starts_with("ok"));
//! }
//!
//! assert_eq!(handle.store().message_count("zaphod"), 1);
//! handle.shutdown();
//! ```
//!
//! ## DMTP commands
//!
//! - `begin` - Start a new message
//! - `to <addr>[,<addr>...]` - Set the recipients
//! - `from <addr>` - Set the sender
//! - `subject <text>` - Set the subject
//! - `data <text>` - Set the body
//! - `send` - Hand the message on and start over
//! - `quit` - Close the connection
//!
//! ## DMAP commands
//!
//! - `login <user> <password>` - Authenticate
//! - `list` - One line per message: `<id> <sender> <subject>`
//! - `show <id>` - Print one message
//! - `delete <id>` - Remove one message
//! - `logout` - Drop the login, keep the connection
//! - `quit` - Close the connection
//!
//! Every reply starts with `ok` or `error`. Protocol violations and failed
//! logins close the connection; lookups that come up empty do not.
//!
//! ## Notes
//!
//! - Mailboxes live in memory for the lifetime of the server.
//! - Passwords are compared in plain text and connections are not encrypted.
//! - A relay failure is reported back to the sender as a bounce, once.

pub mod acceptor;
pub mod config;
pub mod dmap;
pub mod dmtp;
pub mod email;
pub mod error;
pub mod logging;
pub mod mailbox;
pub mod monitoring;
pub mod pool;
pub mod response;
pub mod transfer;
pub mod transport;

pub use config::Config;
pub use email::{Address, Email};
pub use error::{MailError, Result};
pub use mailbox::{MailboxHandle, MailboxServer, MailboxStore};
pub use monitoring::{MonitoringHandle, MonitoringServer};
pub use response::Reply;
pub use transfer::{TransferHandle, TransferServer};
