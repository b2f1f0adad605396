//! DMAP, the mailbox access protocol: grammar, session and server role

pub mod commands;
pub mod error;
pub mod server;
pub mod session;

pub use commands::{DmapCommand, DmapCommandHandler};
pub use error::DmapError;
pub use session::{DmapSession, DmapState};
