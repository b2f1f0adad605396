//! Transfer server: submission acceptor, relay queue and consumers

pub mod relay;
pub mod server;

pub use relay::{DmtpOutbound, Outbound, Relay, RelayJob, RelayOutcome};
pub use server::{QueueSink, TransferHandle, TransferServer};
