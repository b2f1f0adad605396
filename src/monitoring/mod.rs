//! Out-of-band delivery statistics: the UDP collector and its client

pub mod reporter;
pub mod server;

pub use reporter::MonitoringReporter;
pub use server::{DeliveryReport, MonitoringHandle, MonitoringServer, Statistics};
