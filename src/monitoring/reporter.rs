//! Delivery reports sent from a transfer server to the monitoring collector

use crate::config::MonitoringTarget;

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;
use tracing::debug;

const MAX_REPLY: usize = 1024;

/// Sends one datagram per delivery and waits briefly for the answer
#[derive(Debug, Clone)]
pub struct MonitoringReporter {
    collector: SocketAddr,
    timeout: Duration,
}

impl MonitoringReporter {
    /// Resolve the collector address once, up front
    pub fn new(target: &MonitoringTarget) -> io::Result<Self> {
        let collector = (target.host.as_str(), target.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("monitoring host {} did not resolve", target.host),
                )
            })?;

        Ok(Self {
            collector,
            timeout: target.timeout(),
        })
    }

    pub fn collector(&self) -> SocketAddr {
        self.collector
    }

    /// Report that `server` delivered mail from `sender` and return the
    /// collector's reply
    pub fn report(&self, server: &str, sender: &str) -> io::Result<String> {
        let bind = if self.collector.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(bind)?;
        socket.set_read_timeout(Some(self.timeout))?;

        let payload = format!("{server} {sender}");
        socket.send_to(payload.as_bytes(), self.collector)?;

        let mut buf = [0u8; MAX_REPLY];
        let len = socket.recv(&mut buf)?;
        let reply = String::from_utf8_lossy(&buf[..len])
            .trim_end_matches('\0')
            .to_string();

        debug!(collector = %self.collector, %payload, %reply, "delivery reported");
        Ok(reply)
    }
}
