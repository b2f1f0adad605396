//! DMTP client role, used by relay consumers to push mail to other servers

use crate::dmtp::error::DmtpError;
use crate::dmtp::server::DMTP;
use crate::email::{Address, Email};
use crate::transport::LineTransport;

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// An initiating DMTP session against one server
#[derive(Debug)]
pub struct DmtpClient {
    transport: LineTransport,
}

impl DmtpClient {
    /// Connect to `authority` (`host:port`) and consume the greeting.
    ///
    /// `io_timeout` bounds every later read and write.
    pub fn connect(
        authority: &str,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Result<Self, DmtpError> {
        let mut last_error = None;
        for addr in authority.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, connect_timeout) {
                Ok(stream) => return Self::from_stream(stream, io_timeout),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("{authority} did not resolve"),
                )
            })
            .into())
    }

    fn from_stream(stream: TcpStream, timeout: Duration) -> Result<Self, DmtpError> {
        let transport = LineTransport::new(stream)?;
        transport.set_timeout(Some(timeout))?;

        let mut client = Self { transport };
        let greeting = client.read_reply()?;
        if greeting != format!("ok {DMTP}") {
            return Err(DmtpError::UnexpectedReply {
                command: "connect".into(),
                reply: greeting,
            });
        }
        Ok(client)
    }

    /// Local end of the connection
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn begin(&mut self) -> Result<(), DmtpError> {
        self.expect_ok("begin")
    }

    /// Send `to`, accepting any `ok ...` reply; returns the reply
    pub fn to(&mut self, recipients: &[Address]) -> Result<String, DmtpError> {
        let list = recipients
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let command = format!("to {list}");

        self.transport.write_line(&command)?;
        let reply = self.read_reply()?;
        if reply == "ok" || reply.starts_with("ok ") {
            Ok(reply)
        } else {
            Err(DmtpError::UnexpectedReply { command, reply })
        }
    }

    pub fn from(&mut self, sender: &str) -> Result<(), DmtpError> {
        self.expect_ok(&format!("from {sender}"))
    }

    pub fn subject(&mut self, subject: &str) -> Result<(), DmtpError> {
        self.expect_ok(&format!("subject {subject}"))
    }

    pub fn data(&mut self, data: &str) -> Result<(), DmtpError> {
        self.expect_ok(&format!("data {data}"))
    }

    pub fn send(&mut self) -> Result<(), DmtpError> {
        self.expect_ok("send")
    }

    /// Send `quit` without waiting for the reply, then close
    pub fn quit(mut self) -> Result<(), DmtpError> {
        self.transport.write_line("quit")?;
        self.transport.close()?;
        Ok(())
    }

    /// Replay a whole email: `begin`, `to`, `from`, `subject`, `data`, `send`
    pub fn transfer(&mut self, email: &Email) -> Result<(), DmtpError> {
        self.begin()?;
        self.to(&email.recipients)?;
        self.from(&email.sender)?;
        self.subject(&email.subject)?;
        self.data(&email.data)?;
        self.send()
    }

    fn expect_ok(&mut self, command: &str) -> Result<(), DmtpError> {
        self.transport.write_line(command)?;
        let reply = self.read_reply()?;
        if reply == "ok" {
            Ok(())
        } else {
            Err(DmtpError::UnexpectedReply {
                command: command.to_owned(),
                reply,
            })
        }
    }

    fn read_reply(&mut self) -> Result<String, DmtpError> {
        self.transport
            .read_line()?
            .ok_or(DmtpError::ConnectionClosed)
    }
}
