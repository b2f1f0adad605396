//! Line-oriented duplex channel over a TCP stream

use crate::response::Reply;

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;
use thiserror::Error;

/// Longest accepted line, terminator excluded
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Carried inside the `io::Error` returned for an overlong line
#[derive(Error, Debug)]
#[error("line too long")]
pub struct LineTooLong;

/// Check whether a `read_line` failure was an overlong line
pub fn is_line_too_long(e: &io::Error) -> bool {
    e.get_ref().is_some_and(|inner| inner.is::<LineTooLong>())
}

/// Newline-delimited request/response channel.
///
/// Every write is flushed immediately; nothing is buffered across calls.
#[derive(Debug)]
pub struct LineTransport {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl LineTransport {
    /// Wrap a connected stream
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            reader,
            writer: stream,
        })
    }

    /// Apply the same read and write timeout to the underlying stream
    pub fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.writer.set_read_timeout(timeout)?;
        self.writer.set_write_timeout(timeout)
    }

    /// Send one line, terminated and flushed
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }

    /// Send every line of a reply
    pub fn write_reply(&mut self, reply: &Reply) -> io::Result<()> {
        self.writer.write_all(reply.format().as_bytes())?;
        self.writer.flush()
    }

    /// Block until a full line is available.
    ///
    /// Returns `Ok(None)` once the peer has closed the stream. The line
    /// terminator (`\n` or `\r\n`) is stripped. At most
    /// `MAX_LINE_LENGTH` bytes plus terminator are buffered; a longer line
    /// fails with an `InvalidData` error carrying `LineTooLong`.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        let limit = (MAX_LINE_LENGTH + 2) as u64;
        let mut buffer = Vec::new();
        if (&mut self.reader).take(limit).read_until(b'\n', &mut buffer)? == 0 {
            return Ok(None);
        }

        while buffer.ends_with(b"\n") || buffer.ends_with(b"\r") {
            buffer.pop();
        }
        if buffer.len() > MAX_LINE_LENGTH {
            return Err(io::Error::new(io::ErrorKind::InvalidData, LineTooLong));
        }
        Ok(Some(String::from_utf8_lossy(&buffer).into_owned()))
    }

    /// Address of the remote end
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.writer.peer_addr()
    }

    /// Address of the local end
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.writer.local_addr()
    }

    /// Release the stream
    pub fn close(self) -> io::Result<()> {
        match self.writer.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}
