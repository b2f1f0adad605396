//! DMTP server role: drives one accepted connection

use crate::dmtp::commands::{DmtpCommandHandler, MailSink};
use crate::dmtp::error::DmtpError;
use crate::dmtp::session::DmtpSession;
use crate::response::Reply;
use crate::transport::{LineTransport, is_line_too_long};

use std::net::TcpStream;
use tracing::{debug, warn};

/// Greeting protocol name
pub const DMTP: &str = "DMTP";

/// Serve one DMTP client until it quits, violates the protocol or
/// disconnects. Completed emails go to `sink`.
pub fn handle_client(stream: TcpStream, sink: &dyn MailSink) -> Result<(), DmtpError> {
    let mut transport = LineTransport::new(stream)?;
    let peer = transport.peer_addr()?;
    let command_handler = DmtpCommandHandler::new(sink);
    let mut session = DmtpSession::new();

    transport.write_reply(&Reply::greeting(DMTP))?;

    loop {
        let line = match transport.read_line() {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) if is_line_too_long(&e) => {
                let e = DmtpError::LineTooLong;
                warn!(%peer, error = %e, "dmtp command rejected");
                transport.write_reply(&e.to_reply())?;
                break;
            }
            Err(e) => return Err(e.into()),
        };
        debug!(%peer, command = %line, "dmtp command");

        match command_handler.process_command(&line, &mut session) {
            Ok(reply) => {
                transport.write_reply(&reply)?;
                if reply.is_bye() {
                    break;
                }
            }
            Err(e) => {
                warn!(%peer, error = %e, "dmtp command rejected");
                transport.write_reply(&e.to_reply())?;
                if e.terminates_session() {
                    break;
                }
            }
        }
    }

    debug!(%peer, "dmtp session finished");
    transport.close()?;
    Ok(())
}
