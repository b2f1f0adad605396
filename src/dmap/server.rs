//! DMAP server role: drives one accepted connection

use crate::config::UserTable;
use crate::dmap::commands::DmapCommandHandler;
use crate::dmap::error::DmapError;
use crate::dmap::session::DmapSession;
use crate::mailbox::store::MailboxStore;
use crate::response::Reply;
use crate::transport::{LineTransport, is_line_too_long};

use std::net::TcpStream;
use tracing::{debug, warn};

/// Greeting protocol name
pub const DMAP: &str = "DMAP";

/// Serve one DMAP client until it quits, fails to log in, breaks the
/// grammar or disconnects
pub fn handle_client(
    stream: TcpStream,
    users: &UserTable,
    store: &MailboxStore,
) -> Result<(), DmapError> {
    let mut transport = LineTransport::new(stream)?;
    let peer = transport.peer_addr()?;
    let command_handler = DmapCommandHandler::new(users, store);
    let mut session = DmapSession::new();

    transport.write_reply(&Reply::greeting(DMAP))?;

    loop {
        let line = match transport.read_line() {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) if is_line_too_long(&e) => {
                let e = DmapError::LineTooLong;
                warn!(%peer, user = session.user(), error = %e, "dmap command rejected");
                transport.write_reply(&e.to_reply())?;
                break;
            }
            Err(e) => return Err(e.into()),
        };
        // passwords stay out of the log
        debug!(%peer, command = line.split(' ').next().unwrap_or_default(), "dmap command");

        match command_handler.process_command(&line, &mut session) {
            Ok(reply) => {
                transport.write_reply(&reply)?;
                if reply.is_bye() {
                    break;
                }
            }
            Err(e) => {
                warn!(%peer, user = session.user(), error = %e, "dmap command rejected");
                transport.write_reply(&e.to_reply())?;
                if e.terminates_session() {
                    break;
                }
            }
        }
    }

    debug!(%peer, "dmap session finished");
    transport.close()?;
    Ok(())
}
