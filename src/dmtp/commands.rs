//! Implementation of DMTP commands

use crate::dmtp::error::DmtpError;
use crate::dmtp::session::{DmtpSession, DmtpState};
use crate::email::{Address, Email};
use crate::response::Reply;

/// Where a DMTP server session hands its emails.
///
/// Submission (transfer server) and ingestion (mailbox server) speak the
/// same grammar and differ only in how recipients are checked and where a
/// completed email goes.
pub trait MailSink: Send + Sync {
    /// Validate the recipients of a `to` command and return the count
    /// reported back to the client
    fn accept_recipients(&self, recipients: &[Address]) -> Result<usize, DmtpError>;

    /// Take ownership of a completed email
    fn deliver(&self, email: Email) -> Result<(), DmtpError>;
}

/// A parsed DMTP command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DmtpCommand {
    Begin,
    To(String),
    From(String),
    Subject(String),
    Data(String),
    Send,
    Quit,
    Unknown(String),
}

impl DmtpCommand {
    /// Parse one command line. Keywords are case-sensitive; argument-bearing
    /// keywords without an argument are unknown.
    pub fn parse(line: &str) -> Self {
        let (keyword, argument) = match line.split_once(' ') {
            Some((keyword, argument)) => (keyword, Some(argument)),
            None => (line, None),
        };

        match (keyword, argument) {
            ("begin", None) => DmtpCommand::Begin,
            ("to", Some(list)) => DmtpCommand::To(list.to_owned()),
            ("from", Some(sender)) => DmtpCommand::From(sender.to_owned()),
            ("subject", Some(subject)) => DmtpCommand::Subject(subject.to_owned()),
            ("data", Some(data)) => DmtpCommand::Data(data.to_owned()),
            ("send", None) => DmtpCommand::Send,
            ("quit", None) => DmtpCommand::Quit,
            _ => DmtpCommand::Unknown(line.to_owned()),
        }
    }
}

/// Handles DMTP commands and returns appropriate replies
pub struct DmtpCommandHandler<'a> {
    sink: &'a dyn MailSink,
}

impl<'a> DmtpCommandHandler<'a> {
    /// Create a new command handler
    pub fn new(sink: &'a dyn MailSink) -> Self {
        Self { sink }
    }

    /// Process a command line and return a reply.
    ///
    /// Errors that terminate the session also move it to `Closed`.
    pub fn process_command(
        &self,
        command_line: &str,
        session: &mut DmtpSession,
    ) -> Result<Reply, DmtpError> {
        let result = self.transition(DmtpCommand::parse(command_line), session);
        if let Err(e) = &result {
            if e.terminates_session() {
                session.close();
            }
        }
        result
    }

    fn transition(
        &self,
        command: DmtpCommand,
        session: &mut DmtpSession,
    ) -> Result<Reply, DmtpError> {
        use DmtpCommand as C;
        use DmtpState as S;

        match (session.state, command) {
            (S::AwaitBegin, C::Begin) => {
                session.begin();
                Ok(Reply::ok())
            }
            (S::AwaitBegin, _) => Err(DmtpError::ProtocolError),

            (S::Collecting, C::To(list)) => self.handle_to(&list, session),
            (S::Collecting, C::From(sender)) => {
                session.set_sender(sender);
                Ok(Reply::ok())
            }
            (S::Collecting, C::Subject(subject)) => {
                session.set_subject(subject);
                Ok(Reply::ok())
            }
            (S::Collecting, C::Data(data)) => {
                session.set_data(data);
                Ok(Reply::ok())
            }
            (S::Collecting, C::Send) => self.handle_send(session),
            (S::Collecting, C::Quit) => {
                session.close();
                Ok(Reply::bye())
            }
            (S::Collecting, C::Begin | C::Unknown(_)) => Err(DmtpError::CommandNotSupported),

            (S::Closed, _) => Err(DmtpError::ProtocolError),
        }
    }

    /// Handle `to <addr[,addr...]>`
    fn handle_to(&self, list: &str, session: &mut DmtpSession) -> Result<Reply, DmtpError> {
        let recipients = list
            .split(',')
            .map(|raw| {
                raw.trim()
                    .parse::<Address>()
                    .map_err(|_| DmtpError::InvalidAddress(raw.trim().to_owned()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let count = self.sink.accept_recipients(&recipients)?;
        session.set_recipients(recipients);

        Ok(Reply::ok_with(count))
    }

    /// Handle `send`
    fn handle_send(&self, session: &mut DmtpSession) -> Result<Reply, DmtpError> {
        let email = session.build_email()?;
        self.sink.deliver(email)?;
        session.reset();

        Ok(Reply::ok())
    }
}
