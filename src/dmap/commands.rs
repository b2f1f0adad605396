//! Implementation of DMAP commands

use crate::config::UserTable;
use crate::dmap::error::DmapError;
use crate::dmap::session::{DmapSession, DmapState};
use crate::mailbox::store::MailboxStore;
use crate::response::Reply;

/// A parsed DMAP command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DmapCommand {
    Login { user: String, password: String },
    List,
    Show(String),
    Delete(String),
    Logout,
    Quit,
    Unknown(String),
}

impl DmapCommand {
    pub fn parse(line: &str) -> Self {
        let parts: Vec<&str> = line.split(' ').collect();

        match parts.as_slice() {
            ["login", user, password] if !user.is_empty() => DmapCommand::Login {
                user: (*user).to_owned(),
                password: (*password).to_owned(),
            },
            ["list"] => DmapCommand::List,
            ["show", id] => DmapCommand::Show((*id).to_owned()),
            ["delete", id] => DmapCommand::Delete((*id).to_owned()),
            ["logout"] => DmapCommand::Logout,
            ["quit"] => DmapCommand::Quit,
            _ => DmapCommand::Unknown(line.to_owned()),
        }
    }
}

/// Handles DMAP commands against a user table and a mailbox store
pub struct DmapCommandHandler<'a> {
    users: &'a UserTable,
    store: &'a MailboxStore,
}

impl<'a> DmapCommandHandler<'a> {
    pub fn new(users: &'a UserTable, store: &'a MailboxStore) -> Self {
        Self { users, store }
    }

    /// Process a command line and return a reply.
    ///
    /// Errors that terminate the session also move it to `Closed`.
    pub fn process_command(
        &self,
        command_line: &str,
        session: &mut DmapSession,
    ) -> Result<Reply, DmapError> {
        let result = self.transition(DmapCommand::parse(command_line), session);
        if let Err(e) = &result {
            if e.terminates_session() {
                session.close();
            }
        }
        result
    }

    fn transition(
        &self,
        command: DmapCommand,
        session: &mut DmapSession,
    ) -> Result<Reply, DmapError> {
        use DmapCommand as C;

        if command == C::Quit {
            session.close();
            return Ok(Reply::bye());
        }

        match (session.state.clone(), command) {
            (DmapState::Unauthenticated, C::Login { user, password }) => {
                self.users.verify(&user, &password)?;
                session.login(&user);
                Ok(Reply::ok())
            }
            (DmapState::Authenticated(user), C::List) => self.handle_list(&user),
            (DmapState::Authenticated(user), C::Show(id)) => self.handle_show(&user, &id),
            (DmapState::Authenticated(user), C::Delete(id)) => self.handle_delete(&user, &id),
            (DmapState::Authenticated(_), C::Logout) => {
                session.logout();
                Ok(Reply::ok())
            }
            _ => Err(DmapError::CommandNotSupported),
        }
    }

    /// Handle `list`
    fn handle_list(&self, user: &str) -> Result<Reply, DmapError> {
        let lines = self
            .store
            .list(user)?
            .into_iter()
            .map(|(id, email)| format!("{id} {} {}", email.sender, email.subject))
            .collect();

        Ok(Reply::multiline(lines))
    }

    /// Handle `show <id>`
    fn handle_show(&self, user: &str, id: &str) -> Result<Reply, DmapError> {
        let id = self.message_id(user, id)?;
        let email = self.store.get(user, id)?;

        Ok(Reply::multiline(vec![
            format!("from {}", email.sender),
            format!("to {}", email.recipient_list()),
            format!("subject {}", email.subject),
            format!("data {}", email.data),
        ]))
    }

    /// Handle `delete <id>`
    fn handle_delete(&self, user: &str, id: &str) -> Result<Reply, DmapError> {
        let id = self.message_id(user, id)?;
        self.store.delete(user, id)?;

        Ok(Reply::ok())
    }

    /// Mailbox existence is checked before the id is parsed
    fn message_id(&self, user: &str, raw: &str) -> Result<u64, DmapError> {
        if !self.store.has_mailbox(user) {
            return Err(DmapError::NoMailbox);
        }
        raw.parse().map_err(|_| DmapError::InvalidNumber)
    }
}
