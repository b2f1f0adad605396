//! In-memory mailbox store shared by every session of a mailbox server

use crate::email::Email;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Failures of mailbox lookups
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("no mailbox found")]
    NoMailbox,

    #[error("no mail with id {0}")]
    NoSuchMail(u64),
}

type Mailbox = Arc<RwLock<BTreeMap<u64, Email>>>;

/// Per-user message maps plus the server-wide id sequence.
///
/// The outer map is only write-locked to create a user's mailbox; all
/// message traffic goes through that user's own lock, so sessions working
/// on different users never wait on each other.
#[derive(Debug, Default)]
pub struct MailboxStore {
    mailboxes: RwLock<HashMap<String, Mailbox>>,
    next_id: AtomicU64,
}

impl MailboxStore {
    /// Create an empty store; ids start at 0
    pub fn new() -> Self {
        Self::default()
    }

    fn mailbox(&self, user: &str) -> Option<Mailbox> {
        self.mailboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user)
            .cloned()
    }

    fn mailbox_or_create(&self, user: &str) -> Mailbox {
        if let Some(mailbox) = self.mailbox(user) {
            return mailbox;
        }
        self.mailboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(user.to_owned())
            .or_default()
            .clone()
    }

    /// Store `email` for `user` under a fresh id and return that id
    pub fn deposit(&self, user: &str, email: Email) -> u64 {
        let mailbox = self.mailbox_or_create(user);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        mailbox
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, email);
        id
    }

    /// Whether `user` has ever received mail
    pub fn has_mailbox(&self, user: &str) -> bool {
        self.mailbox(user).is_some()
    }

    /// All messages of `user`, ordered by id
    pub fn list(&self, user: &str) -> Result<Vec<(u64, Email)>, StoreError> {
        let mailbox = self.mailbox(user).ok_or(StoreError::NoMailbox)?;
        let messages = mailbox.read().unwrap_or_else(PoisonError::into_inner);
        Ok(messages
            .iter()
            .map(|(id, email)| (*id, email.clone()))
            .collect())
    }

    /// One message of `user`
    pub fn get(&self, user: &str, id: u64) -> Result<Email, StoreError> {
        let mailbox = self.mailbox(user).ok_or(StoreError::NoMailbox)?;
        let messages = mailbox.read().unwrap_or_else(PoisonError::into_inner);
        messages.get(&id).cloned().ok_or(StoreError::NoSuchMail(id))
    }

    /// Remove exactly one message of `user`. The mailbox itself stays.
    pub fn delete(&self, user: &str, id: u64) -> Result<Email, StoreError> {
        let mailbox = self.mailbox(user).ok_or(StoreError::NoMailbox)?;
        let mut messages = mailbox.write().unwrap_or_else(PoisonError::into_inner);
        messages.remove(&id).ok_or(StoreError::NoSuchMail(id))
    }

    /// Number of messages currently held for `user`
    pub fn message_count(&self, user: &str) -> usize {
        self.mailbox(user)
            .map(|mailbox| mailbox.read().unwrap_or_else(PoisonError::into_inner).len())
            .unwrap_or(0)
    }
}
