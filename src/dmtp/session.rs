//! DMTP session state management

use crate::dmtp::error::DmtpError;
use crate::email::{Address, EMPTY_SUBJECT, Email};

/// Represents the current state of a DMTP server session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmtpState {
    /// Greeting sent - waiting for `begin`
    AwaitBegin,
    /// `begin` received - collecting email fields, looping per email
    Collecting,
    /// Session finished, by `quit` or by a fatal error
    Closed,
}

/// Manages the state and the draft email of a single DMTP session
#[derive(Debug)]
pub struct DmtpSession {
    /// Current state of the session
    pub state: DmtpState,
    /// Recipients from the last accepted `to` command
    pub recipients: Option<Vec<Address>>,
    /// Sender from `from`
    pub sender: Option<String>,
    /// Subject from `subject`, pre-filled with a placeholder
    pub subject: Option<String>,
    /// Body from `data`
    pub data: Option<String>,
}

impl DmtpSession {
    /// Create a new DMTP session
    pub fn new() -> Self {
        Self {
            state: DmtpState::AwaitBegin,
            recipients: None,
            sender: None,
            subject: Some(EMPTY_SUBJECT.to_owned()),
            data: None,
        }
    }

    /// Move from `AwaitBegin` to `Collecting`
    pub fn begin(&mut self) {
        self.state = DmtpState::Collecting;
    }

    /// Discard the draft and start a fresh email, staying in `Collecting`
    pub fn reset(&mut self) {
        self.recipients = None;
        self.sender = None;
        self.subject = Some(EMPTY_SUBJECT.to_owned());
        self.data = None;
    }

    /// Mark the session as finished
    pub fn close(&mut self) {
        self.state = DmtpState::Closed;
    }

    /// Replace the recipient list of the draft
    pub fn set_recipients(&mut self, recipients: Vec<Address>) {
        self.recipients = Some(recipients);
    }

    /// Replace the sender of the draft
    pub fn set_sender(&mut self, sender: String) {
        self.sender = Some(sender);
    }

    /// Replace the subject of the draft
    pub fn set_subject(&mut self, subject: String) {
        self.subject = Some(subject);
    }

    /// Replace the body of the draft
    pub fn set_data(&mut self, data: String) {
        self.data = Some(data);
    }

    /// First field still missing from the draft, in priority order
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.recipients.is_none() {
            Some("recipients")
        } else if self.sender.is_none() {
            Some("sender")
        } else if self.subject.is_none() {
            Some("subject")
        } else if self.data.is_none() {
            Some("data")
        } else {
            None
        }
    }

    /// Build the email from the draft. The draft is left untouched.
    pub fn build_email(&self) -> Result<Email, DmtpError> {
        match (&self.recipients, &self.sender, &self.subject, &self.data) {
            (Some(recipients), Some(sender), Some(subject), Some(data)) => {
                Ok(Email::new(recipients.clone(), sender, subject, data))
            }
            _ => Err(DmtpError::MissingField(
                self.missing_field().unwrap_or("recipients"),
            )),
        }
    }
}

impl Default for DmtpSession {
    fn default() -> Self {
        Self::new()
    }
}
