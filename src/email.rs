//! Email data structures and functionality

use std::fmt;
use std::str::FromStr;

/// Subject used when a sender never supplies one
pub const EMPTY_SUBJECT: &str = "(empty subject)";

/// A `local-part@domain` mail address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    local: String,
    domain: String,
}

/// Returned when a string does not follow the `local-part@domain` pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidAddress(pub String);

impl fmt::Display for InvalidAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid email pattern {}", self.0)
    }
}

impl std::error::Error for InvalidAddress {}

impl Address {
    /// Create an address from its two halves without validation
    pub fn new(local: &str, domain: &str) -> Self {
        Self {
            local: local.to_owned(),
            domain: domain.to_owned(),
        }
    }

    /// The part before the `@`
    pub fn local(&self) -> &str {
        &self.local
    }

    /// The part after the `@`
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Check whether this address belongs to `domain` (case-insensitive)
    pub fn is_in_domain(&self, domain: &str) -> bool {
        self.domain.eq_ignore_ascii_case(domain)
    }
}

fn is_address_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+')
}

impl FromStr for Address {
    type Err = InvalidAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidAddress(s.to_owned());

        let (local, domain) = s.split_once('@').ok_or_else(invalid)?;
        if local.is_empty() || domain.is_empty() {
            return Err(invalid());
        }
        if !local.chars().all(is_address_char) || !domain.chars().all(is_address_char) {
            return Err(invalid());
        }

        Ok(Self::new(local, domain))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

/// A complete email as handed to the relay queue or the mailbox store.
///
/// Values of this type always carry every field; partially specified mail
/// only exists inside a protocol session's draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    /// Recipient addresses, never empty
    pub recipients: Vec<Address>,

    /// The sender's address as supplied on the wire
    pub sender: String,

    /// Subject line
    pub subject: String,

    /// Message body
    pub data: String,
}

impl Email {
    /// Create a new email
    pub fn new(recipients: Vec<Address>, sender: &str, subject: &str, data: &str) -> Self {
        Self {
            recipients,
            sender: sender.to_owned(),
            subject: subject.to_owned(),
            data: data.to_owned(),
        }
    }

    /// Recipients joined with commas, the form used on `to` lines
    pub fn recipient_list(&self) -> String {
        self.recipients
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse the sender field as an address, if it is one
    pub fn sender_address(&self) -> Option<Address> {
        self.sender.parse().ok()
    }

    /// Check if this email was sent to a specific recipient
    pub fn has_recipient(&self, recipient: &str) -> bool {
        self.recipients.iter().any(|addr| addr.to_string() == recipient)
    }
}

/// Single-line rendering, used as the body of bounce notifications
impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[from: {} | to: {} | subject: {} | data: {}]",
            self.sender,
            self.recipient_list(),
            self.subject,
            self.data
        )
    }
}
