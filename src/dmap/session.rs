//! DMAP session state management

/// Represents the current state of a DMAP session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DmapState {
    /// Waiting for `login`
    Unauthenticated,
    /// Logged in as the contained user
    Authenticated(String),
    /// Session finished
    Closed,
}

/// Manages the state of a single DMAP session
#[derive(Debug)]
pub struct DmapSession {
    pub state: DmapState,
}

impl DmapSession {
    /// Create a session that is not logged in
    pub fn new() -> Self {
        Self {
            state: DmapState::Unauthenticated,
        }
    }

    /// Record `user` as logged in; a previous login is replaced
    pub fn login(&mut self, user: &str) {
        self.state = DmapState::Authenticated(user.to_owned());
    }

    /// Drop the login and keep the connection
    pub fn logout(&mut self) {
        self.state = DmapState::Unauthenticated;
    }

    /// Mark the session as finished
    pub fn close(&mut self) {
        self.state = DmapState::Closed;
    }

    /// The logged-in user, if any
    pub fn user(&self) -> Option<&str> {
        match &self.state {
            DmapState::Authenticated(user) => Some(user),
            _ => None,
        }
    }
}

impl Default for DmapSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_logout_cycle() {
        let mut session = DmapSession::new();
        assert_eq!(session.user(), None);

        session.login("zaphod");
        assert_eq!(session.user(), Some("zaphod"));

        session.logout();
        assert_eq!(session.state, DmapState::Unauthenticated);
        assert_eq!(session.user(), None);
    }

    #[test]
    fn test_close_clears_user() {
        let mut session = DmapSession::new();
        session.login("zaphod");
        session.close();
        assert_eq!(session.user(), None);
    }
}
