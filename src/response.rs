//! Reply handling shared by the DMTP and DMAP servers

use std::fmt::Display;

/// A reply that can be sent to a client, one or more lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    lines: Vec<String>,
}

impl Reply {
    /// Create a single-line reply
    pub fn new(line: &str) -> Self {
        Self {
            lines: vec![line.to_owned()],
        }
    }

    /// Create a multiline reply. Empty input collapses to a plain `ok`.
    pub fn multiline(lines: Vec<String>) -> Self {
        if lines.is_empty() {
            return Self::ok();
        }
        Self { lines }
    }

    /// Create a success reply (`ok`)
    pub fn ok() -> Self {
        Self::new("ok")
    }

    /// Create a success reply carrying a detail (`ok <detail>`)
    pub fn ok_with(detail: impl Display) -> Self {
        Self::new(&format!("ok {detail}"))
    }

    /// Create a greeting reply, e.g. `ok DMTP`
    pub fn greeting(protocol: &str) -> Self {
        Self::ok_with(protocol)
    }

    /// Create a QUIT reply (`ok bye`)
    pub fn bye() -> Self {
        Self::new("ok bye")
    }

    /// Create an error reply (`error <message>`)
    pub fn error(message: impl Display) -> Self {
        Self::new(&format!("error {message}"))
    }

    /// The individual reply lines
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Format the reply for sending over the wire
    pub fn format(&self) -> String {
        let mut result = String::new();
        for line in &self.lines {
            result.push_str(line);
            result.push('\n');
        }
        result
    }

    /// Check if this is a success reply
    pub fn is_ok(&self) -> bool {
        self.lines[0] == "ok" || self.lines[0].starts_with("ok ")
    }

    /// Check if this is an error reply
    pub fn is_error(&self) -> bool {
        self.lines[0].starts_with("error")
    }

    /// Check if this reply ends the session
    pub fn is_bye(&self) -> bool {
        self.lines.len() == 1 && self.lines[0] == "ok bye"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_reply() {
        assert_eq!(Reply::ok().format(), "ok\n");
        assert_eq!(Reply::ok_with(2).format(), "ok 2\n");
        assert!(Reply::ok_with(2).is_ok());
    }

    #[test]
    fn test_greeting_reply() {
        assert_eq!(Reply::greeting("DMTP").lines(), ["ok DMTP"]);
    }

    #[test]
    fn test_bye_reply() {
        let reply = Reply::bye();
        assert!(reply.is_bye());
        assert!(reply.is_ok());
        assert!(!Reply::ok().is_bye());
    }

    #[test]
    fn test_error_reply() {
        let reply = Reply::error("command not supported");
        assert_eq!(reply.format(), "error command not supported\n");
        assert!(reply.is_error());
        assert!(!reply.is_ok());
    }

    #[test]
    fn test_multiline_format() {
        let reply = Reply::multiline(vec!["from a@b".to_owned(), "to c@d".to_owned()]);
        assert_eq!(reply.format(), "from a@b\nto c@d\n");
    }

    #[test]
    fn test_empty_multiline_is_ok() {
        assert_eq!(Reply::multiline(Vec::new()), Reply::ok());
    }

    #[test]
    fn test_okay_prefix_is_not_ok() {
        assert!(!Reply::new("okay").is_ok());
    }
}
