use chrono::Local;
use serde::{Deserialize, Serialize};

/// Wire format of the chat clock, e.g. `14:03:59`
pub const CHAT_TIMESTAMP_FORMAT: &str = "%H:%M:%S";

/// A chat message as published on `hub` and relayed to `group.<name>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender_username: String,
    pub timestamp: String,
    pub group_name: String,
    pub message: String,
}

impl ChatMessage {
    /// Build a message stamped with the local wall clock
    pub fn new(
        sender_username: impl Into<String>,
        group_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            sender_username: sender_username.into(),
            timestamp: now_hms(),
            group_name: group_name.into(),
            message: message.into(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    /// Line shown in the chat pane: `[HH:MM:SS] sender:text`
    pub fn render(&self) -> String {
        format!("[{}] {}:{}", self.timestamp, self.sender_username, self.message)
    }
}

/// Only the routing field of a chat message.
///
/// The relay decodes just this much so the body it forwards stays byte-identical.
#[derive(Debug, Deserialize)]
pub struct RoutingHeader {
    pub group_name: String,
}

pub fn now_hms() -> String {
    Local::now().format(CHAT_TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_matches_chat_pane_format() {
        let msg = ChatMessage::new("alice", "team", "hello").with_timestamp("12:00:01");
        assert_eq!(msg.render(), "[12:00:01] alice:hello");
    }

    #[test]
    fn decodes_wire_json() {
        let raw = r#"{"sender_username":"bob","timestamp":"09:15:00","group_name":"team","message":"hi"}"#;
        let msg: ChatMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.sender_username, "bob");
        assert_eq!(msg.group_name, "team");
    }

    #[test]
    fn routing_header_ignores_other_fields() {
        let raw = r#"{"group_name":"ops","extra":[1,2,3]}"#;
        let header: RoutingHeader = serde_json::from_str(raw).unwrap();
        assert_eq!(header.group_name, "ops");
    }

    #[test]
    fn timestamp_has_clock_shape() {
        let ts = now_hms();
        assert_eq!(ts.len(), 8);
        assert_eq!(ts.matches(':').count(), 2);
    }
}
