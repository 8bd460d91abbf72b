use std::fmt;
use std::str::FromStr;

use chrono::Local;
use serde::{Deserialize, Serialize};

/// Administrative commands understood by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    CreateGroup,
    AppendUserToGroup,
    DeleteGroup,
}

impl CommandKind {
    pub const ALL: [CommandKind; 3] = [
        CommandKind::CreateGroup,
        CommandKind::AppendUserToGroup,
        CommandKind::DeleteGroup,
    ];

    /// Label carried in the `type` field on the wire
    pub fn label(&self) -> &'static str {
        match self {
            CommandKind::CreateGroup => "create_group",
            CommandKind::AppendUserToGroup => "append_user_to_group",
            CommandKind::DeleteGroup => "delete_group",
        }
    }

    /// Whether a successful command leaves the sender's inbox bound to the group
    pub fn provisions_binding(&self) -> bool {
        matches!(self, CommandKind::CreateGroup | CommandKind::AppendUserToGroup)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for CommandKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandKind::ALL
            .into_iter()
            .find(|kind| kind.label() == s)
            .ok_or_else(|| s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPayload {
    pub group_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// A command as published on the `commands` exchange.
///
/// `kind` stays a raw string so that unknown labels still decode and can be
/// reported as unknown rather than malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    /// Informational only; absent on hand-written commands
    #[serde(default)]
    pub timestamp: String,
    pub payload: CommandPayload,
}

impl CommandEnvelope {
    pub fn new(kind: CommandKind, group_name: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            kind: kind.label().to_string(),
            timestamp: Local::now().to_rfc3339(),
            payload: CommandPayload {
                group_name: group_name.into(),
                username: Some(username.into()),
            },
        }
    }

    pub fn parsed_kind(&self) -> Option<CommandKind> {
        self.kind.parse().ok()
    }
}
