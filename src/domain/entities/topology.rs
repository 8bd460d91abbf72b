//! Broker topology names shared by the relay and its clients

/// Exchange and queue receiving administrative commands
pub const COMMANDS: &str = "commands";

/// Exchange and queue receiving chat messages from clients
pub const HUB: &str = "hub";

/// Routing key used on the ingress exchanges
pub const INGRESS_ROUTING_KEY: &str = "";

const GROUP_PREFIX: &str = "group.";
const INBOX_PREFIX: &str = "username.";

/// Broadcast exchange of a group; also the routing key its messages carry
pub fn group_topic(group_name: &str) -> String {
    format!("{GROUP_PREFIX}{group_name}")
}

/// Private inbox queue of a user
pub fn inbox_queue(username: &str) -> String {
    format!("{INBOX_PREFIX}{username}")
}

/// A routing rule from an exchange to a queue
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binding {
    pub source: String,
    pub destination: String,
    pub routing_key: String,
}

impl Binding {
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            routing_key: routing_key.into(),
        }
    }

    /// Binding that delivers a group's broadcasts into a user's inbox
    pub fn inbox_to_group(username: &str, group_name: &str) -> Self {
        let topic = group_topic(group_name);
        Self::new(topic.clone(), inbox_queue(username), topic)
    }

    /// Group name if this binding feeds `username`'s inbox from a group topic
    pub fn group_for_inbox(&self, username: &str) -> Option<&str> {
        let user = self.destination.strip_prefix(INBOX_PREFIX)?;
        if user != username {
            return None;
        }
        self.source
            .strip_prefix(GROUP_PREFIX)
            .filter(|group| !group.is_empty())
    }
}
