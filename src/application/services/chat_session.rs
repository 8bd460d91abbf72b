use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::application::errors::RelayError;
use crate::application::messaging::{Input, InputParser};
use crate::application::services::client_inbox::{ClientInbox, Deliver};
use crate::application::services::provisioning::declare_ingress;
use crate::domain::entities::message::now_hms;
use crate::domain::entities::topology::{COMMANDS, HUB, INGRESS_ROUTING_KEY};
use crate::domain::entities::{ChatMessage, CommandEnvelope, CommandKind};
use crate::domain::traits::Broker;
use crate::infrastructure::config::ClientConfig;

/// Whether the console loop keeps going after a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    Continue,
    Quit,
}

const HELP: &[&str] = &[
    "/create_group <group_name> - create new group",
    "/append_user_to_group <group_name> - join to existed group (alias /join)",
    "/delete_group <group_name> - delete a group",
    "/open <group_name> - show messages of a group",
    "/groups - list your groups",
    "/quit - leave the chat",
];

/// Client-side orchestration of one user's chat.
///
/// Publishes chat messages and commands, and keeps one inbox drain task
/// running for the selected group.
pub struct ChatSession<B: Broker + Clone + 'static> {
    username: String,
    broker: B,
    inbox: ClientInbox<B>,
    deliver: Deliver,
    drain_interval: Duration,
    parser: InputParser,
    drain_task: Option<JoinHandle<()>>,
}

impl<B: Broker + Clone + 'static> ChatSession<B> {
    pub fn new(broker: B, config: &ClientConfig, deliver: Deliver) -> Self {
        Self {
            username: config.username.clone(),
            inbox: ClientInbox::new(broker.clone(), config.username.clone(), config.receive_timeout()),
            broker,
            deliver,
            drain_interval: config.drain_interval(),
            parser: InputParser::default(),
            drain_task: None,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn selected_group(&self) -> Option<String> {
        self.inbox.selected_group()
    }

    /// Make `group` the visible group and start draining the inbox for it.
    ///
    /// The drain task of the previous selection is aborted.
    pub async fn select_group(&mut self, group: &str) -> Result<(), RelayError> {
        let ticket = self.inbox.select_group(group).await?;
        let task = self
            .inbox
            .spawn_drain_loop(ticket, self.drain_interval, self.deliver.clone());
        if let Some(previous) = self.drain_task.replace(task) {
            previous.abort();
        }
        info!(user = %self.username, group, "group opened");
        Ok(())
    }

    /// Publish `text` to the selected group via the hub
    pub async fn send(&self, text: &str) -> Result<ChatMessage, RelayError> {
        let group = self.selected_group().ok_or(RelayError::NoGroupSelected)?;
        let message = ChatMessage::new(&self.username, group, text);
        self.publish(HUB, &serde_json::to_vec(&message)?).await?;
        Ok(message)
    }

    /// Publish an administrative command on behalf of this user
    pub async fn issue_command(&self, kind: CommandKind, group: &str) -> Result<(), RelayError> {
        let envelope = CommandEnvelope::new(kind, group, &self.username);
        self.publish(COMMANDS, &serde_json::to_vec(&envelope)?).await?;
        debug!(command = %kind, group, "command published");
        Ok(())
    }

    /// Groups this user's inbox is bound to, from the broker binding table
    pub async fn fetch_groups(&self) -> Result<Vec<String>, RelayError> {
        let channel = self.broker.open_channel().await?;
        let mut groups: Vec<String> = Vec::new();
        for binding in channel.bindings().await? {
            if let Some(group) = binding.group_for_inbox(&self.username) {
                if !groups.iter().any(|g| g == group) {
                    groups.push(group.to_string());
                }
            }
        }
        Ok(groups)
    }

    /// Handle one line typed by the user
    pub async fn handle_line(&mut self, line: &str) -> Result<SessionControl, RelayError> {
        match self.parser.parse(line) {
            Input::Empty => {}
            Input::Chat(text) => match self.send(&text).await {
                Err(RelayError::NoGroupSelected) => {
                    self.show("Open a group first with /open <group_name>".to_string())
                }
                other => {
                    other?;
                }
            },
            Input::Command { name, args } => return self.execute(&name, &args).await,
        }
        Ok(SessionControl::Continue)
    }

    async fn execute(&mut self, name: &str, args: &[String]) -> Result<SessionControl, RelayError> {
        match name {
            "quit" | "exit" => return Ok(SessionControl::Quit),
            "help" => HELP.iter().for_each(|line| self.show(line.to_string())),
            "groups" => {
                let groups = self.fetch_groups().await?;
                if groups.is_empty() {
                    self.show("You are not in any group yet".to_string());
                } else {
                    self.show(format!("Groups: {}", groups.join(", ")));
                }
            }
            "open" => match args.first() {
                Some(group) => {
                    self.select_group(group).await?;
                    self.show(format!("Opened group {}", group));
                }
                None => self.show("Usage: /open <group_name>".to_string()),
            },
            other => {
                let kind = match other {
                    "join" => Some(CommandKind::AppendUserToGroup),
                    label => label.parse::<CommandKind>().ok(),
                };
                match (kind, args.first()) {
                    (Some(kind), Some(group)) => {
                        // Shown before the relay has applied anything; failures only reach its logs
                        self.show(format!("[{}] Command {} executed with args {:?}", now_hms(), name, args));
                        self.issue_command(kind, group).await?;
                    }
                    (Some(kind), None) => self.show(format!("Usage: /{} <group_name>", kind)),
                    (None, _) => self.show(format!("Unknown command: /{}", other)),
                }
            }
        }
        Ok(SessionControl::Continue)
    }

    async fn publish(&self, exchange: &str, body: &[u8]) -> Result<(), RelayError> {
        let channel = self.broker.open_channel().await?;
        declare_ingress(channel.as_ref()).await?;
        channel.publish(exchange, INGRESS_ROUTING_KEY, body).await?;
        Ok(())
    }

    fn show(&self, line: String) {
        (self.deliver)(line)
    }
}

impl<B: Broker + Clone + 'static> Drop for ChatSession<B> {
    fn drop(&mut self) {
        if let Some(task) = self.drain_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::domain::entities::Binding;
    use crate::domain::traits::BrokerChannel;
    use crate::infrastructure::broker::MemoryBroker;

    fn session(broker: &MemoryBroker, username: &str) -> (ChatSession<MemoryBroker>, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&seen);
        let config = ClientConfig {
            username: username.to_string(),
            drain_interval_ms: 5,
            receive_timeout_ms: 5,
        };
        let deliver: Deliver = Arc::new(move |line: String| sink.lock().unwrap().push(line));
        (ChatSession::new(broker.clone(), &config, deliver), seen)
    }

    async fn take_json(channel: &dyn BrokerChannel, queue: &str) -> serde_json::Value {
        let delivery = channel
            .receive(queue, Some(Duration::from_millis(50)))
            .await
            .unwrap()
            .expect("published message");
        serde_json::from_slice(&delivery.body).unwrap()
    }

    #[tokio::test]
    async fn send_requires_selection() {
        let broker = MemoryBroker::new();
        let (session, _) = session(&broker, "alice");
        assert!(matches!(session.send("hi").await, Err(RelayError::NoGroupSelected)));
    }

    #[tokio::test]
    async fn send_publishes_to_hub() {
        let broker = MemoryBroker::new();
        let (mut session, _) = session(&broker, "alice");
        session.select_group("team").await.unwrap();

        let sent = session.send("hello").await.unwrap();

        let channel = broker.open_channel().await.unwrap();
        let body = take_json(channel.as_ref(), HUB).await;
        assert_eq!(body["sender_username"], "alice");
        assert_eq!(body["group_name"], "team");
        assert_eq!(body["message"], "hello");
        assert_eq!(body["timestamp"], sent.timestamp.as_str());
    }

    #[tokio::test]
    async fn command_line_publishes_envelope_and_acknowledges() {
        let broker = MemoryBroker::new();
        let (mut session, seen) = session(&broker, "alice");

        let control = session.handle_line("/join team").await.unwrap();
        assert_eq!(control, SessionControl::Continue);

        let channel = broker.open_channel().await.unwrap();
        let body = take_json(channel.as_ref(), COMMANDS).await;
        assert_eq!(body["type"], "append_user_to_group");
        assert_eq!(body["payload"]["group_name"], "team");
        assert_eq!(body["payload"]["username"], "alice");

        let lines = seen.lock().unwrap().clone();
        assert!(lines[0].ends_with("Command join executed with args [\"team\"]"));
    }

    #[tokio::test]
    async fn unknown_and_incomplete_commands_publish_nothing() {
        let broker = MemoryBroker::new();
        let (mut session, seen) = session(&broker, "alice");

        session.handle_line("/rename team").await.unwrap();
        session.handle_line("/create_group").await.unwrap();

        assert_eq!(broker.queue_depth(COMMANDS), None);
        let lines = seen.lock().unwrap().clone();
        assert_eq!(lines, vec!["Unknown command: /rename", "Usage: /create_group <group_name>"]);
    }

    #[tokio::test]
    async fn fetch_groups_reads_own_bindings() {
        let broker = MemoryBroker::new();
        let (session, _) = session(&broker, "alice");
        let channel = broker.open_channel().await.unwrap();
        for binding in [
            Binding::inbox_to_group("alice", "team"),
            Binding::inbox_to_group("bob", "ops"),
            Binding::inbox_to_group("alice", "random"),
        ] {
            crate::application::services::provisioning::provision_binding(channel.as_ref(), &binding)
                .await
                .unwrap();
        }

        assert_eq!(session.fetch_groups().await.unwrap(), vec!["team", "random"]);
    }

    #[tokio::test]
    async fn quit_ends_session() {
        let broker = MemoryBroker::new();
        let (mut session, _) = session(&broker, "alice");
        assert_eq!(session.handle_line("/quit").await.unwrap(), SessionControl::Quit);
    }

    #[tokio::test]
    async fn chat_without_group_prompts_user() {
        let broker = MemoryBroker::new();
        let (mut session, seen) = session(&broker, "alice");
        session.handle_line("hello?").await.unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["Open a group first with /open <group_name>".to_string()]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reselecting_group_delivers_each_message_once_in_order() {
        let broker = MemoryBroker::new();
        let (mut session, seen) = session(&broker, "alice");
        session.select_group("team").await.unwrap();

        let channel = broker.open_channel().await.unwrap();
        let topic = crate::domain::entities::topology::group_topic("team");
        let mut expected = Vec::new();
        for i in 0..6 {
            let message = ChatMessage::new("bob", "team", format!("m{}", i));
            channel
                .publish(&topic, &topic, &serde_json::to_vec(&message).unwrap())
                .await
                .unwrap();
            expected.push(message.render());
            session.select_group("team").await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            while seen.lock().unwrap().len() < expected.len() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("all messages delivered");
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*seen.lock().unwrap(), expected);
        assert_eq!(broker.queue_depth("username.alice"), Some(0));
    }
}
