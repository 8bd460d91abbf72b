use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::select;
use tracing::{debug, error, info, warn};

use crate::application::errors::{RelayError, TransportError};
use crate::application::services::command_processor::{Applied, CommandProcessor};
use crate::application::services::provisioning::{declare_ingress, provision_binding};
use crate::domain::entities::message::RoutingHeader;
use crate::domain::entities::topology::{group_topic, COMMANDS, HUB};
use crate::domain::entities::CommandEnvelope;
use crate::domain::traits::{Broker, BrokerChannel, Delivery};
use crate::infrastructure::config::BrokerConfig;

/// Server side of the relay.
///
/// Consumes the `commands` and `hub` queues one message at a time, applies
/// commands through the [`CommandProcessor`] and re-publishes chat messages
/// to `group.<name>`. Every delivery is acknowledged whatever the outcome.
pub struct RelayWorker<B: Broker> {
    broker: B,
    processor: CommandProcessor,
    config: BrokerConfig,
}

impl<B: Broker> RelayWorker<B> {
    pub fn new(broker: B, processor: CommandProcessor, config: BrokerConfig) -> Self {
        Self {
            broker,
            processor,
            config,
        }
    }

    pub fn processor(&self) -> &CommandProcessor {
        &self.processor
    }

    /// Serve until `shutdown` resolves, reconnecting with backoff on transport errors
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), RelayError>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        let mut delay = self.config.retry_initial();

        loop {
            let connected = select! {
                _ = &mut shutdown => break,
                connected = self.connect() => connected,
            };

            match connected {
                Ok(channel) => {
                    delay = self.config.retry_initial();
                    info!("relay worker consuming '{}' and '{}'", COMMANDS, HUB);
                    match self.serve(channel.as_ref(), shutdown.as_mut()).await {
                        Ok(()) => break,
                        Err(err) => warn!(error = %err, "relay lost its broker channel, reconnecting"),
                    }
                }
                Err(err) => {
                    warn!(error = %err, retry_in = ?delay, "failed to connect to broker");
                    select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = next_delay(delay, self.config.retry_max());
                }
            }
        }

        info!("relay worker stopped");
        Ok(())
    }

    async fn connect(&self) -> Result<Box<dyn BrokerChannel>, TransportError> {
        let channel = self.broker.open_channel().await?;
        declare_ingress(channel.as_ref()).await?;
        Ok(channel)
    }

    async fn serve<F>(&mut self, channel: &dyn BrokerChannel, mut shutdown: Pin<&mut F>) -> Result<(), TransportError>
    where
        F: Future<Output = ()>,
    {
        loop {
            let delivery = select! {
                _ = &mut shutdown => return Ok(()),
                delivery = channel.receive(COMMANDS, None) => delivery?,
                delivery = channel.receive(HUB, None) => delivery?,
            };

            if let Some(delivery) = delivery {
                self.handle_delivery(channel, delivery).await;
            }
        }
    }

    /// Process one delivery from either ingress queue and acknowledge it
    pub async fn handle_delivery(&mut self, channel: &dyn BrokerChannel, delivery: Delivery) {
        match delivery.queue.as_str() {
            COMMANDS => match self.apply_command(channel, &delivery.body).await {
                Ok(applied) => info!("Command '{}' successfully completed", applied.kind),
                Err(RelayError::UnknownCommand(label)) => warn!("Unknown command: {}", label),
                Err(err) => error!(error = %err, "command failed"),
            },
            HUB => {
                if let Err(err) = self.relay_chat(channel, &delivery.body).await {
                    error!(error = %err, "failed to relay chat message");
                }
            }
            other => warn!(queue = other, "delivery from unexpected queue"),
        }

        if let Err(err) = channel.ack(&delivery).await {
            error!(error = %err, tag = delivery.tag, "failed to ack delivery");
        }
    }

    async fn apply_command(&mut self, channel: &dyn BrokerChannel, body: &[u8]) -> Result<Applied, RelayError> {
        let envelope: CommandEnvelope = serde_json::from_slice(body)?;
        debug!(command = %envelope.kind, group = %envelope.payload.group_name, "applying command");

        let applied = self.processor.apply(&envelope)?;
        if let Some(binding) = &applied.binding {
            provision_binding(channel, binding).await?;
            debug!(queue = %binding.destination, exchange = %binding.source, "inbox bound");
        }
        Ok(applied)
    }

    async fn relay_chat(&self, channel: &dyn BrokerChannel, body: &[u8]) -> Result<(), RelayError> {
        let header: RoutingHeader = serde_json::from_slice(body)?;
        let topic = group_topic(&header.group_name);

        channel.declare_exchange(&topic).await?;
        channel.publish(&topic, &topic, body).await?;
        debug!(topic = %topic, "chat message relayed");
        Ok(())
    }
}

fn next_delay(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::topology::{inbox_queue, INGRESS_ROUTING_KEY};
    use crate::domain::entities::{Binding, ChatMessage, CommandKind};
    use crate::infrastructure::broker::MemoryBroker;
    use crate::infrastructure::storage::InMemoryGroupRegistry;

    fn worker(broker: &MemoryBroker) -> RelayWorker<MemoryBroker> {
        RelayWorker::new(
            broker.clone(),
            CommandProcessor::new(InMemoryGroupRegistry::new()),
            BrokerConfig::default(),
        )
    }

    async fn ingress_channel(broker: &MemoryBroker) -> Box<dyn BrokerChannel> {
        let channel = broker.open_channel().await.unwrap();
        declare_ingress(channel.as_ref()).await.unwrap();
        channel
    }

    async fn take(channel: &dyn BrokerChannel, queue: &str) -> Delivery {
        channel
            .receive(queue, Some(Duration::from_millis(50)))
            .await
            .unwrap()
            .expect("queued delivery")
    }

    async fn send_command(channel: &dyn BrokerChannel, kind: CommandKind, group: &str, user: &str) {
        let body = serde_json::to_vec(&CommandEnvelope::new(kind, group, user)).unwrap();
        channel.publish(COMMANDS, INGRESS_ROUTING_KEY, &body).await.unwrap();
    }

    #[test]
    fn backoff_doubles_up_to_max() {
        let max = Duration::from_millis(300);
        assert_eq!(next_delay(Duration::from_millis(100), max), Duration::from_millis(200));
        assert_eq!(next_delay(Duration::from_millis(200), max), max);
        assert_eq!(next_delay(max, max), max);
    }

    #[tokio::test]
    async fn chat_message_is_relayed_unchanged() {
        let broker = MemoryBroker::new();
        let channel = ingress_channel(&broker).await;
        let mut worker = worker(&broker);

        provision_binding(channel.as_ref(), &Binding::inbox_to_group("bob", "X"))
            .await
            .unwrap();

        let body = br#"{"sender_username":"alice","timestamp":"10:00:00","group_name":"X","message":"hey","extra":true}"#;
        channel.publish(HUB, INGRESS_ROUTING_KEY, body).await.unwrap();
        let delivery = take(channel.as_ref(), HUB).await;
        worker.handle_delivery(channel.as_ref(), delivery).await;

        assert_eq!(broker.queue_depth(&inbox_queue("bob")), Some(1));
        let relayed = take(channel.as_ref(), &inbox_queue("bob")).await;
        assert_eq!(relayed.body, body.to_vec());
        assert_eq!(relayed.exchange, "group.X");
        assert_eq!(relayed.routing_key, "group.X");
    }

    #[tokio::test]
    async fn malformed_chat_is_acked_and_dropped() {
        let broker = MemoryBroker::new();
        let channel = ingress_channel(&broker).await;
        let mut worker = worker(&broker);

        channel.publish(HUB, INGRESS_ROUTING_KEY, b"{not json").await.unwrap();
        channel.publish(HUB, INGRESS_ROUTING_KEY, br#"{"message":"no group"}"#).await.unwrap();
        for _ in 0..2 {
            let delivery = take(channel.as_ref(), HUB).await;
            worker.handle_delivery(channel.as_ref(), delivery).await;
        }

        assert_eq!(broker.unacked_count(), 0);
        assert_eq!(broker.queue_depth(HUB), Some(0));
    }

    #[tokio::test]
    async fn join_command_binds_inbox() {
        let broker = MemoryBroker::new();
        let channel = ingress_channel(&broker).await;
        let mut worker = worker(&broker);

        send_command(channel.as_ref(), CommandKind::CreateGroup, "team", "alice").await;
        send_command(channel.as_ref(), CommandKind::AppendUserToGroup, "team", "bob").await;
        for _ in 0..2 {
            let delivery = take(channel.as_ref(), COMMANDS).await;
            worker.handle_delivery(channel.as_ref(), delivery).await;
        }

        let bindings = channel.bindings().await.unwrap();
        assert!(bindings.contains(&Binding::inbox_to_group("alice", "team")));
        assert!(bindings.contains(&Binding::inbox_to_group("bob", "team")));
        let team = worker.processor().registry().find_group("team").unwrap().clone();
        assert_eq!(team.usernames(), vec!["bob"]);
        assert_eq!(broker.unacked_count(), 0);
    }

    #[tokio::test]
    async fn command_without_timestamp_is_applied() {
        let broker = MemoryBroker::new();
        let channel = ingress_channel(&broker).await;
        let mut worker = worker(&broker);

        let body = br#"{"type":"create_group","payload":{"group_name":"team","username":"alice"}}"#;
        channel.publish(COMMANDS, INGRESS_ROUTING_KEY, body).await.unwrap();
        let delivery = take(channel.as_ref(), COMMANDS).await;
        worker.handle_delivery(channel.as_ref(), delivery).await;

        assert_eq!(worker.processor().registry().fetch_groups().len(), 1);
        assert!(channel.bindings().await.unwrap().contains(&Binding::inbox_to_group("alice", "team")));
        assert_eq!(broker.unacked_count(), 0);
    }

    #[tokio::test]
    async fn unknown_command_is_acked_without_mutation() {
        let broker = MemoryBroker::new();
        let channel = ingress_channel(&broker).await;
        let mut worker = worker(&broker);

        let body = br#"{"type":"rename_group","timestamp":"2024-01-01T00:00:00","payload":{"group_name":"team","username":"alice"}}"#;
        channel.publish(COMMANDS, INGRESS_ROUTING_KEY, body).await.unwrap();
        let delivery = take(channel.as_ref(), COMMANDS).await;
        worker.handle_delivery(channel.as_ref(), delivery).await;

        assert!(worker.processor().registry().fetch_groups().is_empty());
        assert_eq!(broker.unacked_count(), 0);
        assert!(channel.bindings().await.unwrap().iter().all(|b| b.source != "group.team"));
    }

    #[tokio::test]
    async fn failed_join_is_acked_without_binding() {
        let broker = MemoryBroker::new();
        let channel = ingress_channel(&broker).await;
        let mut worker = worker(&broker);

        send_command(channel.as_ref(), CommandKind::AppendUserToGroup, "ghost", "alice").await;
        let delivery = take(channel.as_ref(), COMMANDS).await;
        worker.handle_delivery(channel.as_ref(), delivery).await;

        assert_eq!(broker.unacked_count(), 0);
        assert!(!channel.bindings().await.unwrap().contains(&Binding::inbox_to_group("alice", "ghost")));
    }

    #[tokio::test]
    async fn run_until_serves_and_stops() {
        let broker = MemoryBroker::new();
        let channel = ingress_channel(&broker).await;
        provision_binding(channel.as_ref(), &Binding::inbox_to_group("bob", "team"))
            .await
            .unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let mut relay = worker(&broker);
        let handle = tokio::spawn(async move {
            relay
                .run_until(async move {
                    let _ = stop_rx.await;
                })
                .await
        });

        let message = ChatMessage::new("alice", "team", "first");
        let body = serde_json::to_vec(&message).unwrap();
        channel.publish(HUB, INGRESS_ROUTING_KEY, &body).await.unwrap();

        let relayed = channel
            .receive(&inbox_queue("bob"), Some(Duration::from_secs(1)))
            .await
            .unwrap()
            .expect("relayed message");
        assert_eq!(relayed.body, body);

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn closed_broker_does_not_block_shutdown() {
        let broker = MemoryBroker::new();
        broker.close();
        let mut relay = worker(&broker);

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            relay.run_until(tokio::time::sleep(Duration::from_millis(50))),
        )
        .await;

        assert!(matches!(result, Ok(Ok(()))));
    }

    fn fast_retry() -> BrokerConfig {
        BrokerConfig {
            retry_initial_ms: 10,
            retry_max_ms: 40,
            ..BrokerConfig::default()
        }
    }

    fn spawn_relay(
        broker: &MemoryBroker,
        config: BrokerConfig,
    ) -> (
        tokio::sync::oneshot::Sender<()>,
        tokio::task::JoinHandle<Result<(), RelayError>>,
    ) {
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let mut relay = RelayWorker::new(
            broker.clone(),
            CommandProcessor::new(InMemoryGroupRegistry::new()),
            config,
        );
        let handle = tokio::spawn(async move {
            relay
                .run_until(async move {
                    let _ = stop_rx.await;
                })
                .await
        });
        (stop_tx, handle)
    }

    async fn publish_chat(channel: &dyn BrokerChannel, text: &str) -> Vec<u8> {
        let body = serde_json::to_vec(&ChatMessage::new("alice", "team", text)).unwrap();
        channel.publish(HUB, INGRESS_ROUTING_KEY, &body).await.unwrap();
        body
    }

    async fn expect_relayed(channel: &dyn BrokerChannel, body: &[u8]) {
        let relayed = channel
            .receive(&inbox_queue("bob"), Some(Duration::from_secs(2)))
            .await
            .unwrap()
            .expect("relayed message");
        channel.ack(&relayed).await.unwrap();
        assert_eq!(relayed.body, body);
    }

    #[tokio::test]
    async fn relay_retries_until_broker_accepts_channels() {
        let broker = MemoryBroker::new();
        let channel = ingress_channel(&broker).await;
        provision_binding(channel.as_ref(), &Binding::inbox_to_group("bob", "team"))
            .await
            .unwrap();

        broker.fail_next_opens(3);
        let (stop_tx, handle) = spawn_relay(&broker, fast_retry());

        let body = publish_chat(channel.as_ref(), "after retries").await;
        expect_relayed(channel.as_ref(), &body).await;

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn relay_resumes_after_broker_outage() {
        let broker = MemoryBroker::new();
        let channel = ingress_channel(&broker).await;
        provision_binding(channel.as_ref(), &Binding::inbox_to_group("bob", "team"))
            .await
            .unwrap();

        let (stop_tx, handle) = spawn_relay(&broker, fast_retry());
        let before = publish_chat(channel.as_ref(), "before").await;
        expect_relayed(channel.as_ref(), &before).await;

        broker.close();
        drop(channel);
        tokio::time::sleep(Duration::from_millis(50)).await;
        broker.reopen();

        let channel = broker.open_channel().await.unwrap();
        let after = publish_chat(channel.as_ref(), "after").await;
        expect_relayed(channel.as_ref(), &after).await;
        assert_eq!(broker.queue_depth(HUB), Some(0));

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
