use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::application::errors::RelayError;
use crate::application::services::provisioning::provision_binding;
use crate::domain::entities::topology::inbox_queue;
use crate::domain::entities::{Binding, ChatMessage};
use crate::domain::traits::Broker;

/// Callback receiving rendered chat lines for display
pub type Deliver = Arc<dyn Fn(String) + Send + Sync>;

/// Captured selection a drain task was scheduled for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainTicket {
    pub generation: u64,
    pub group: String,
}

/// What a single drain step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Nothing arrived within the receive wait
    Empty,
    /// Message of the selected group, passed to the callback
    Delivered,
    /// Message of another group, acked and dropped
    Discarded,
    /// Undecodable message, acked and dropped
    Malformed,
}

#[derive(Debug, Default)]
struct Selection {
    group: Option<String>,
    generation: u64,
}

struct InboxInner<B> {
    username: String,
    queue: String,
    broker: B,
    receive_timeout: Duration,
    selection: Mutex<Selection>,
}

/// A user's private inbox, filtered down to the selected group.
///
/// Bindings are additive: switching groups binds the inbox to the new topic
/// but never unbinds the old one, so traffic of earlier groups keeps
/// arriving and is discarded here.
pub struct ClientInbox<B> {
    inner: Arc<InboxInner<B>>,
}

impl<B> Clone for ClientInbox<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Broker + 'static> ClientInbox<B> {
    pub fn new(broker: B, username: impl Into<String>, receive_timeout: Duration) -> Self {
        let username = username.into();
        Self {
            inner: Arc::new(InboxInner {
                queue: inbox_queue(&username),
                username,
                broker,
                receive_timeout,
                selection: Mutex::new(Selection::default()),
            }),
        }
    }

    pub fn selected_group(&self) -> Option<String> {
        self.selection().group.clone()
    }

    /// Whether a drain task holding `ticket` may still run
    pub fn is_current(&self, ticket: &DrainTicket) -> bool {
        self.selection().generation == ticket.generation
    }

    /// Switch the selection to `group` and bind the inbox to its topic.
    ///
    /// The switch takes effect before the binding is made, so messages of
    /// the previous group stop being delivered immediately.
    pub async fn select_group(&self, group: &str) -> Result<DrainTicket, RelayError> {
        let ticket = {
            let mut selection = self.selection();
            selection.generation += 1;
            selection.group = Some(group.to_string());
            DrainTicket {
                generation: selection.generation,
                group: group.to_string(),
            }
        };

        let channel = self.inner.broker.open_channel().await?;
        provision_binding(channel.as_ref(), &Binding::inbox_to_group(&self.inner.username, group)).await?;
        debug!(user = %self.inner.username, group, generation = ticket.generation, "group selected");
        Ok(ticket)
    }

    /// Receive at most one inbox message and ack it.
    ///
    /// The message reaches `deliver` only if it belongs to the group selected
    /// at the moment it is handled.
    pub async fn drain_step(&self, deliver: &Deliver) -> Result<DrainOutcome, RelayError> {
        let channel = self.inner.broker.open_channel().await?;
        let Some(delivery) = channel
            .receive(&self.inner.queue, Some(self.inner.receive_timeout))
            .await?
        else {
            return Ok(DrainOutcome::Empty);
        };

        let outcome = match serde_json::from_slice::<ChatMessage>(&delivery.body) {
            Ok(message) => {
                if self.selected_group().as_deref() == Some(message.group_name.as_str()) {
                    deliver(message.render());
                    DrainOutcome::Delivered
                } else {
                    debug!(group = %message.group_name, "discarding message of unselected group");
                    DrainOutcome::Discarded
                }
            }
            Err(err) => {
                warn!(error = %err, queue = %self.inner.queue, "dropping malformed inbox message");
                DrainOutcome::Malformed
            }
        };

        channel.ack(&delivery).await?;
        Ok(outcome)
    }

    /// Run drain steps every `interval` until `ticket` goes stale
    pub async fn drain_loop(&self, ticket: DrainTicket, interval: Duration, deliver: Deliver) {
        loop {
            tokio::time::sleep(interval).await;
            if !self.is_current(&ticket) {
                debug!(group = %ticket.group, generation = ticket.generation, "drain task superseded");
                break;
            }
            if let Err(err) = self.drain_step(&deliver).await {
                warn!(error = %err, group = %ticket.group, "inbox drain step failed");
            }
        }
    }

    pub fn spawn_drain_loop(&self, ticket: DrainTicket, interval: Duration, deliver: Deliver) -> JoinHandle<()> {
        let inbox = self.clone();
        tokio::spawn(async move { inbox.drain_loop(ticket, interval, deliver).await })
    }

    fn selection(&self) -> MutexGuard<'_, Selection> {
        self.inner.selection.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
