//! In-process broker with direct exchanges, named queues and manual acks.
//!
//! Deliveries not acknowledged by the time their channel is dropped go back
//! to the front of their queue.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace};

use crate::application::errors::TransportError;
use crate::domain::entities::Binding;
use crate::domain::traits::{Broker, BrokerChannel, Delivery};

/// Shared handle to an in-memory broker. Clones talk to the same broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

#[derive(Default)]
struct BrokerInner {
    state: Mutex<BrokerState>,
    open_channels: AtomicUsize,
    failing_opens: AtomicUsize,
    next_channel: AtomicU64,
    next_tag: AtomicU64,
    closed: AtomicBool,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashSet<String>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<Binding>,
    unacked: HashMap<u64, Unacked>,
}

#[derive(Default)]
struct QueueState {
    messages: VecDeque<Enqueued>,
    ready: Arc<Notify>,
}

struct Enqueued {
    exchange: String,
    routing_key: String,
    body: Vec<u8>,
}

struct Unacked {
    channel: u64,
    delivery: Delivery,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse new channels, fail open ones and wake every waiting receiver.
    ///
    /// Declared queues, bindings and queued messages survive until [`reopen`](Self::reopen).
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let state = self.state();
        for queue in state.queues.values() {
            queue.ready.notify_waiters();
            queue.ready.notify_one();
        }
        debug!("memory broker closed");
    }

    /// Accept channels again after [`close`](Self::close)
    pub fn reopen(&self) {
        self.inner.closed.store(false, Ordering::SeqCst);
        debug!("memory broker reopened");
    }

    /// Make the next `count` calls to `open_channel` fail with `Closed`
    pub fn fail_next_opens(&self, count: usize) {
        self.inner.failing_opens.store(count, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Channels currently open against this broker
    pub fn open_channels(&self) -> usize {
        self.inner.open_channels.load(Ordering::SeqCst)
    }

    /// Received deliveries not yet acknowledged
    pub fn unacked_count(&self) -> usize {
        self.state().unacked.len()
    }

    /// Messages waiting in a queue, or `None` if it was never declared
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.state().queues.get(queue).map(|q| q.messages.len())
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    fn take_injected_failure(&self) -> bool {
        self.inner
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn requeue_unacked(&self, channel: u64) {
        let mut state = self.state();
        let mut returned: Vec<Delivery> = Vec::new();
        state.unacked.retain(|_, pending| {
            if pending.channel == channel {
                returned.push(pending.delivery.clone());
                false
            } else {
                true
            }
        });
        if returned.is_empty() {
            return;
        }

        // Highest tag first so the oldest delivery ends up at the head
        returned.sort_by(|a, b| b.tag.cmp(&a.tag));
        debug!(channel, count = returned.len(), "requeueing unacked deliveries");
        for delivery in returned {
            if let Some(queue) = state.queues.get_mut(&delivery.queue) {
                queue.messages.push_front(Enqueued {
                    exchange: delivery.exchange,
                    routing_key: delivery.routing_key,
                    body: delivery.body,
                });
                queue.ready.notify_one();
            }
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, TransportError> {
        self.ensure_open()?;
        if self.take_injected_failure() {
            return Err(TransportError::Closed);
        }
        self.inner.open_channels.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryChannel {
            broker: self.clone(),
            id: self.inner.next_channel.fetch_add(1, Ordering::SeqCst),
        }))
    }
}

/// Channel on a [`MemoryBroker`].
///
/// Dropping it releases the slot and requeues whatever it received but did
/// not acknowledge.
pub struct MemoryChannel {
    broker: MemoryBroker,
    id: u64,
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.broker.requeue_unacked(self.id);
        self.broker.inner.open_channels.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_exchange(&self, name: &str) -> Result<(), TransportError> {
        self.broker.ensure_open()?;
        let mut state = self.broker.state();
        if state.exchanges.insert(name.to_string()) {
            debug!(exchange = name, "exchange declared");
        }
        Ok(())
    }

    async fn declare_queue(&self, name: &str) -> Result<(), TransportError> {
        self.broker.ensure_open()?;
        let mut state = self.broker.state();
        if !state.queues.contains_key(name) {
            state.queues.insert(name.to_string(), QueueState::default());
            debug!(queue = name, "queue declared");
        }
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), TransportError> {
        self.broker.ensure_open()?;
        let mut state = self.broker.state();
        if !state.queues.contains_key(queue) {
            return Err(TransportError::QueueNotFound(queue.to_string()));
        }
        if !state.exchanges.contains(exchange) {
            return Err(TransportError::ExchangeNotFound(exchange.to_string()));
        }

        let binding = Binding::new(exchange, queue, routing_key);
        if !state.bindings.contains(&binding) {
            debug!(queue, exchange, routing_key, "queue bound");
            state.bindings.push(binding);
        }
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<(), TransportError> {
        self.broker.ensure_open()?;
        let mut state = self.broker.state();
        if !state.exchanges.contains(exchange) {
            return Err(TransportError::ExchangeNotFound(exchange.to_string()));
        }

        let targets: Vec<String> = state
            .bindings
            .iter()
            .filter(|b| b.source == exchange && b.routing_key == routing_key)
            .map(|b| b.destination.clone())
            .collect();

        if targets.is_empty() {
            trace!(exchange, routing_key, "message unroutable, dropped");
        }

        for target in targets {
            if let Some(queue) = state.queues.get_mut(&target) {
                queue.messages.push_back(Enqueued {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    body: body.to_vec(),
                });
                queue.ready.notify_one();
            }
        }
        Ok(())
    }

    async fn receive(&self, queue: &str, wait: Option<Duration>) -> Result<Option<Delivery>, TransportError> {
        let deadline = wait.map(|w| Instant::now() + w);

        loop {
            self.broker.ensure_open()?;

            let ready = {
                let mut state = self.broker.state();
                let queue_state = state
                    .queues
                    .get_mut(queue)
                    .ok_or_else(|| TransportError::QueueNotFound(queue.to_string()))?;

                match queue_state.messages.pop_front() {
                    Some(message) => {
                        let delivery = Delivery {
                            tag: self.broker.inner.next_tag.fetch_add(1, Ordering::SeqCst) + 1,
                            queue: queue.to_string(),
                            exchange: message.exchange,
                            routing_key: message.routing_key,
                            body: message.body,
                        };
                        state.unacked.insert(
                            delivery.tag,
                            Unacked {
                                channel: self.id,
                                delivery: delivery.clone(),
                            },
                        );
                        return Ok(Some(delivery));
                    }
                    None => Arc::clone(&queue_state.ready),
                }
            };

            match deadline {
                None => ready.notified().await,
                Some(deadline) => {
                    if timeout_at(deadline, ready.notified()).await.is_err() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError> {
        self.broker
            .state()
            .unacked
            .remove(&delivery.tag)
            .map(|_| ())
            .ok_or(TransportError::UnknownDelivery(delivery.tag))
    }

    async fn bindings(&self) -> Result<Vec<Binding>, TransportError> {
        self.broker.ensure_open()?;
        Ok(self.broker.state().bindings.clone())
    }
}
