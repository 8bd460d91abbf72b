use std::time::Duration;

use async_trait::async_trait;

use crate::application::errors::TransportError;
use crate::domain::entities::Binding;

/// A message taken from a queue and awaiting acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: u64,
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
}

/// Broker trait - entry point of a message broker transport
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a channel. The channel is released when dropped.
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, TransportError>;
}

/// A scoped session on the broker.
///
/// Exchanges route directly: a publish reaches every queue bound with an
/// equal routing key, and unroutable messages are dropped.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Idempotent
    async fn declare_exchange(&self, name: &str) -> Result<(), TransportError>;

    /// Idempotent
    async fn declare_queue(&self, name: &str) -> Result<(), TransportError>;

    /// Idempotent. Both ends must already be declared.
    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), TransportError>;

    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<(), TransportError>;

    /// Take at most one message from `queue`.
    ///
    /// With `wait: None` this suspends until a message arrives; otherwise it
    /// returns `Ok(None)` once the wait elapses. Cancel-safe: a dropped call
    /// never loses a message.
    async fn receive(&self, queue: &str, wait: Option<Duration>) -> Result<Option<Delivery>, TransportError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError>;

    /// Current binding table
    async fn bindings(&self) -> Result<Vec<Binding>, TransportError>;
}
