//! Declarations that make the relay topology exist on a broker

use crate::application::errors::TransportError;
use crate::domain::entities::topology::{COMMANDS, HUB, INGRESS_ROUTING_KEY};
use crate::domain::entities::Binding;
use crate::domain::traits::BrokerChannel;

/// Declare the `commands` and `hub` exchanges with their same-named queues.
///
/// Idempotent, so clients may call it before the relay is up and their
/// messages wait in the queue instead of being dropped.
pub async fn declare_ingress(channel: &dyn BrokerChannel) -> Result<(), TransportError> {
    for name in [COMMANDS, HUB] {
        channel.declare_exchange(name).await?;
        channel.declare_queue(name).await?;
        channel.bind_queue(name, name, INGRESS_ROUTING_KEY).await?;
    }
    Ok(())
}

/// Declare both ends of `binding` and bind them
pub async fn provision_binding(channel: &dyn BrokerChannel, binding: &Binding) -> Result<(), TransportError> {
    channel.declare_exchange(&binding.source).await?;
    channel.declare_queue(&binding.destination).await?;
    channel
        .bind_queue(&binding.destination, &binding.source, &binding.routing_key)
        .await
}
