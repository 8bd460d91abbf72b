//! Domain traits - Abstractions for infrastructure implementations

pub mod broker;
pub mod registry;

pub use broker::{Broker, BrokerChannel, Delivery};
pub use registry::GroupRegistry;
