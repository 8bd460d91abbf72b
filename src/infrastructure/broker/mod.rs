//! Broker transports

pub mod memory;

pub use memory::MemoryBroker;

use crate::application::errors::ConfigError;
use crate::infrastructure::config::BrokerConfig;

/// Build the transport named by the configured broker uri.
///
/// Only `memory://` is shipped; the relay and every client then share one
/// process.
pub fn from_config(config: &BrokerConfig) -> Result<MemoryBroker, ConfigError> {
    let (scheme, _) = config
        .uri
        .split_once("://")
        .ok_or_else(|| ConfigError::InvalidValue(format!("broker uri '{}' has no scheme", config.uri)))?;

    match scheme {
        "memory" => Ok(MemoryBroker::new()),
        other => Err(ConfigError::InvalidValue(format!(
            "unsupported broker scheme '{}'",
            other
        ))),
    }
}
