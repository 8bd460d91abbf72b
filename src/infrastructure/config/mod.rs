//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use crate::application::errors::ConfigError;

/// Relay configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BrokerConfig {
    pub uri: String,
    /// First reconnect delay; doubles on every failed attempt
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ClientConfig {
    pub username: String,
    /// Delay between two inbox drain steps
    pub drain_interval_ms: u64,
    /// Longest a drain step waits for a message
    pub receive_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            uri: "memory://local".to_string(),
            retry_initial_ms: 500,
            retry_max_ms: 30_000,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            username: "Anonymous".to_string(),
            drain_interval_ms: 1_000,
            receive_timeout_ms: 100,
        }
    }
}

impl BrokerConfig {
    pub fn retry_initial(&self) -> Duration {
        Duration::from_millis(self.retry_initial_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }
}

impl ClientConfig {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

impl Config {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Parse(format!("Failed to read config: {}", e)))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_env() -> Self {
        // Load from environment variables
        let mut config = Config::default();

        if let Ok(uri) = std::env::var("RELAY_BROKER_URI") {
            config.broker.uri = uri;
        }

        if let Ok(username) = std::env::var("USERNAME") {
            config.client.username = username;
        }

        config
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(format!("Failed to serialize config: {}", e)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.uri.trim().is_empty() {
            return Err(ConfigError::MissingField("broker.uri".to_string()));
        }
        if self.client.username.trim().is_empty() {
            return Err(ConfigError::MissingField("client.username".to_string()));
        }
        if self.client.drain_interval_ms == 0 {
            return Err(ConfigError::InvalidValue("client.drain-interval-ms must be positive".to_string()));
        }
        if self.broker.retry_initial_ms == 0 || self.broker.retry_initial_ms > self.broker.retry_max_ms {
            return Err(ConfigError::InvalidValue(
                "broker.retry-initial-ms must be positive and not above retry-max-ms".to_string(),
            ));
        }
        Ok(())
    }
}
