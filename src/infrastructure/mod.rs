//! Infrastructure layer - External concerns
//! 
//! This layer contains:
//! - Config: Configuration loading
//! - Storage: In-memory group registry
//! - Broker: Message broker transports
//! - Adapters: Terminal front end

pub mod config;
pub mod storage;
pub mod broker;
pub mod adapters;
