//! Domain layer - Core chat relay model with no transport dependencies
//! 
//! This layer contains:
//! - Entities: Users, groups, chat messages, commands and topology names
//! - Traits: Abstractions for infrastructure (GroupRegistry, Broker)

pub mod entities;
pub mod traits;
