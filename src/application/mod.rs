//! Application layer - Use cases and relay logic
//! 
//! This layer contains:
//! - Services: Command processing, relaying, inbox filtering, chat sessions
//! - Errors: Domain-specific errors
//! - Messaging: Console input parsing

pub mod errors;
pub mod services;
pub mod messaging;
