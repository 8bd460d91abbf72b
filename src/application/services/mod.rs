//! Application services - Relay and client orchestration

pub mod chat_session;
pub mod client_inbox;
pub mod command_processor;
pub mod provisioning;
pub mod relay_worker;

pub use chat_session::{ChatSession, SessionControl};
pub use client_inbox::{ClientInbox, Deliver, DrainOutcome, DrainTicket};
pub use command_processor::{Applied, CommandProcessor};
pub use relay_worker::RelayWorker;
