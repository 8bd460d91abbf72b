//! Domain entities - Core relay objects with no transport dependencies

pub mod user;
pub mod group;
pub mod message;
pub mod command;
pub mod topology;

pub use user::User;
pub use group::Group;
pub use message::ChatMessage;
pub use command::{CommandEnvelope, CommandKind, CommandPayload};
pub use topology::Binding;
