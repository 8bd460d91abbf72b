use std::collections::HashMap;

use crate::application::errors::RelayError;
use crate::domain::entities::{Binding, CommandEnvelope, CommandKind, CommandPayload};
use crate::domain::traits::GroupRegistry;

/// Handler applying one kind of command to the registry
pub type CommandHandler =
    Box<dyn Fn(&mut dyn GroupRegistry, &CommandPayload) -> Result<(), RelayError> + Send + Sync>;

/// Result of a successfully applied command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub kind: CommandKind,
    /// Inbox binding the caller must provision on the broker
    pub binding: Option<Binding>,
}

/// Validates administrative commands and applies them to the group registry
pub struct CommandProcessor {
    registry: Box<dyn GroupRegistry>,
    handlers: HashMap<CommandKind, CommandHandler>,
}

impl CommandProcessor {
    pub fn new(registry: impl GroupRegistry + 'static) -> Self {
        let mut processor = Self {
            registry: Box::new(registry),
            handlers: HashMap::new(),
        };
        processor.register_defaults();
        processor
    }

    pub fn register<F>(&mut self, kind: CommandKind, handler: F)
    where
        F: Fn(&mut dyn GroupRegistry, &CommandPayload) -> Result<(), RelayError> + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Box::new(handler));
    }

    fn register_defaults(&mut self) {
        self.register(CommandKind::CreateGroup, |registry, payload| {
            if registry.contains(&payload.group_name) {
                return Err(RelayError::GroupAlreadyExists(payload.group_name.clone()));
            }
            registry.register_group(&payload.group_name);
            Ok(())
        });

        self.register(CommandKind::AppendUserToGroup, |registry, payload| {
            let username = payload
                .username
                .as_deref()
                .ok_or_else(|| RelayError::MalformedMessage("payload.username is required".to_string()))?;

            // Redelivered joins must not duplicate the member
            if registry.find_group(&payload.group_name)?.has_member(username) {
                return Ok(());
            }
            registry.append_user(&payload.group_name, username)
        });

        self.register(CommandKind::DeleteGroup, |registry, payload| {
            if !registry.delete_group(&payload.group_name, payload.username.as_deref()) {
                tracing::debug!(group = %payload.group_name, "delete_group: nothing to delete");
            }
            Ok(())
        });
    }

    /// Apply a decoded command.
    ///
    /// Unknown labels fail with `UnknownCommand` and leave the registry untouched.
    pub fn apply(&mut self, envelope: &CommandEnvelope) -> Result<Applied, RelayError> {
        let kind = envelope
            .parsed_kind()
            .ok_or_else(|| RelayError::UnknownCommand(envelope.kind.clone()))?;
        let handler = self
            .handlers
            .get(&kind)
            .ok_or_else(|| RelayError::UnknownCommand(envelope.kind.clone()))?;

        handler(self.registry.as_mut(), &envelope.payload)?;

        let binding = if kind.provisions_binding() {
            envelope
                .payload
                .username
                .as_deref()
                .map(|username| Binding::inbox_to_group(username, &envelope.payload.group_name))
        } else {
            None
        };

        Ok(Applied { kind, binding })
    }

    pub fn registry(&self) -> &dyn GroupRegistry {
        self.registry.as_ref()
    }
}
