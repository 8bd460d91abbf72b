//! In-memory group storage

use crate::application::errors::RelayError;
use crate::domain::entities::{Group, User};
use crate::domain::traits::GroupRegistry;

/// Process-lifetime group registry. Nothing is persisted.
#[derive(Debug, Default)]
pub struct InMemoryGroupRegistry {
    groups: Vec<Group>,
}

impl InMemoryGroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_group_mut(&mut self, name: &str) -> Result<&mut Group, RelayError> {
        self.groups
            .iter_mut()
            .find(|g| g.name == name)
            .ok_or_else(|| RelayError::GroupNotFound(name.to_string()))
    }
}

impl GroupRegistry for InMemoryGroupRegistry {
    fn fetch_groups(&self) -> Vec<Group> {
        self.groups.clone()
    }

    fn find_group(&self, name: &str) -> Result<&Group, RelayError> {
        self.groups
            .iter()
            .find(|g| g.name == name)
            .ok_or_else(|| RelayError::GroupNotFound(name.to_string()))
    }

    fn register_group(&mut self, name: &str) {
        self.groups.push(Group::new(name));
    }

    fn append_user(&mut self, group_name: &str, username: &str) -> Result<(), RelayError> {
        let group = self.find_group_mut(group_name)?;
        group.users.push(User::new(username));
        Ok(())
    }

    fn delete_group(&mut self, group_name: &str, _requesting_username: Option<&str>) -> bool {
        match self.groups.iter().position(|g| g.name == group_name) {
            Some(index) => {
                self.groups.remove(index);
                true
            }
            None => false,
        }
    }
}
