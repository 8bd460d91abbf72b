use crate::application::errors::RelayError;
use crate::domain::entities::Group;

/// Group membership store owned by the relay worker.
///
/// Access is never concurrent, so implementations need no locking and the
/// methods are plain synchronous calls.
pub trait GroupRegistry: Send + Sync {
    /// All groups, in registration order
    fn fetch_groups(&self) -> Vec<Group>;

    /// First group with this name
    fn find_group(&self, name: &str) -> Result<&Group, RelayError>;

    /// Append an empty group. Duplicate names are not checked here.
    fn register_group(&mut self, name: &str);

    fn append_user(&mut self, group_name: &str, username: &str) -> Result<(), RelayError>;

    /// Remove the first group with this name. The requester is not used for
    /// authorization. Returns whether anything was removed.
    fn delete_group(&mut self, group_name: &str, requesting_username: Option<&str>) -> bool;

    fn contains(&self, name: &str) -> bool {
        self.find_group(name).is_ok()
    }
}
