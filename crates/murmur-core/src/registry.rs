//! Registry of live connections.
//!
//! A connection is in the registry exactly while it is live, so the
//! registry size is the live connection count.

use indexmap::IndexMap;
use murmur_protocol::UserRecord;
use murmur_transport::ConnectionId;
use tracing::debug;

/// Prefix of generated display names.
const NAME_PREFIX: &str = "User-";

/// Number of id characters used in a display name.
const NAME_ID_CHARS: usize = 4;

/// Derive the display name for a connection id.
#[must_use]
pub fn display_name(id: &str) -> String {
    let short: String = id.chars().take(NAME_ID_CHARS).collect();
    format!("{NAME_PREFIX}{short}")
}

/// A live user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Connection ID.
    pub id: ConnectionId,
    /// Display name, fixed at connect time.
    pub name: String,
}

impl User {
    /// Create the record for a new connection.
    #[must_use]
    pub fn new(id: ConnectionId) -> Self {
        let name = display_name(id.as_str());
        Self { id, name }
    }
}

impl From<&User> for UserRecord {
    fn from(user: &User) -> Self {
        UserRecord {
            id: user.id.to_string(),
            name: user.name.clone(),
        }
    }
}

/// Live connections in join order.
#[derive(Debug, Default)]
pub struct Registry {
    users: IndexMap<ConnectionId, User>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection and return its record.
    ///
    /// Ids are unique per connection, so a repeated id just replaces the
    /// record in place.
    pub fn on_connect(&mut self, id: ConnectionId) -> User {
        let user = User::new(id);
        self.users.insert(user.id.clone(), user.clone());
        debug!(connection = %user.id, name = %user.name, "Registered");
        user
    }

    /// Remove a connection. Unknown ids are ignored.
    pub fn on_disconnect(&mut self, id: &ConnectionId) -> Option<User> {
        let user = self.users.shift_remove(id);
        if user.is_some() {
            debug!(connection = %id, "Unregistered");
        }
        user
    }

    /// Snapshot of all live users in join order.
    #[must_use]
    pub fn list(&self) -> Vec<User> {
        self.users.values().cloned().collect()
    }

    /// Snapshot in wire form.
    #[must_use]
    pub fn roster(&self) -> Vec<UserRecord> {
        self.users.values().map(UserRecord::from).collect()
    }

    /// Look up a user.
    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<&User> {
        self.users.get(id)
    }

    /// Check if a connection is live.
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.users.contains_key(id)
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Check if nobody is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(registry: &Registry) -> Vec<String> {
        registry.list().into_iter().map(|u| u.id.to_string()).collect()
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("abcd1234"), "User-abcd");
        assert_eq!(display_name("A1"), "User-A1");
        assert_eq!(display_name(""), "User-");
    }

    #[test]
    fn test_connect_disconnect() {
        let mut registry = Registry::new();

        let user = registry.on_connect("abcd1234".into());
        assert_eq!(user.name, "User-abcd");
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&"abcd1234".into()));

        assert!(registry.on_disconnect(&"abcd1234".into()).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_disconnect_unknown_is_noop() {
        let mut registry = Registry::new();
        registry.on_connect("A1".into());

        assert!(registry.on_disconnect(&"ZZZ".into()).is_none());
        assert!(registry.on_disconnect(&"A1".into()).is_some());
        assert!(registry.on_disconnect(&"A1".into()).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_list_keeps_join_order() {
        let mut registry = Registry::new();
        for id in ["c", "a", "d", "b"] {
            registry.on_connect(id.into());
        }
        registry.on_disconnect(&"a".into());

        assert_eq!(ids(&registry), ["c", "d", "b"]);

        registry.on_connect("a".into());
        assert_eq!(ids(&registry), ["c", "d", "b", "a"]);
    }

    #[test]
    fn test_roster_shape() {
        let mut registry = Registry::new();
        registry.on_connect("B2xyz".into());

        assert_eq!(
            registry.roster(),
            vec![UserRecord {
                id: "B2xyz".into(),
                name: "User-B2xy".into()
            }]
        );
    }
}
