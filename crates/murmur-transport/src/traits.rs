//! Transport abstraction traits for murmur.
//!
//! The router never touches sockets; it emits into a [`Broadcaster`],
//! which the server backs with a [`ConnectionHub`](crate::ConnectionHub)
//! and tests back with a recording fake.

use murmur_protocol::ServerEvent;
use std::fmt;
use thiserror::Error;

/// Length of generated connection ids.
const CONNECTION_ID_LENGTH: usize = 20;

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random URL-safe connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(nanoid::nanoid!(CONNECTION_ID_LENGTH))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ConnectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The other end of the connection is gone.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The id is already attached to the hub.
    #[error("Connection already attached: {0}")]
    AlreadyAttached(ConnectionId),

    /// The hub is full.
    #[error("Maximum connections reached ({0})")]
    CapacityReached(usize),

    /// The client missed its heartbeat.
    #[error("Heartbeat timed out")]
    Timeout,

}

/// The broadcast domains an outbound event can be addressed to.
///
/// Every method returns the number of connections the event was handed to.
pub trait Broadcaster: Send + Sync {
    /// Deliver to every connected client.
    fn to_all(&self, event: &ServerEvent) -> usize;

    /// Deliver to one client. Unknown ids are a silent no-op.
    fn to_one(&self, id: &ConnectionId, event: &ServerEvent) -> usize;

    /// Deliver to every connected client except `except`.
    fn to_all_except(&self, except: &ConnectionId, event: &ServerEvent) -> usize;
}

impl<B: Broadcaster + ?Sized> Broadcaster for std::sync::Arc<B> {
    fn to_all(&self, event: &ServerEvent) -> usize {
        (**self).to_all(event)
    }

    fn to_one(&self, id: &ConnectionId, event: &ServerEvent) -> usize {
        (**self).to_one(id, event)
    }

    fn to_all_except(&self, except: &ConnectionId, event: &ServerEvent) -> usize {
        (**self).to_all_except(except, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert_eq!(id1.as_str().len(), CONNECTION_ID_LENGTH);
        assert!(id1
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
    }

    #[test]
    fn test_connection_id_from_string() {
        let id: ConnectionId = "test-id".into();
        assert_eq!(id.as_str(), "test-id");
        assert_eq!(id.to_string(), "test-id");
    }
}
