//! Protocol versioning for murmur.
//!
//! Clients announce their Engine.IO revision in the `EIO` query parameter.

use serde::{Deserialize, Serialize};

/// Current protocol version: Engine.IO 4 carrying Socket.IO 5.
pub const PROTOCOL_VERSION: Version = Version {
    engine: 4,
    socket: 5,
};

/// Protocol version information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Engine.IO revision.
    pub engine: u8,
    /// Socket.IO revision.
    pub socket: u8,
}

impl Version {
    /// Check the `EIO` query value a client sent.
    ///
    /// Only the exact Engine.IO revision is accepted; older revisions use a
    /// different heartbeat direction and packet layout.
    #[must_use]
    pub fn accepts_engine(&self, eio: &str) -> bool {
        eio.trim().parse::<u8>().ok() == Some(self.engine)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EIO{}/SIO{}", self.engine, self.socket)
    }
}

impl Default for Version {
    fn default() -> Self {
        PROTOCOL_VERSION
    }
}
