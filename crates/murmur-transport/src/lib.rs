//! # murmur-transport
//!
//! Transport layer for the murmur chat relay.
//!
//! - **Broadcaster** - the three broadcast domains (all, one, all-except)
//!   the router emits into
//! - **ConnectionHub** - in-process fan-out to every live connection's outbox
//! - **Session** - per-connection Engine.IO / Socket.IO state machine
//!
//! The hub owns no sockets. Each connection task attaches an outbox and
//! drains it into its own WebSocket:
//!
//! ```rust
//! use murmur_protocol::ServerEvent;
//! use murmur_transport::{Broadcaster, ConnectionHub, ConnectionId};
//!
//! let hub = ConnectionHub::new();
//! let id = ConnectionId::new("abcd1234");
//! let mut outbox = hub.attach(id.clone()).unwrap();
//!
//! hub.to_one(&id, &ServerEvent::YourId(id.to_string()));
//! assert!(outbox.try_recv().is_ok());
//! ```

pub mod hub;
pub mod session;
pub mod traits;

pub use hub::{ConnectionHub, HubConfig, OutboxReceiver};
pub use session::{
    Heartbeat, Session, SessionAction, SessionConfig, SessionPhase, SessionTransport,
};
pub use traits::{Broadcaster, ConnectionId, TransportError};
