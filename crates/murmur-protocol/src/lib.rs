//! # murmur-protocol
//!
//! Wire protocol definitions for the murmur chat relay.
//!
//! murmur speaks Engine.IO v4 (long-polling and WebSocket) with Socket.IO v5
//! packets on top, so an unchanged Socket.IO browser client can talk to it.
//!
//! ## Layers
//!
//! - `Packet` - Engine.IO control packets and Socket.IO packets in one enum
//! - `codec` - text (`42["event",...]`) and MessagePack encodings
//! - `event` - chat event names and their typed payloads
//!
//! ## Example
//!
//! ```rust
//! use murmur_protocol::{codec, Encoding, Packet};
//!
//! let packet = Packet::event("chat message", vec!["hi".into()]);
//!
//! let frame = codec::encode(&packet, Encoding::Text).unwrap();
//! let decoded = codec::decode(&frame).unwrap();
//! assert_eq!(packet, decoded);
//! ```

pub mod codec;
pub mod event;
pub mod packet;
pub mod version;

pub use codec::{decode, encode, Encoding, ProtocolError, WireFrame};
pub use event::{ClientEvent, ServerEvent, UserRecord};
pub use packet::{EnginePacketType, Handshake, Packet, SocketPacketType, DEFAULT_NAMESPACE};
pub use version::{Version, PROTOCOL_VERSION};
