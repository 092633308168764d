//! Packet types for the murmur protocol.
//!
//! Engine.IO wraps every Socket.IO packet in a `message` packet, so the two
//! layers are flattened into a single [`Packet`] enum here. Control packets
//! (open, ping, pong...) live on the Engine.IO layer only.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// The only namespace served.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Engine.IO packet type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EnginePacketType {
    Open = 0,
    Close = 1,
    Ping = 2,
    Pong = 3,
    Message = 4,
    Upgrade = 5,
    Noop = 6,
}

impl From<EnginePacketType> for u8 {
    fn from(pt: EnginePacketType) -> u8 {
        pt as u8
    }
}

impl TryFrom<u8> for EnginePacketType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EnginePacketType::Open),
            1 => Ok(EnginePacketType::Close),
            2 => Ok(EnginePacketType::Ping),
            3 => Ok(EnginePacketType::Pong),
            4 => Ok(EnginePacketType::Message),
            5 => Ok(EnginePacketType::Upgrade),
            6 => Ok(EnginePacketType::Noop),
            _ => Err("Invalid Engine.IO packet type"),
        }
    }
}

/// Socket.IO packet type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SocketPacketType {
    Connect = 0,
    Disconnect = 1,
    Event = 2,
    Ack = 3,
    ConnectError = 4,
    BinaryEvent = 5,
    BinaryAck = 6,
}

impl From<SocketPacketType> for u8 {
    fn from(pt: SocketPacketType) -> u8 {
        pt as u8
    }
}

impl TryFrom<u8> for SocketPacketType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SocketPacketType::Connect),
            1 => Ok(SocketPacketType::Disconnect),
            2 => Ok(SocketPacketType::Event),
            3 => Ok(SocketPacketType::Ack),
            4 => Ok(SocketPacketType::ConnectError),
            5 => Ok(SocketPacketType::BinaryEvent),
            6 => Ok(SocketPacketType::BinaryAck),
            _ => Err("Invalid Socket.IO packet type"),
        }
    }
}

/// Engine.IO open handshake, sent by the server as the first packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Engine.IO session id.
    pub sid: String,
    /// Transports the client may upgrade to. Always empty over WebSocket.
    pub upgrades: Vec<String>,
    /// Interval between server pings, in milliseconds.
    pub ping_interval: u64,
    /// How long the server waits for a pong, in milliseconds.
    pub ping_timeout: u64,
    /// Largest accepted inbound payload, in bytes.
    pub max_payload: u64,
}

/// A protocol packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Engine.IO session opened.
    Open(Handshake),
    /// Engine.IO session closed.
    Close,
    /// Engine.IO heartbeat ping.
    Ping,
    /// Engine.IO heartbeat pong.
    Pong,
    /// Engine.IO no-op.
    Noop,

    /// Socket.IO namespace connect. Clients may attach auth data; the server
    /// answers with `{"sid": ...}`.
    Connect {
        namespace: String,
        data: Option<Value>,
    },

    /// Socket.IO namespace disconnect.
    Disconnect { namespace: String },

    /// Socket.IO event: `["name", args...]`.
    Event {
        namespace: String,
        /// Acknowledgement id requested by the sender.
        id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },

    /// Socket.IO acknowledgement.
    Ack {
        namespace: String,
        id: u64,
        args: Vec<Value>,
    },

    /// Socket.IO namespace connect refused.
    ConnectError { namespace: String, message: String },
}

impl Packet {
    /// Create an event on the default namespace.
    #[must_use]
    pub fn event(name: impl Into<String>, args: Vec<Value>) -> Self {
        Packet::Event {
            namespace: DEFAULT_NAMESPACE.to_string(),
            id: None,
            name: name.into(),
            args,
        }
    }

    /// Create the server's reply to a namespace connect.
    #[must_use]
    pub fn connected(sid: impl Into<String>) -> Self {
        Packet::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: Some(json!({ "sid": sid.into() })),
        }
    }

    /// Create a connect error for a namespace.
    #[must_use]
    pub fn connect_error(namespace: impl Into<String>, message: impl Into<String>) -> Self {
        Packet::ConnectError {
            namespace: namespace.into(),
            message: message.into(),
        }
    }

    /// Get the Engine.IO packet type.
    #[must_use]
    pub fn engine_type(&self) -> EnginePacketType {
        match self {
            Packet::Open(_) => EnginePacketType::Open,
            Packet::Close => EnginePacketType::Close,
            Packet::Ping => EnginePacketType::Ping,
            Packet::Pong => EnginePacketType::Pong,
            Packet::Noop => EnginePacketType::Noop,
            _ => EnginePacketType::Message,
        }
    }

    /// Get the Socket.IO packet type, if this packet carries one.
    #[must_use]
    pub fn socket_type(&self) -> Option<SocketPacketType> {
        match self {
            Packet::Connect { .. } => Some(SocketPacketType::Connect),
            Packet::Disconnect { .. } => Some(SocketPacketType::Disconnect),
            Packet::Event { .. } => Some(SocketPacketType::Event),
            Packet::Ack { .. } => Some(SocketPacketType::Ack),
            Packet::ConnectError { .. } => Some(SocketPacketType::ConnectError),
            _ => None,
        }
    }

    /// Get the namespace of a Socket.IO packet.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        match self {
            Packet::Connect { namespace, .. }
            | Packet::Disconnect { namespace }
            | Packet::Event { namespace, .. }
            | Packet::Ack { namespace, .. }
            | Packet::ConnectError { namespace, .. } => Some(namespace),
            _ => None,
        }
    }
}

/// The fields every Socket.IO packet encoding shares.
///
/// This is also the exact map layout of the MessagePack parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SocketParts {
    #[serde(rename = "type")]
    pub kind: u8,
    pub nsp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl SocketParts {
    /// Split a Socket.IO packet into its parts.
    pub(crate) fn from_packet(packet: &Packet) -> Option<Self> {
        let kind = u8::from(packet.socket_type()?);
        let parts = match packet {
            Packet::Connect { namespace, data } => Self {
                kind,
                nsp: namespace.clone(),
                data: data.clone(),
                id: None,
            },
            Packet::Disconnect { namespace } => Self {
                kind,
                nsp: namespace.clone(),
                data: None,
                id: None,
            },
            Packet::Event {
                namespace,
                id,
                name,
                args,
            } => {
                let mut data = Vec::with_capacity(args.len() + 1);
                data.push(Value::String(name.clone()));
                data.extend(args.iter().cloned());
                Self {
                    kind,
                    nsp: namespace.clone(),
                    data: Some(Value::Array(data)),
                    id: *id,
                }
            }
            Packet::Ack {
                namespace,
                id,
                args,
            } => Self {
                kind,
                nsp: namespace.clone(),
                data: Some(Value::Array(args.clone())),
                id: Some(*id),
            },
            Packet::ConnectError { namespace, message } => Self {
                kind,
                nsp: namespace.clone(),
                data: Some(json!({ "message": message })),
                id: None,
            },
            _ => return None,
        };
        Some(parts)
    }

    /// Rebuild a packet from its parts.
    pub(crate) fn into_packet(self) -> Result<Packet, &'static str> {
        let kind = SocketPacketType::try_from(self.kind)?;
        let namespace = self.nsp;

        match kind {
            SocketPacketType::Connect => Ok(Packet::Connect {
                namespace,
                data: self.data,
            }),
            SocketPacketType::Disconnect => Ok(Packet::Disconnect { namespace }),
            SocketPacketType::Event => {
                let mut items = match self.data {
                    Some(Value::Array(items)) if !items.is_empty() => items.into_iter(),
                    _ => return Err("Event payload must be a non-empty array"),
                };
                let name = match items.next() {
                    Some(Value::String(name)) => name,
                    _ => return Err("Event name must be a string"),
                };
                Ok(Packet::Event {
                    namespace,
                    id: self.id,
                    name,
                    args: items.collect(),
                })
            }
            SocketPacketType::Ack => {
                let id = self.id.ok_or("Ack packet without id")?;
                let args = match self.data {
                    Some(Value::Array(args)) => args,
                    None => Vec::new(),
                    _ => return Err("Ack payload must be an array"),
                };
                Ok(Packet::Ack {
                    namespace,
                    id,
                    args,
                })
            }
            SocketPacketType::ConnectError => {
                let message = match self.data {
                    Some(Value::Object(map)) => map
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    Some(Value::String(message)) => message,
                    _ => String::new(),
                };
                Ok(Packet::ConnectError { namespace, message })
            }
            SocketPacketType::BinaryEvent | SocketPacketType::BinaryAck => {
                Err("Binary attachments are not supported")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_types() {
        let event = Packet::event("typing", vec![]);
        assert_eq!(event.engine_type(), EnginePacketType::Message);
        assert_eq!(event.socket_type(), Some(SocketPacketType::Event));
        assert_eq!(event.namespace(), Some("/"));

        assert_eq!(Packet::Ping.engine_type(), EnginePacketType::Ping);
        assert_eq!(Packet::Ping.socket_type(), None);
    }

    #[test]
    fn test_type_conversion() {
        assert_eq!(EnginePacketType::try_from(4), Ok(EnginePacketType::Message));
        assert!(EnginePacketType::try_from(7).is_err());
        assert_eq!(SocketPacketType::try_from(2), Ok(SocketPacketType::Event));
        assert!(SocketPacketType::try_from(9).is_err());
    }

    #[test]
    fn test_event_parts_carry_name_first() {
        let packet = Packet::event("chat message", vec![json!("hi")]);
        let parts = SocketParts::from_packet(&packet).unwrap();
        assert_eq!(parts.kind, 2);
        assert_eq!(parts.data, Some(json!(["chat message", "hi"])));
    }

    #[test]
    fn test_event_without_name_is_rejected() {
        let parts = SocketParts {
            kind: 2,
            nsp: "/".into(),
            data: Some(json!([42])),
            id: None,
        };
        assert!(parts.into_packet().is_err());
    }

    #[test]
    fn test_binary_event_is_rejected() {
        let parts = SocketParts {
            kind: 5,
            nsp: "/".into(),
            data: Some(json!(["upload", {"_placeholder": true, "num": 0}])),
            id: None,
        };
        assert!(parts.into_packet().is_err());
    }
}
