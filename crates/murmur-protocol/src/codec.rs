//! Codec for encoding and decoding murmur packets.
//!
//! Two encodings exist, matching the two stock Socket.IO parsers:
//!
//! - **Text**: `<engine type><socket type>[/nsp,][ack id][json]`, e.g.
//!   `42["chat message","hi"]`.
//! - **MessagePack**: Socket.IO packets as binary `{type, nsp, data, id}` maps.
//!   Engine.IO control packets stay text in this mode.
//!
//! Long-polling bodies carry several text packets joined by
//! [`RECORD_SEPARATOR`].

use bytes::Bytes;
use std::fmt::Write as _;
use thiserror::Error;

use crate::packet::{EnginePacketType, Packet, SocketParts, DEFAULT_NAMESPACE};

/// Default largest accepted inbound frame (1 MB).
pub const DEFAULT_MAX_PAYLOAD: usize = 1_000_000;

/// Separator between packets in a long-polling body.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Probe ping a client sends on a new WebSocket before upgrading to it.
pub const PROBE_PING: &str = "2probe";

/// Answer to [`PROBE_PING`].
pub const PROBE_PONG: &str = "3probe";

/// Upgrade packet that completes the switch to WebSocket.
pub const UPGRADE: &str = "5";

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame had no content.
    #[error("Empty frame")]
    Empty,

    /// Frame exceeds the configured maximum size.
    #[error("Frame size {size} exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Recognised but unsupported protocol feature.
    #[error("Unsupported: {0}")]
    Unsupported(&'static str),

    /// Invalid frame data.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Packet encoding chosen by a client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    /// The default Socket.IO text parser.
    #[default]
    Text,
    /// The Socket.IO MessagePack parser.
    MessagePack,
}

impl Encoding {
    /// Pick an encoding from the `encoding` query parameter.
    #[must_use]
    pub fn from_query(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("msgpack") => Encoding::MessagePack,
            _ => Encoding::Text,
        }
    }
}

/// A single WebSocket frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Bytes),
}

impl WireFrame {
    /// Size of the payload in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            WireFrame::Text(text) => text.len(),
            WireFrame::Binary(data) => data.len(),
        }
    }

    /// Check if the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encode a packet for a session using `encoding`.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(packet: &Packet, encoding: Encoding) -> Result<WireFrame, ProtocolError> {
    match encoding {
        Encoding::MessagePack if packet.socket_type().is_some() => {
            encode_binary(packet).map(WireFrame::Binary)
        }
        _ => encode_text(packet).map(WireFrame::Text),
    }
}

/// Decode a frame of either kind.
///
/// # Errors
///
/// Returns an error if the frame is empty or malformed.
pub fn decode(frame: &WireFrame) -> Result<Packet, ProtocolError> {
    match frame {
        WireFrame::Text(text) => decode_text(text),
        WireFrame::Binary(data) => decode_binary(data),
    }
}

/// Decode a frame, rejecting it first if it is larger than `max_payload`.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] or any decoding error.
pub fn decode_limited(frame: &WireFrame, max_payload: usize) -> Result<Packet, ProtocolError> {
    if frame.len() > max_payload {
        return Err(ProtocolError::PayloadTooLarge {
            size: frame.len(),
            max: max_payload,
        });
    }
    decode(frame)
}

/// Encode a packet in the text format.
///
/// # Errors
///
/// Returns an error if the JSON payload cannot be serialized.
pub fn encode_text(packet: &Packet) -> Result<String, ProtocolError> {
    let mut out = String::new();
    out.push(type_char(u8::from(packet.engine_type())));

    match packet {
        Packet::Open(handshake) => out.push_str(&serde_json::to_string(handshake)?),
        Packet::Close | Packet::Ping | Packet::Pong | Packet::Noop => {}
        _ => {
            let parts = SocketParts::from_packet(packet)
                .ok_or_else(|| ProtocolError::Invalid("not a Socket.IO packet".into()))?;
            out.push(type_char(parts.kind));
            if parts.nsp != DEFAULT_NAMESPACE {
                out.push_str(&parts.nsp);
                out.push(',');
            }
            if let Some(id) = parts.id {
                let _ = write!(out, "{id}");
            }
            if let Some(data) = &parts.data {
                out.push_str(&serde_json::to_string(data)?);
            }
        }
    }

    Ok(out)
}

/// Decode a packet from the text format.
///
/// # Errors
///
/// Returns an error if the text is empty or malformed.
pub fn decode_text(text: &str) -> Result<Packet, ProtocolError> {
    let first = text.chars().next().ok_or(ProtocolError::Empty)?;
    let kind = first
        .to_digit(10)
        .and_then(|d| EnginePacketType::try_from(d as u8).ok())
        .ok_or_else(|| ProtocolError::Invalid(format!("unknown packet type {first:?}")))?;
    let body = &text[first.len_utf8()..];

    match kind {
        EnginePacketType::Open => Ok(Packet::Open(serde_json::from_str(body)?)),
        EnginePacketType::Close => Ok(Packet::Close),
        // Probes are answered by the upgrade handshake and never get here.
        EnginePacketType::Ping => Ok(Packet::Ping),
        EnginePacketType::Pong => Ok(Packet::Pong),
        EnginePacketType::Noop => Ok(Packet::Noop),
        EnginePacketType::Message => decode_socket_text(body),
        EnginePacketType::Upgrade => Err(ProtocolError::Unsupported("transport upgrade")),
    }
}

fn decode_socket_text(body: &str) -> Result<Packet, ProtocolError> {
    let kind = match body.as_bytes().first() {
        Some(b) if b.is_ascii_digit() => b - b'0',
        Some(_) => return Err(ProtocolError::Invalid("bad Socket.IO packet type".into())),
        None => return Err(ProtocolError::Invalid("empty message packet".into())),
    };
    let mut rest = &body[1..];

    let nsp = if rest.starts_with('/') {
        let end = rest.find(',').unwrap_or(rest.len());
        let nsp = rest[..end].to_string();
        rest = rest.get(end + 1..).unwrap_or_default();
        nsp
    } else {
        DEFAULT_NAMESPACE.to_string()
    };

    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let id = if digits > 0 {
        let id = rest[..digits]
            .parse::<u64>()
            .map_err(|e| ProtocolError::Invalid(format!("bad ack id: {e}")))?;
        rest = &rest[digits..];
        Some(id)
    } else {
        None
    };

    let data = if rest.is_empty() {
        None
    } else {
        Some(serde_json::from_str(rest)?)
    };

    SocketParts {
        kind,
        nsp,
        data,
        id,
    }
    .into_packet()
    .map_err(|e| ProtocolError::Invalid(e.to_string()))
}

/// Encode packets as one long-polling body.
///
/// # Errors
///
/// Returns an error if a packet cannot be encoded as text.
pub fn encode_payload(packets: &[Packet]) -> Result<String, ProtocolError> {
    let mut out = String::new();
    for (i, packet) in packets.iter().enumerate() {
        if i > 0 {
            out.push(RECORD_SEPARATOR);
        }
        out.push_str(&encode_text(packet)?);
    }
    Ok(out)
}

/// Split a long-polling body into text frames.
pub fn split_payload(body: &str) -> impl Iterator<Item = WireFrame> + '_ {
    body.split(RECORD_SEPARATOR)
        .filter(|part| !part.is_empty())
        .map(|part| WireFrame::Text(part.to_string()))
}

/// Encode a Socket.IO packet as MessagePack.
///
/// # Errors
///
/// Returns an error for Engine.IO control packets or if encoding fails.
pub fn encode_binary(packet: &Packet) -> Result<Bytes, ProtocolError> {
    let parts = SocketParts::from_packet(packet)
        .ok_or_else(|| ProtocolError::Invalid("control packets are text-only".into()))?;
    let data = rmp_serde::to_vec_named(&parts)?;
    Ok(Bytes::from(data))
}

/// Decode a Socket.IO packet from MessagePack.
///
/// # Errors
///
/// Returns an error if the data is not a valid packet map.
pub fn decode_binary(data: &[u8]) -> Result<Packet, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::Empty);
    }
    let parts: SocketParts = rmp_serde::from_slice(data)?;
    parts
        .into_packet()
        .map_err(|e| ProtocolError::Invalid(e.to_string()))
}

fn type_char(kind: u8) -> char {
    char::from(b'0' + kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Handshake;
    use serde_json::json;

    #[test]
    fn test_encode_event() {
        let packet = Packet::event("send_message_to_all", vec![json!("hi")]);
        assert_eq!(
            encode_text(&packet).unwrap(),
            r#"42["send_message_to_all","hi"]"#
        );

        let packet = Packet::event("show_typing_status", vec![]);
        assert_eq!(encode_text(&packet).unwrap(), r#"42["show_typing_status"]"#);
    }

    #[test]
    fn test_encode_control_packets() {
        assert_eq!(encode_text(&Packet::Ping).unwrap(), "2");
        assert_eq!(encode_text(&Packet::Close).unwrap(), "1");

        let open = Packet::Open(Handshake {
            sid: "abc".into(),
            upgrades: vec![],
            ping_interval: 25000,
            ping_timeout: 20000,
            max_payload: 1_000_000,
        });
        assert_eq!(
            encode_text(&open).unwrap(),
            r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#
        );
    }

    #[test]
    fn test_encode_connect_reply() {
        let packet = Packet::connected("abcd1234");
        assert_eq!(encode_text(&packet).unwrap(), r#"40{"sid":"abcd1234"}"#);
    }

    #[test]
    fn test_decode_client_connect() {
        assert_eq!(
            decode_text("40").unwrap(),
            Packet::Connect {
                namespace: "/".into(),
                data: None
            }
        );
        assert_eq!(
            decode_text(r#"40{"token":"t"}"#).unwrap(),
            Packet::Connect {
                namespace: "/".into(),
                data: Some(json!({"token": "t"}))
            }
        );
    }

    #[test]
    fn test_decode_namespace_and_ack_id() {
        let packet = decode_text(r#"42/admin,17["typing"]"#).unwrap();
        assert_eq!(
            packet,
            Packet::Event {
                namespace: "/admin".into(),
                id: Some(17),
                name: "typing".into(),
                args: vec![],
            }
        );

        assert_eq!(
            decode_text("40/admin").unwrap(),
            Packet::Connect {
                namespace: "/admin".into(),
                data: None
            }
        );
    }

    #[test]
    fn test_decode_private_message() {
        let packet =
            decode_text(r#"42["private_message",{"recipientId":"B2","message":"secret"}]"#)
                .unwrap();
        match packet {
            Packet::Event { name, args, .. } => {
                assert_eq!(name, "private_message");
                assert_eq!(args, vec![json!({"recipientId": "B2", "message": "secret"})]);
            }
            other => panic!("Expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(decode_text(""), Err(ProtocolError::Empty)));
        assert!(matches!(decode_text("9"), Err(ProtocolError::Invalid(_))));
        assert!(matches!(decode_text("4"), Err(ProtocolError::Invalid(_))));
        assert!(matches!(decode_text("42[oops"), Err(ProtocolError::Json(_))));
        assert!(matches!(
            decode_text("5"),
            Err(ProtocolError::Unsupported(_))
        ));
    }

    #[test]
    fn test_decode_limited() {
        let frame = WireFrame::Text(r#"42["chat message","hello"]"#.into());
        assert!(decode_limited(&frame, DEFAULT_MAX_PAYLOAD).is_ok());

        match decode_limited(&frame, 8) {
            Err(ProtocolError::PayloadTooLarge { size, max }) => {
                assert_eq!(size, frame.len());
                assert_eq!(max, 8);
            }
            other => panic!("Expected PayloadTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_msgpack_event() {
        let packet = Packet::event(
            "receive_private_message",
            vec![json!({"from": "A1", "message": "secret"})],
        );

        let frame = encode(&packet, Encoding::MessagePack).unwrap();
        assert!(matches!(frame, WireFrame::Binary(_)));
        assert_eq!(decode(&frame).unwrap(), packet);
    }

    #[test]
    fn test_msgpack_keeps_control_packets_text() {
        let frame = encode(&Packet::Ping, Encoding::MessagePack).unwrap();
        assert_eq!(frame, WireFrame::Text("2".into()));
        assert!(encode_binary(&Packet::Pong).is_err());
    }

    #[test]
    fn test_polling_payload() {
        let packets = [Packet::connected("abcd1234"), Packet::Ping, Packet::Noop];
        assert_eq!(
            encode_payload(&packets).unwrap(),
            "40{\"sid\":\"abcd1234\"}\u{1e}2\u{1e}6"
        );
        assert_eq!(encode_payload(&[Packet::Close]).unwrap(), "1");

        let frames: Vec<_> = split_payload("40\u{1e}42[\"typing\"]\u{1e}").collect();
        assert_eq!(
            frames,
            vec![
                WireFrame::Text("40".into()),
                WireFrame::Text(r#"42["typing"]"#.into()),
            ]
        );
        assert_eq!(split_payload("").count(), 0);
    }

    #[test]
    fn test_encoding_from_query() {
        assert_eq!(Encoding::from_query(Some("msgpack")), Encoding::MessagePack);
        assert_eq!(Encoding::from_query(Some("json")), Encoding::Text);
        assert_eq!(Encoding::from_query(None), Encoding::Text);
    }
}
