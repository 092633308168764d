//! Chat events and their payloads.
//!
//! Event names and payload shapes are the wire contract of the browser
//! client and must not change.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

use crate::packet::Packet;

/// Event names.
pub mod names {
    // Client to server.
    pub const CHAT_MESSAGE: &str = "chat message";
    pub const PRIVATE_MESSAGE: &str = "private_message";
    pub const TYPING: &str = "typing";
    pub const STOP_TYPING: &str = "stop_typing";

    // Server to client.
    pub const YOUR_ID: &str = "your_id";
    pub const USERS_LIST: &str = "users_list";
    pub const SEND_MESSAGE_TO_ALL: &str = "send_message_to_all";
    pub const RECEIVE_PRIVATE_MESSAGE: &str = "receive_private_message";
    pub const PRIVATE_MESSAGE_SENT: &str = "private_message_sent";
    pub const SHOW_TYPING_STATUS: &str = "show_typing_status";
    pub const HIDE_TYPING_STATUS: &str = "hide_typing_status";
}

/// A roster entry as sent in `users_list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
}

/// Payload of an inbound `private_message`.
///
/// `message` is `None` only when the key is absent; an explicit `null` is
/// kept so it can be relayed as sent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessage {
    pub recipient_id: String,
    #[serde(default, deserialize_with = "present")]
    pub message: Option<Value>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// An event sent by a client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientEvent {
    pub name: String,
    pub args: Vec<Value>,
}

impl ClientEvent {
    /// Create a client event.
    #[must_use]
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// An event sent by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// The recipient's own connection id.
    YourId(String),
    /// Full roster snapshot.
    UsersList(Vec<UserRecord>),
    /// A public chat message, relayed verbatim. `None` when the sender
    /// attached no argument; it goes out as `null`.
    SendMessageToAll(Option<Value>),
    /// A private message for the recipient. A missing message leaves the
    /// key out of the payload.
    ReceivePrivateMessage { from: String, message: Option<Value> },
    /// Confirmation for the sender of a private message.
    PrivateMessageSent { to: String, message: Option<Value> },
    /// Someone else started typing.
    ShowTypingStatus,
    /// Someone else stopped typing.
    HideTypingStatus,
}

impl ServerEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::YourId(_) => names::YOUR_ID,
            ServerEvent::UsersList(_) => names::USERS_LIST,
            ServerEvent::SendMessageToAll(_) => names::SEND_MESSAGE_TO_ALL,
            ServerEvent::ReceivePrivateMessage { .. } => names::RECEIVE_PRIVATE_MESSAGE,
            ServerEvent::PrivateMessageSent { .. } => names::PRIVATE_MESSAGE_SENT,
            ServerEvent::ShowTypingStatus => names::SHOW_TYPING_STATUS,
            ServerEvent::HideTypingStatus => names::HIDE_TYPING_STATUS,
        }
    }

    /// Event arguments as JSON values.
    #[must_use]
    pub fn args(&self) -> Vec<Value> {
        match self {
            ServerEvent::YourId(id) => vec![Value::String(id.clone())],
            ServerEvent::UsersList(users) => {
                let users = users
                    .iter()
                    .map(|u| json!({ "id": u.id, "name": u.name }))
                    .collect();
                vec![Value::Array(users)]
            }
            ServerEvent::SendMessageToAll(msg) => vec![msg.clone().unwrap_or(Value::Null)],
            ServerEvent::ReceivePrivateMessage { from, message } => {
                vec![addressed("from", from, message)]
            }
            ServerEvent::PrivateMessageSent { to, message } => {
                vec![addressed("to", to, message)]
            }
            ServerEvent::ShowTypingStatus | ServerEvent::HideTypingStatus => Vec::new(),
        }
    }

    /// Build the Socket.IO event packet for this event.
    #[must_use]
    pub fn to_packet(&self) -> Packet {
        Packet::event(self.name(), self.args())
    }
}

fn addressed(key: &str, peer: &str, message: &Option<Value>) -> Value {
    let mut payload = Map::new();
    payload.insert(key.to_string(), Value::String(peer.to_string()));
    if let Some(message) = message {
        payload.insert("message".to_string(), message.clone());
    }
    Value::Object(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_text;

    #[test]
    fn test_users_list_shape() {
        let event = ServerEvent::UsersList(vec![UserRecord {
            id: "abcd1234".into(),
            name: "User-abcd".into(),
        }]);
        assert_eq!(
            encode_text(&event.to_packet()).unwrap(),
            r#"42["users_list",[{"id":"abcd1234","name":"User-abcd"}]]"#
        );
    }

    #[test]
    fn test_private_payload_shapes() {
        let received = ServerEvent::ReceivePrivateMessage {
            from: "A1".into(),
            message: Some(json!("secret")),
        };
        assert_eq!(received.args(), vec![json!({"from": "A1", "message": "secret"})]);

        let sent = ServerEvent::PrivateMessageSent {
            to: "B2".into(),
            message: Some(json!("secret")),
        };
        assert_eq!(sent.name(), "private_message_sent");
        assert_eq!(sent.args(), vec![json!({"to": "B2", "message": "secret"})]);
    }

    #[test]
    fn test_private_payload_without_message() {
        let received = ServerEvent::ReceivePrivateMessage {
            from: "A1".into(),
            message: None,
        };
        assert_eq!(
            encode_text(&received.to_packet()).unwrap(),
            r#"42["receive_private_message",{"from":"A1"}]"#
        );

        let sent = ServerEvent::PrivateMessageSent {
            to: "B2".into(),
            message: Some(Value::Null),
        };
        assert_eq!(sent.args(), vec![json!({"to": "B2", "message": null})]);
    }

    #[test]
    fn test_chat_without_argument() {
        assert_eq!(
            encode_text(&ServerEvent::SendMessageToAll(None).to_packet()).unwrap(),
            r#"42["send_message_to_all",null]"#
        );
        assert_eq!(
            ServerEvent::SendMessageToAll(Some(json!({"text": "hi"}))).args(),
            vec![json!({"text": "hi"})]
        );
    }

    #[test]
    fn test_private_message_parse() {
        let msg: PrivateMessage =
            serde_json::from_value(json!({"recipientId": "B2", "message": [1, 2]})).unwrap();
        assert_eq!(msg.recipient_id, "B2");
        assert_eq!(msg.message, Some(json!([1, 2])));

        let msg: PrivateMessage = serde_json::from_value(json!({"recipientId": "B2"})).unwrap();
        assert_eq!(msg.message, None);

        let msg: PrivateMessage =
            serde_json::from_value(json!({"recipientId": "B2", "message": null})).unwrap();
        assert_eq!(msg.message, Some(Value::Null));

        assert!(serde_json::from_value::<PrivateMessage>(json!({"message": "x"})).is_err());
        assert!(serde_json::from_value::<PrivateMessage>(json!({"recipientId": 7})).is_err());
    }
}
