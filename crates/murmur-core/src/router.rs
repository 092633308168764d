//! Event router for murmur.
//!
//! The router owns the registry and turns every inbound event into
//! outbound events addressed to one connection, everyone but the sender,
//! or everyone. Client events go through an explicit name → handler table.
//!
//! | inbound | outbound |
//! |---|---|
//! | connect | `your_id` → sender, `users_list` → all |
//! | `chat message` | `send_message_to_all` → all |
//! | `private_message` | `receive_private_message` → recipient, `private_message_sent` → sender |
//! | `typing` | `show_typing_status` → all but sender |
//! | `stop_typing` | `hide_typing_status` → all but sender |
//! | disconnect | `users_list` → all |

use crate::dispatch::Inbound;
use crate::registry::{Registry, User};
use murmur_protocol::event::{names, PrivateMessage};
use murmur_protocol::{ClientEvent, ServerEvent};
use murmur_transport::{Broadcaster, ConnectionId};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// No handler is registered for the event.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// The event payload does not have the expected shape.
    #[error("Malformed {event} payload: {reason}")]
    MalformedPayload { event: &'static str, reason: String },

    /// The dispatcher is no longer running.
    #[error("Dispatcher closed")]
    DispatcherClosed,
}

/// Handler for one client event.
pub type EventHandler =
    fn(&ConnectionId, ClientEvent, &dyn Broadcaster) -> Result<(), RouterError>;

/// The central event router.
pub struct Router {
    registry: Registry,
    handlers: HashMap<&'static str, EventHandler>,
    events_routed: u64,
}

impl Router {
    /// Create a router with the chat event table.
    #[must_use]
    pub fn new() -> Self {
        let mut router = Self {
            registry: Registry::new(),
            handlers: HashMap::new(),
            events_routed: 0,
        };
        router.register(names::CHAT_MESSAGE, on_chat_message);
        router.register(names::PRIVATE_MESSAGE, on_private_message);
        router.register(names::TYPING, on_typing);
        router.register(names::STOP_TYPING, on_stop_typing);
        router
    }

    /// Register or replace the handler for an event name.
    pub fn register(&mut self, event: &'static str, handler: EventHandler) {
        self.handlers.insert(event, handler);
    }

    /// Names of all client events with a handler, sorted.
    #[must_use]
    pub fn events(&self) -> Vec<&'static str> {
        let mut events: Vec<_> = self.handlers.keys().copied().collect();
        events.sort_unstable();
        events
    }

    /// The connection registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            connection_count: self.registry.len(),
            events_routed: self.events_routed,
        }
    }

    /// Handle any inbound value.
    ///
    /// # Errors
    ///
    /// Returns an error if a client event is unknown or malformed.
    pub fn handle(&mut self, inbound: Inbound, out: &dyn Broadcaster) -> Result<(), RouterError> {
        match inbound {
            Inbound::Connect(id) => {
                self.on_connect(id, out);
                Ok(())
            }
            Inbound::Disconnect(id) => {
                self.on_disconnect(&id, out);
                Ok(())
            }
            Inbound::Event { from, event } => self.dispatch(&from, event, out),
        }
    }

    /// A connection came up: greet it with its id, then send everyone the roster.
    pub fn on_connect(&mut self, id: ConnectionId, out: &dyn Broadcaster) -> User {
        info!(connection = %id, "A user connected");

        out.to_one(&id, &ServerEvent::YourId(id.to_string()));
        let user = self.registry.on_connect(id);
        self.broadcast_roster(out);
        user
    }

    /// A connection went away: send everyone the roster.
    ///
    /// Unknown ids leave the registry untouched; the roster still goes out.
    pub fn on_disconnect(&mut self, id: &ConnectionId, out: &dyn Broadcaster) -> Option<User> {
        info!(connection = %id, "A user disconnected");

        let user = self.registry.on_disconnect(id);
        self.broadcast_roster(out);
        user
    }

    /// Route a client event through the handler table.
    ///
    /// # Errors
    ///
    /// Returns an error if no handler exists or the handler rejects the payload.
    pub fn dispatch(
        &mut self,
        from: &ConnectionId,
        event: ClientEvent,
        out: &dyn Broadcaster,
    ) -> Result<(), RouterError> {
        let handler = *self
            .handlers
            .get(event.name.as_str())
            .ok_or_else(|| RouterError::UnknownEvent(event.name.clone()))?;

        handler(from, event, out)?;
        self.events_routed += 1;
        Ok(())
    }

    fn broadcast_roster(&self, out: &dyn Broadcaster) {
        let count = out.to_all(&ServerEvent::UsersList(self.registry.roster()));
        debug!(users = self.registry.len(), recipients = count, "Roster broadcast");
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Router statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    /// Number of live connections.
    pub connection_count: usize,
    /// Client events handled successfully.
    pub events_routed: u64,
}

fn on_chat_message(
    _from: &ConnectionId,
    event: ClientEvent,
    out: &dyn Broadcaster,
) -> Result<(), RouterError> {
    let msg = event.args.into_iter().next();
    info!(message = ?msg, "Message received");

    out.to_all(&ServerEvent::SendMessageToAll(msg));
    Ok(())
}

fn on_private_message(
    from: &ConnectionId,
    event: ClientEvent,
    out: &dyn Broadcaster,
) -> Result<(), RouterError> {
    let payload = event
        .args
        .into_iter()
        .next()
        .ok_or_else(|| RouterError::MalformedPayload {
            event: names::PRIVATE_MESSAGE,
            reason: "missing payload".into(),
        })?;
    let PrivateMessage {
        recipient_id,
        message,
    } = serde_json::from_value(payload).map_err(|e| RouterError::MalformedPayload {
        event: names::PRIVATE_MESSAGE,
        reason: e.to_string(),
    })?;

    info!(from = %from, to = %recipient_id, message = ?message, "Private message");

    // The recipient is not checked against the registry; the sender is
    // confirmed even when nobody received the message.
    let recipient = ConnectionId::new(recipient_id);
    let delivered = out.to_one(
        &recipient,
        &ServerEvent::ReceivePrivateMessage {
            from: from.to_string(),
            message: message.clone(),
        },
    );
    if delivered == 0 {
        debug!(from = %from, to = %recipient, "Private message recipient not connected");
    }

    out.to_one(
        from,
        &ServerEvent::PrivateMessageSent {
            to: recipient.to_string(),
            message,
        },
    );
    Ok(())
}

fn on_typing(
    from: &ConnectionId,
    _event: ClientEvent,
    out: &dyn Broadcaster,
) -> Result<(), RouterError> {
    out.to_all_except(from, &ServerEvent::ShowTypingStatus);
    Ok(())
}

fn on_stop_typing(
    from: &ConnectionId,
    _event: ClientEvent,
    out: &dyn Broadcaster,
) -> Result<(), RouterError> {
    out.to_all_except(from, &ServerEvent::HideTypingStatus);
    Ok(())
}
