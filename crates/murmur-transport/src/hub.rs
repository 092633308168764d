//! In-process broadcast domain.
//!
//! The hub maps each live connection to the sending half of its outbox.
//! Connection tasks attach on namespace connect, drain the receiver into
//! their socket, and detach when the socket goes away.

use crate::traits::{Broadcaster, ConnectionId, TransportError};
use dashmap::DashMap;
use murmur_protocol::{Packet, ServerEvent};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Receiving half of a connection's outbox.
pub type OutboxReceiver = mpsc::UnboundedReceiver<Arc<Packet>>;

type Outbox = mpsc::UnboundedSender<Arc<Packet>>;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum number of attached connections.
    pub max_connections: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: 100_000,
        }
    }
}

/// Fan-out of server events to live connections.
#[derive(Debug)]
pub struct ConnectionHub {
    outboxes: DashMap<ConnectionId, Outbox>,
    // Slots reserved against `max_connections`; never exceeds it.
    reserved: AtomicUsize,
    config: HubConfig,
}

impl ConnectionHub {
    /// Create a hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a hub with custom configuration.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        Self {
            outboxes: DashMap::new(),
            reserved: AtomicUsize::new(0),
            config,
        }
    }

    /// Attach a connection and return its outbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is already attached or the hub is full.
    pub fn attach(&self, id: ConnectionId) -> Result<OutboxReceiver, TransportError> {
        let max = self.config.max_connections;
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .map_err(|_| TransportError::CapacityReached(max))?;

        match self.outboxes.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                self.reserved.fetch_sub(1, Ordering::AcqRel);
                Err(TransportError::AlreadyAttached(entry.key().clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let (tx, rx) = mpsc::unbounded_channel();
                debug!(connection = %entry.key(), "Attached to hub");
                entry.insert(tx);
                Ok(rx)
            }
        }
    }

    /// Detach a connection.
    ///
    /// Returns `true` if the connection was attached.
    pub fn detach(&self, id: &ConnectionId) -> bool {
        let removed = self.outboxes.remove(id).is_some();
        if removed {
            self.reserved.fetch_sub(1, Ordering::AcqRel);
            debug!(connection = %id, "Detached from hub");
        }
        removed
    }

    /// Check if a connection is attached.
    #[must_use]
    pub fn is_attached(&self, id: &ConnectionId) -> bool {
        self.outboxes.contains_key(id)
    }

    /// Number of attached connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outboxes.len()
    }

    /// Check if no connection is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outboxes.is_empty()
    }

    fn fan_out(&self, event: &ServerEvent, skip: Option<&ConnectionId>) -> usize {
        let packet = Arc::new(event.to_packet());
        let mut delivered = 0;

        for entry in self.outboxes.iter() {
            if skip == Some(entry.key()) {
                continue;
            }
            // A closed outbox means the connection task is already tearing down.
            if entry.value().send(Arc::clone(&packet)).is_ok() {
                delivered += 1;
            }
        }

        trace!(event = event.name(), recipients = delivered, "Fan-out");
        delivered
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster for ConnectionHub {
    fn to_all(&self, event: &ServerEvent) -> usize {
        self.fan_out(event, None)
    }

    fn to_one(&self, id: &ConnectionId, event: &ServerEvent) -> usize {
        match self.outboxes.get(id) {
            Some(outbox) => usize::from(outbox.send(Arc::new(event.to_packet())).is_ok()),
            None => {
                trace!(event = event.name(), connection = %id, "Direct send to unknown connection");
                0
            }
        }
    }

    fn to_all_except(&self, except: &ConnectionId, event: &ServerEvent) -> usize {
        self.fan_out(event, Some(except))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event_name(packet: &Packet) -> &str {
        match packet {
            Packet::Event { name, .. } => name,
            other => panic!("Expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_attach_detach() {
        let hub = ConnectionHub::new();
        let id = ConnectionId::new("conn-1");

        let _rx = hub.attach(id.clone()).unwrap();
        assert!(hub.is_attached(&id));
        assert!(matches!(
            hub.attach(id.clone()),
            Err(TransportError::AlreadyAttached(_))
        ));

        assert!(hub.detach(&id));
        assert!(!hub.detach(&id));
        assert!(hub.is_empty());
    }

    #[test]
    fn test_capacity() {
        let hub = ConnectionHub::with_config(HubConfig { max_connections: 1 });
        let _rx = hub.attach("a".into()).unwrap();
        assert!(matches!(
            hub.attach("b".into()),
            Err(TransportError::CapacityReached(1))
        ));

        // A refused duplicate does not hold a slot, a detach frees one.
        assert!(hub.attach("a".into()).is_err());
        assert!(hub.detach(&"a".into()));
        let _rx = hub.attach("b".into()).unwrap();
    }

    #[test]
    fn test_capacity_holds_under_concurrent_attach() {
        let hub = ConnectionHub::with_config(HubConfig { max_connections: 8 });

        let attached = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..32)
                .map(|i| {
                    let hub = &hub;
                    scope.spawn(move || hub.attach(ConnectionId::new(format!("conn-{i}"))))
                })
                .collect();
            workers
                .into_iter()
                .map(|w| w.join().unwrap())
                .filter_map(Result::ok)
                .collect::<Vec<_>>()
        });

        assert_eq!(attached.len(), 8);
        assert_eq!(hub.len(), 8);
    }

    #[test]
    fn test_to_all_and_except() {
        let hub = ConnectionHub::new();
        let a = ConnectionId::new("A");
        let mut rx_a = hub.attach(a.clone()).unwrap();
        let mut rx_b = hub.attach("B".into()).unwrap();

        assert_eq!(
            hub.to_all(&ServerEvent::SendMessageToAll(Some(json!("hi")))),
            2
        );
        assert_eq!(event_name(&rx_a.try_recv().unwrap()), "send_message_to_all");
        assert_eq!(event_name(&rx_b.try_recv().unwrap()), "send_message_to_all");

        assert_eq!(hub.to_all_except(&a, &ServerEvent::ShowTypingStatus), 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(event_name(&rx_b.try_recv().unwrap()), "show_typing_status");
    }

    #[test]
    fn test_to_one_unknown_is_noop() {
        let hub = ConnectionHub::new();
        let mut rx = hub.attach("A".into()).unwrap();

        let event = ServerEvent::YourId("ZZZ".into());
        assert_eq!(hub.to_one(&"ZZZ".into(), &event), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_is_not_counted() {
        let hub = ConnectionHub::new();
        let rx = hub.attach("A".into()).unwrap();
        let _rx_b = hub.attach("B".into()).unwrap();
        drop(rx);

        assert_eq!(hub.to_all(&ServerEvent::HideTypingStatus), 1);
    }
}
