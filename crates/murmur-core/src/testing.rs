//! Fake transport for router and dispatcher tests.

use murmur_protocol::ServerEvent;
use murmur_transport::{Broadcaster, ConnectionId};
use std::collections::HashMap;
use std::sync::Mutex;

/// Records what every simulated connection would have received.
#[derive(Debug, Default)]
pub struct FakeTransport {
    live: Mutex<Vec<ConnectionId>>,
    inboxes: Mutex<HashMap<ConnectionId, Vec<ServerEvent>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring a socket up, before the router hears about it.
    pub fn open(&self, id: &str) -> ConnectionId {
        let id = ConnectionId::new(id);
        self.live.lock().unwrap().push(id.clone());
        id
    }

    /// Take a socket down, before the router hears about it.
    pub fn close(&self, id: &ConnectionId) {
        self.live.lock().unwrap().retain(|live| live != id);
    }

    /// Everything delivered to `id` so far.
    pub fn received(&self, id: &ConnectionId) -> Vec<ServerEvent> {
        self.inboxes
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    /// Names of everything delivered to `id` so far.
    pub fn received_names(&self, id: &ConnectionId) -> Vec<&'static str> {
        self.received(id).iter().map(ServerEvent::name).collect()
    }

    /// Forget all deliveries.
    pub fn clear(&self) {
        self.inboxes.lock().unwrap().clear();
    }

    fn deliver(&self, targets: Vec<ConnectionId>, event: &ServerEvent) -> usize {
        let mut inboxes = self.inboxes.lock().unwrap();
        for id in &targets {
            inboxes.entry(id.clone()).or_default().push(event.clone());
        }
        targets.len()
    }
}

impl Broadcaster for FakeTransport {
    fn to_all(&self, event: &ServerEvent) -> usize {
        let targets = self.live.lock().unwrap().clone();
        self.deliver(targets, event)
    }

    fn to_one(&self, id: &ConnectionId, event: &ServerEvent) -> usize {
        let targets: Vec<_> = self
            .live
            .lock()
            .unwrap()
            .iter()
            .filter(|live| *live == id)
            .cloned()
            .collect();
        self.deliver(targets, event)
    }

    fn to_all_except(&self, except: &ConnectionId, event: &ServerEvent) -> usize {
        let targets: Vec<_> = self
            .live
            .lock()
            .unwrap()
            .iter()
            .filter(|live| *live != except)
            .cloned()
            .collect();
        self.deliver(targets, event)
    }
}
