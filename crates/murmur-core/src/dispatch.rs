//! Single-stream event dispatch.
//!
//! Connection tasks never touch the router. They push [`Inbound`] values
//! into the dispatcher's queue, and one task applies them in arrival order,
//! so the registry needs no lock.

use crate::router::{Router, RouterError};
use murmur_protocol::ClientEvent;
use murmur_transport::{Broadcaster, ConnectionId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Everything the router reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A client joined the default namespace.
    Connect(ConnectionId),
    /// A joined client went away.
    Disconnect(ConnectionId),
    /// A joined client emitted an event.
    Event {
        from: ConnectionId,
        event: ClientEvent,
    },
}

/// Producer side of the dispatcher queue.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl DispatcherHandle {
    /// Queue an inbound value.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher has stopped.
    pub fn send(&self, inbound: Inbound) -> Result<(), RouterError> {
        self.tx
            .send(inbound)
            .map_err(|_| RouterError::DispatcherClosed)
    }

    /// Queue a connect.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher has stopped.
    pub fn connect(&self, id: ConnectionId) -> Result<(), RouterError> {
        self.send(Inbound::Connect(id))
    }

    /// Queue a disconnect.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher has stopped.
    pub fn disconnect(&self, id: ConnectionId) -> Result<(), RouterError> {
        self.send(Inbound::Disconnect(id))
    }

    /// Queue a client event.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher has stopped.
    pub fn event(&self, from: ConnectionId, event: ClientEvent) -> Result<(), RouterError> {
        self.send(Inbound::Event { from, event })
    }

    /// Check if the dispatcher has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The task that owns the router.
pub struct Dispatcher<B> {
    router: Router,
    broadcaster: B,
    rx: mpsc::UnboundedReceiver<Inbound>,
}

impl<B: Broadcaster + 'static> Dispatcher<B> {
    /// Create a dispatcher and its handle.
    #[must_use]
    pub fn new(router: Router, broadcaster: B) -> (Self, DispatcherHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            router,
            broadcaster,
            rx,
        };
        (dispatcher, DispatcherHandle { tx })
    }

    /// Process inbound values until every handle is dropped.
    ///
    /// Handler errors are logged and never stop the loop. Returns the router
    /// so its final state can be inspected.
    pub async fn run(mut self) -> Router {
        info!(events = ?self.router.events(), "Dispatcher started");

        while let Some(inbound) = self.rx.recv().await {
            let from = match &inbound {
                Inbound::Event { from, event } => {
                    debug!(connection = %from, event = %event.name, "Dispatching");
                    Some(from.clone())
                }
                _ => None,
            };

            if let Err(e) = self.router.handle(inbound, &self.broadcaster) {
                warn!(connection = ?from.as_ref().map(ConnectionId::as_str), error = %e, "Event rejected");
            }
        }

        info!(stats = ?self.router.stats(), "Dispatcher stopped");
        self.router
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self) -> JoinHandle<Router> {
        tokio::spawn(self.run())
    }
}
