//! Engine.IO long-polling transport.
//!
//! A polling session keeps its driver running between requests. POST
//! bodies are split into frames for the driver; a GET waits for queued
//! packets and returns them as one body. Only one GET may be pending per
//! session.

use crate::connection::{self, Incoming, Output};
use crate::handlers::AppState;
use crate::metrics;
use anyhow::{anyhow, Result};
use murmur_protocol::{codec, Encoding, Packet};
use murmur_transport::{ConnectionId, Session, SessionTransport, TransportError};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// Request-side handle of a polling session.
pub struct PollHandle {
    incoming: mpsc::UnboundedSender<Incoming>,
    outgoing: Mutex<mpsc::UnboundedReceiver<Packet>>,
}

impl PollHandle {
    /// Create a handle plus the driver's ends of both queues.
    pub fn new() -> (Arc<Self>, Output, mpsc::UnboundedReceiver<Incoming>) {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let handle = Arc::new(Self {
            incoming: incoming_tx,
            outgoing: Mutex::new(outgoing_rx),
        });
        (handle, Output::Polling(outgoing_tx), incoming_rx)
    }

    /// Queue into the session's driver.
    pub fn incoming(&self) -> &mpsc::UnboundedSender<Incoming> {
        &self.incoming
    }

    /// Hand a POST body to the driver.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the driver has stopped.
    pub fn deliver(&self, body: &str) -> Result<(), TransportError> {
        for frame in codec::split_payload(body) {
            self.incoming
                .send(Incoming::Frame(frame))
                .map_err(|_| TransportError::ConnectionClosed)?;
        }
        Ok(())
    }

    /// Wait for queued packets and encode them as one body.
    ///
    /// A session that has ended answers with a close packet.
    ///
    /// # Errors
    ///
    /// Returns an error if another poll is already pending.
    pub async fn poll(&self) -> Result<String> {
        let mut queue = self
            .outgoing
            .try_lock()
            .map_err(|_| anyhow!("Overlapping poll"))?;

        let packets = match queue.recv().await {
            Some(first) => {
                let mut packets = vec![first];
                while let Ok(packet) = queue.try_recv() {
                    packets.push(packet);
                }
                packets
            }
            None => vec![Packet::Close],
        };

        let body = codec::encode_payload(&packets)?;
        metrics::record_frame(body.len(), "outbound");
        Ok(body)
    }
}

/// Open a polling session and return its handshake body.
///
/// # Errors
///
/// Returns an error if the open packet cannot be encoded.
pub async fn open(state: Arc<AppState>) -> Result<String> {
    let id = ConnectionId::generate();
    let session = Session::new(id.clone(), Encoding::Text, state.config.session_config())
        .with_transport(SessionTransport::Polling);

    let (handle, output, incoming) = PollHandle::new();
    state.polls.insert(id.clone(), Arc::clone(&handle));
    debug!(connection = %id, "Polling session opened");

    tokio::spawn(connection::run(Arc::clone(&state), session, output, incoming));
    handle.poll().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_protocol::WireFrame;

    #[tokio::test]
    async fn test_poll_drains_queue_in_order() {
        let (handle, output, _incoming) = PollHandle::new();
        let Output::Polling(queue) = output else {
            panic!("Expected polling output");
        };

        queue.send(Packet::connected("abcd1234")).unwrap();
        queue.send(Packet::Ping).unwrap();
        assert_eq!(handle.poll().await.unwrap(), "40{\"sid\":\"abcd1234\"}\u{1e}2");

        drop(queue);
        assert_eq!(handle.poll().await.unwrap(), "1");
    }

    #[tokio::test]
    async fn test_overlapping_poll_is_refused() {
        let (handle, _output, _incoming) = PollHandle::new();
        let _pending = handle.outgoing.lock().await;
        assert!(handle.poll().await.is_err());
    }

    #[tokio::test]
    async fn test_deliver_splits_body() {
        let (handle, _output, mut incoming) = PollHandle::new();
        handle.deliver("40\u{1e}42[\"typing\"]").unwrap();

        for expected in ["40", "42[\"typing\"]"] {
            match incoming.recv().await {
                Some(Incoming::Frame(WireFrame::Text(text))) => assert_eq!(text, expected),
                _ => panic!("Expected a text frame"),
            }
        }

        drop(incoming);
        assert!(matches!(
            handle.deliver("3"),
            Err(TransportError::ConnectionClosed)
        ));
    }
}
