//! Per-connection driver shared by both Engine.IO transports.
//!
//! The driver owns the [`Session`]. Inbound frames arrive through a channel
//! fed either by a WebSocket reader task or by long-polling POSTs, and
//! outbound packets go to whichever transport currently carries the
//! session. A polling session switches its [`Output`] in place when the
//! client upgrades.

use crate::handlers::AppState;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use murmur_protocol::{codec, Encoding, Packet, WireFrame, DEFAULT_NAMESPACE};
use murmur_transport::{OutboxReceiver, Session, SessionAction, TransportError};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

/// Sending half of an upgraded WebSocket.
pub type WsSink = SplitSink<WebSocket, Message>;

/// Input to a connection driver.
pub enum Incoming {
    /// A frame from the client.
    Frame(WireFrame),
    /// The client finished upgrading to this WebSocket.
    Upgrade(WsSink),
    /// The transport went away.
    Closed,
}

/// Where outbound packets go.
pub enum Output {
    /// Queued until the client's next poll.
    Polling(mpsc::UnboundedSender<Packet>),
    /// Written straight to the socket.
    WebSocket(WsSink),
}

impl Output {
    async fn send(&mut self, packet: &Packet, encoding: Encoding) -> Result<()> {
        match self {
            Output::Polling(queue) => queue
                .send(packet.clone())
                .map_err(|_| TransportError::ConnectionClosed)?,
            Output::WebSocket(sink) => send_packet(sink, packet, encoding).await?,
        }
        Ok(())
    }

    async fn close(self) {
        match self {
            Output::Polling(queue) => {
                let _ = queue.send(Packet::Close);
            }
            Output::WebSocket(mut sink) => {
                let _ = sink.close().await;
            }
        }
    }
}

/// Forward WebSocket frames into a driver until either side goes away.
pub async fn forward_frames(
    mut stream: SplitStream<WebSocket>,
    incoming: mpsc::UnboundedSender<Incoming>,
) {
    loop {
        let msg = tokio::select! {
            msg = stream.next() => msg,
            () = incoming.closed() => return,
        };

        let frame = match msg {
            Some(Ok(Message::Text(text))) => WireFrame::Text(text),
            Some(Ok(Message::Binary(data))) => WireFrame::Binary(Bytes::from(data)),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) => {
                debug!("Received close frame");
                break;
            }
            Some(Err(e)) => {
                warn!(error = %e, "WebSocket error");
                metrics::record_error("websocket");
                break;
            }
            None => {
                debug!("WebSocket stream ended");
                break;
            }
        };

        if incoming.send(Incoming::Frame(frame)).is_err() {
            return;
        }
    }

    let _ = incoming.send(Incoming::Closed);
}

/// Wait for the next outbound packet, or forever before the client joins.
async fn next_outbound(outbox: &mut Option<OutboxReceiver>) -> Option<Arc<Packet>> {
    match outbox {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Drive one connection from the open packet to teardown.
pub async fn run(
    state: Arc<AppState>,
    mut session: Session,
    mut output: Output,
    mut incoming: mpsc::UnboundedReceiver<Incoming>,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let id = session.id().clone();
    let encoding = session.encoding();
    debug!(connection = %id, ?encoding, transport = ?session.transport(), "Session opened");

    if let Err(e) = output.send(&session.open_packet(), encoding).await {
        error!(connection = %id, error = %e, "Failed to send open packet");
        state.polls.remove(&id);
        return;
    }

    // Filled once the client joins the default namespace.
    let mut outbox: Option<OutboxReceiver> = None;

    let ping_interval = session.config().ping_interval;
    let mut ping_timer =
        tokio::time::interval_at(tokio::time::Instant::now() + ping_interval, ping_interval);

    loop {
        tokio::select! {
            biased;

            Some(packet) = next_outbound(&mut outbox) => {
                if !session.admit_outbound(&packet) {
                    trace!(connection = %id, "Dropping event queued before greeting");
                    continue;
                }
                if let Err(e) = output.send(&packet, encoding).await {
                    debug!(connection = %id, error = %e, "Outbound send failed");
                    break;
                }
            }

            _ = ping_timer.tick() => {
                let now = Instant::now();
                if let Err(e) = session.heartbeat_mut().check(now) {
                    warn!(connection = %id, error = %e, "Closing session");
                    metrics::record_error("heartbeat");
                    break;
                }
                session.heartbeat_mut().ping_sent(now);
                if output.send(&Packet::Ping, encoding).await.is_err() {
                    break;
                }
            }

            msg = incoming.recv() => match msg {
                Some(Incoming::Frame(frame)) => {
                    match handle_frame(&frame, &mut session, &state, &mut output, &mut outbox).await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => {
                            warn!(connection = %id, error = %e, "Closing session");
                            metrics::record_error("protocol");
                            break;
                        }
                    }
                }
                Some(Incoming::Upgrade(sink)) => {
                    if !session.upgrade() {
                        debug!(connection = %id, "Ignoring second upgrade");
                        continue;
                    }
                    // Releases a pending poll with whatever is still queued.
                    let _ = output.send(&Packet::Noop, encoding).await;
                    output = Output::WebSocket(sink);
                    state.polls.remove(&id);
                }
                Some(Incoming::Closed) | None => {
                    debug!(connection = %id, "Transport closed");
                    break;
                }
            },
        }
    }

    state.polls.remove(&id);

    // Leave the broadcast domain before the roster goes out, so the departing
    // client is not among its recipients.
    if outbox.is_some() {
        state.hub.detach(&id);
        if let Err(e) = state.dispatcher.disconnect(id.clone()) {
            error!(connection = %id, error = %e, "Failed to queue disconnect");
        }
    }

    output.close().await;
    debug!(connection = %id, "Session closed");
}

/// Handle one inbound frame.
///
/// Returns `Ok(false)` when the session should end.
async fn handle_frame(
    frame: &WireFrame,
    session: &mut Session,
    state: &Arc<AppState>,
    output: &mut Output,
    outbox: &mut Option<OutboxReceiver>,
) -> Result<bool> {
    let start = Instant::now();
    metrics::record_frame(frame.len(), "inbound");

    let packet = codec::decode_limited(frame, session.config().max_payload)?;
    let encoding = session.encoding();

    let keep_going = match session.handle(packet) {
        SessionAction::Reply(reply) => {
            output.send(&reply, encoding).await?;
            true
        }
        SessionAction::Join { reply } => match state.hub.attach(session.id().clone()) {
            Ok(rx) => {
                // The connect reply must precede anything the router sends.
                output.send(&reply, encoding).await?;
                *outbox = Some(rx);
                state.dispatcher.connect(session.id().clone())?;
                true
            }
            Err(e) => {
                warn!(connection = %session.id(), error = %e, "Join refused");
                let refusal = Packet::connect_error(DEFAULT_NAMESPACE, e.to_string());
                output.send(&refusal, encoding).await?;
                false
            }
        },
        SessionAction::Event(event) => {
            metrics::record_event(&event.name);
            state.dispatcher.event(session.id().clone(), event)?;
            true
        }
        SessionAction::Close => false,
        SessionAction::Ignore => true,
    };

    metrics::record_latency(start.elapsed().as_secs_f64());
    Ok(keep_going)
}

/// Send a packet to the WebSocket.
pub async fn send_packet(sink: &mut WsSink, packet: &Packet, encoding: Encoding) -> Result<()> {
    let frame = codec::encode(packet, encoding)?;
    metrics::record_frame(frame.len(), "outbound");

    let message = match frame {
        WireFrame::Text(text) => Message::Text(text),
        WireFrame::Binary(data) => Message::Binary(data.to_vec()),
    };
    sink.send(message).await?;
    Ok(())
}
