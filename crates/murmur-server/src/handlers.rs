//! Connection handlers for the murmur server.
//!
//! This module handles the HTTP routes and the Engine.IO handshake on both
//! transports. Chat semantics live in `murmur-core` and the per-connection
//! loop lives in [`crate::connection`].

use crate::config::Config;
use crate::connection::{self, Incoming, Output};
use crate::metrics;
use crate::polling::{self, PollHandle};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use dashmap::DashMap;
use futures_util::{stream::SplitStream, SinkExt, StreamExt};
use murmur_core::{Dispatcher, DispatcherHandle, Router as EventRouter};
use murmur_protocol::{codec, Encoding, PROTOCOL_VERSION};
use murmur_transport::{ConnectionHub, ConnectionId, Session};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Bundled browser client.
const INDEX_HTML: &str = include_str!("../static/index.html");

/// Engine.IO handshake error codes.
mod engine_error {
    pub const TRANSPORT_UNKNOWN: u8 = 0;
    pub const UNKNOWN_SID: u8 = 1;
    pub const BAD_REQUEST: u8 = 3;
    pub const UNSUPPORTED_PROTOCOL_VERSION: u8 = 5;
}

/// Shared server state.
pub struct AppState {
    /// Broadcast domain of all joined connections.
    pub hub: Arc<ConnectionHub>,
    /// Queue into the event router.
    pub dispatcher: DispatcherHandle,
    /// Server configuration.
    pub config: Config,
    /// Polling sessions that have not upgraded.
    pub(crate) polls: DashMap<ConnectionId, Arc<PollHandle>>,
    /// HTML served at `/`.
    page: String,
}

impl AppState {
    /// Build the state and spawn the dispatcher task.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a configured
    /// static page cannot be read.
    pub fn start(config: Config) -> Result<(Arc<Self>, JoinHandle<EventRouter>)> {
        config.validate()?;

        let page = match &config.transport.static_page {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read static page: {}", path))?,
            None => INDEX_HTML.to_string(),
        };

        let hub = Arc::new(ConnectionHub::with_config(config.hub_config()));
        let (dispatcher, handle) = Dispatcher::new(EventRouter::new(), Arc::clone(&hub));
        let task = dispatcher.spawn();

        let state = Arc::new(Self {
            hub,
            dispatcher: handle,
            config,
            polls: DashMap::new(),
            page,
        });
        Ok((state, task))
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("murmur listening on {}", addr);
    info!("Socket.IO endpoint: {}{}", addr, config.transport.path);

    serve(listener, config, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the state cannot be built or serving fails.
pub async fn serve<F>(listener: TcpListener, config: Config, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let (state, dispatcher) = AppState::start(config)?;
    let app = app(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    dispatcher.abort();
    Ok(())
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route(
            &state.config.transport.path,
            get(socket_handler).post(poll_post_handler),
        )
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

/// Client page handler.
async fn index_handler(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(state.page.clone())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL_VERSION.to_string(),
        "connections": state.hub.len(),
    }))
}

fn handshake_error(code: u8, message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "code": code, "message": message })),
    )
        .into_response()
}

fn text_body(body: String) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=UTF-8")],
        body,
    )
        .into_response()
}

/// Engine.IO transport named in the query string.
enum Transport {
    Polling,
    WebSocket,
}

/// Validate the query shared by every Engine.IO request.
fn engine_query(params: &HashMap<String, String>) -> Result<Transport, Response> {
    let eio = params.get("EIO").map(String::as_str).unwrap_or_default();
    if !PROTOCOL_VERSION.accepts_engine(eio) {
        return Err(handshake_error(
            engine_error::UNSUPPORTED_PROTOCOL_VERSION,
            "Unsupported protocol version",
        ));
    }
    match params.get("transport").map(String::as_str) {
        Some("polling") => Ok(Transport::Polling),
        Some("websocket") => Ok(Transport::WebSocket),
        _ => Err(handshake_error(
            engine_error::TRANSPORT_UNKNOWN,
            "Transport unknown",
        )),
    }
}

/// Look up the polling session named by `sid`.
fn poll_session(state: &AppState, sid: &str) -> Result<Arc<PollHandle>, Response> {
    state
        .polls
        .get(&ConnectionId::from(sid))
        .map(|handle| Arc::clone(handle.value()))
        .ok_or_else(|| handshake_error(engine_error::UNKNOWN_SID, "Session ID unknown"))
}

/// Engine.IO GET: polling handshake, long poll, or WebSocket (new or upgrade).
async fn socket_handler(
    ws: Option<WebSocketUpgrade>,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let transport = match engine_query(&params) {
        Ok(transport) => transport,
        Err(refusal) => return refusal,
    };
    let encoding = Encoding::from_query(params.get("encoding").map(String::as_str));
    let sid = params.get("sid");

    match transport {
        Transport::WebSocket => {
            let Some(ws) = ws else {
                return handshake_error(engine_error::BAD_REQUEST, "Bad request");
            };
            let ws = ws.max_message_size(state.config.limits.max_payload);

            match sid {
                None => ws.on_upgrade(move |socket| handle_websocket(socket, state, encoding)),
                Some(sid) => match poll_session(&state, sid) {
                    Ok(handle) => {
                        let probe_timeout = state.config.session_config().ping_timeout;
                        ws.on_upgrade(move |socket| {
                            upgrade_websocket(socket, handle, probe_timeout)
                        })
                    }
                    Err(refusal) => refusal,
                },
            }
        }
        // Binary packets over polling would need base64 framing.
        Transport::Polling if encoding == Encoding::MessagePack => handshake_error(
            engine_error::BAD_REQUEST,
            "MessagePack encoding requires the websocket transport",
        ),
        Transport::Polling => {
            let body = match sid {
                None => polling::open(state).await,
                Some(sid) => match poll_session(&state, sid) {
                    Ok(handle) => handle.poll().await,
                    Err(refusal) => return refusal,
                },
            };
            match body {
                Ok(body) => text_body(body),
                Err(e) => {
                    debug!(error = %e, "Poll refused");
                    handshake_error(engine_error::BAD_REQUEST, "Bad request")
                }
            }
        }
    }
}

/// Engine.IO POST: packets from a polling client.
async fn poll_post_handler(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
    body: String,
) -> Response {
    match engine_query(&params) {
        Ok(Transport::Polling) => {}
        Ok(Transport::WebSocket) => {
            return handshake_error(engine_error::BAD_REQUEST, "Bad request");
        }
        Err(refusal) => return refusal,
    }
    let Some(sid) = params.get("sid") else {
        return handshake_error(engine_error::BAD_REQUEST, "Bad request");
    };
    let handle = match poll_session(&state, sid) {
        Ok(handle) => handle,
        Err(refusal) => return refusal,
    };

    if body.len() > state.config.limits.max_payload {
        metrics::record_error("payload");
        return StatusCode::PAYLOAD_TOO_LARGE.into_response();
    }

    match handle.deliver(&body) {
        Ok(()) => text_body("ok".to_string()),
        Err(e) => {
            debug!(error = %e, "Post to a closed session");
            handshake_error(engine_error::UNKNOWN_SID, "Session ID unknown")
        }
    }
}

/// A fresh WebSocket session.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, encoding: Encoding) {
    let id = ConnectionId::generate();
    let session = Session::new(id, encoding, state.config.session_config());

    let (sink, stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(connection::forward_frames(stream, tx));

    connection::run(state, session, Output::WebSocket(sink), rx).await;
}

/// Wait for one exact text message.
async fn expect_text(stream: &mut SplitStream<WebSocket>, expected: &str, within: Duration) -> bool {
    matches!(
        tokio::time::timeout(within, stream.next()).await,
        Ok(Some(Ok(Message::Text(text)))) if text == expected
    )
}

/// Move a polling session onto a new WebSocket: probe, then upgrade.
async fn upgrade_websocket(socket: WebSocket, handle: Arc<PollHandle>, probe_timeout: Duration) {
    let (mut sink, mut stream) = socket.split();

    if !expect_text(&mut stream, codec::PROBE_PING, probe_timeout).await {
        debug!("Upgrade probe missing");
        return;
    }
    if sink.send(Message::Text(codec::PROBE_PONG.to_string())).await.is_err() {
        return;
    }
    if !expect_text(&mut stream, codec::UPGRADE, probe_timeout).await {
        debug!("Upgrade not completed");
        return;
    }

    let incoming = handle.incoming().clone();
    drop(handle);
    if incoming.send(Incoming::Upgrade(sink)).is_err() {
        return;
    }
    connection::forward_frames(stream, incoming).await;
}

