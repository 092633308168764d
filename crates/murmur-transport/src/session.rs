//! Per-connection Engine.IO / Socket.IO session state.
//!
//! A session starts in [`SessionPhase::AwaitingConnect`] right after the
//! open handshake and becomes [`SessionPhase::Joined`] once the client
//! connects to the default namespace. Only joined sessions produce chat
//! events. The session does no I/O; it turns inbound packets into
//! [`SessionAction`]s for the socket loop to carry out.
//!
//! Sessions opened over long-polling advertise the WebSocket upgrade and
//! switch transports once the client completes it.

use crate::traits::{ConnectionId, TransportError};
use murmur_protocol::event::names;
use murmur_protocol::{ClientEvent, Encoding, Handshake, Packet, DEFAULT_NAMESPACE};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interval between server pings.
    pub ping_interval: Duration,
    /// How long to wait for a pong before closing.
    pub ping_timeout: Duration,
    /// Largest accepted inbound frame, in bytes.
    pub max_payload: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_millis(25_000),
            ping_timeout: Duration::from_millis(20_000),
            max_payload: murmur_protocol::codec::DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Heartbeat bookkeeping. The server pings, the client must pong.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    timeout: Duration,
    ping_sent_at: Option<Instant>,
}

impl Heartbeat {
    /// Create a heartbeat tracker.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ping_sent_at: None,
        }
    }

    /// Record an outgoing ping. An unanswered earlier ping keeps its time.
    pub fn ping_sent(&mut self, now: Instant) {
        self.ping_sent_at.get_or_insert(now);
    }

    /// Record an incoming pong.
    pub fn pong_received(&mut self) {
        self.ping_sent_at = None;
    }

    /// Check if the outstanding ping went unanswered for too long.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.ping_sent_at
            .is_some_and(|sent| now.saturating_duration_since(sent) > self.timeout)
    }

    /// Fail with [`TransportError::Timeout`] once the client missed its pong.
    ///
    /// # Errors
    ///
    /// Returns an error if the heartbeat expired.
    pub fn check(&self, now: Instant) -> Result<(), TransportError> {
        if self.is_expired(now) {
            Err(TransportError::Timeout)
        } else {
            Ok(())
        }
    }
}

/// Engine.IO transport currently carrying a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransport {
    /// HTTP long-polling, upgradable to WebSocket.
    Polling,
    /// WebSocket.
    WebSocket,
}

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Handshake sent, waiting for the namespace connect.
    AwaitingConnect,
    /// Connected to the default namespace.
    Joined,
    /// Closed by either side.
    Closed,
}

/// What the socket loop should do with an inbound packet.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Send a packet back to this client only.
    Reply(Packet),
    /// The client joined: attach to the hub, send `reply`, announce the connect.
    Join { reply: Packet },
    /// A chat event for the router.
    Event(ClientEvent),
    /// The session is over.
    Close,
    /// Nothing to do.
    Ignore,
}

/// Engine.IO session for one connection.
#[derive(Debug)]
pub struct Session {
    id: ConnectionId,
    encoding: Encoding,
    config: SessionConfig,
    phase: SessionPhase,
    heartbeat: Heartbeat,
    transport: SessionTransport,
    greeted: bool,
}

impl Session {
    /// Create a session for a freshly upgraded socket.
    #[must_use]
    pub fn new(id: ConnectionId, encoding: Encoding, config: SessionConfig) -> Self {
        let heartbeat = Heartbeat::new(config.ping_timeout);
        Self {
            id,
            encoding,
            config,
            phase: SessionPhase::AwaitingConnect,
            heartbeat,
            transport: SessionTransport::WebSocket,
            greeted: false,
        }
    }

    /// Start the session on another transport.
    #[must_use]
    pub fn with_transport(mut self, transport: SessionTransport) -> Self {
        self.transport = transport;
        self
    }

    /// Connection id.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Packet encoding negotiated for this session.
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Check if the client has joined the default namespace.
    #[must_use]
    pub fn is_joined(&self) -> bool {
        self.phase == SessionPhase::Joined
    }

    /// Heartbeat tracker.
    pub fn heartbeat_mut(&mut self) -> &mut Heartbeat {
        &mut self.heartbeat
    }

    /// Transport currently carrying the session.
    #[must_use]
    pub fn transport(&self) -> SessionTransport {
        self.transport
    }

    /// Move a polling session onto WebSocket.
    ///
    /// Returns `false` if the session is already on WebSocket.
    pub fn upgrade(&mut self) -> bool {
        if self.transport == SessionTransport::WebSocket {
            return false;
        }
        self.transport = SessionTransport::WebSocket;
        debug!(connection = %self.id, "Upgraded to WebSocket");
        true
    }

    /// Gate outbound router events.
    ///
    /// A client is attached to the broadcast domain slightly before the
    /// router processes its connect, so other clients' events can reach its
    /// outbox first. Everything before its own `your_id` is dropped: the
    /// fresh roster follows `your_id` anyway.
    pub fn admit_outbound(&mut self, packet: &Packet) -> bool {
        if !self.greeted {
            match packet {
                Packet::Event { name, .. } if name == names::YOUR_ID => self.greeted = true,
                _ => return false,
            }
        }
        true
    }
    /// Build the Engine.IO open packet.
    #[must_use]
    pub fn open_packet(&self) -> Packet {
        Packet::Open(Handshake {
            sid: self.id.to_string(),
            upgrades: match self.transport {
                SessionTransport::Polling => vec!["websocket".to_string()],
                SessionTransport::WebSocket => Vec::new(),
            },
            ping_interval: self.config.ping_interval.as_millis() as u64,
            ping_timeout: self.config.ping_timeout.as_millis() as u64,
            max_payload: self.config.max_payload as u64,
        })
    }

    /// Handle an inbound packet.
    pub fn handle(&mut self, packet: Packet) -> SessionAction {
        if self.phase == SessionPhase::Closed {
            return SessionAction::Ignore;
        }

        match packet {
            Packet::Pong => {
                self.heartbeat.pong_received();
                SessionAction::Ignore
            }
            Packet::Ping => SessionAction::Reply(Packet::Pong),
            Packet::Noop => SessionAction::Ignore,
            Packet::Close => self.close(),

            Packet::Connect { namespace, .. } if namespace != DEFAULT_NAMESPACE => {
                warn!(connection = %self.id, namespace = %namespace, "Connect to unknown namespace");
                SessionAction::Reply(Packet::connect_error(namespace, "Invalid namespace"))
            }
            Packet::Connect { .. } => match self.phase {
                SessionPhase::AwaitingConnect => {
                    self.phase = SessionPhase::Joined;
                    debug!(connection = %self.id, "Namespace connected");
                    SessionAction::Join {
                        reply: Packet::connected(self.id.as_str()),
                    }
                }
                _ => {
                    debug!(connection = %self.id, "Duplicate namespace connect");
                    SessionAction::Ignore
                }
            },
            Packet::Disconnect { namespace } if namespace == DEFAULT_NAMESPACE => self.close(),

            Packet::Event {
                namespace,
                name,
                args,
                ..
            } if namespace == DEFAULT_NAMESPACE => {
                if self.is_joined() {
                    SessionAction::Event(ClientEvent::new(name, args))
                } else {
                    warn!(connection = %self.id, event = %name, "Event before namespace connect");
                    SessionAction::Ignore
                }
            }

            other => {
                debug!(connection = %self.id, packet = ?other, "Ignoring packet");
                SessionAction::Ignore
            }
        }
    }

    fn close(&mut self) -> SessionAction {
        self.phase = SessionPhase::Closed;
        SessionAction::Close
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> Session {
        Session::new("abcd1234".into(), Encoding::Text, SessionConfig::default())
    }

    fn connect(namespace: &str) -> Packet {
        Packet::Connect {
            namespace: namespace.into(),
            data: None,
        }
    }

    #[test]
    fn test_open_packet() {
        match session().open_packet() {
            Packet::Open(handshake) => {
                assert_eq!(handshake.sid, "abcd1234");
                assert!(handshake.upgrades.is_empty());
                assert_eq!(handshake.ping_interval, 25_000);
                assert_eq!(handshake.ping_timeout, 20_000);
            }
            other => panic!("Expected open, got {:?}", other),
        }
    }

    #[test]
    fn test_polling_session_offers_upgrade() {
        let mut s = session().with_transport(SessionTransport::Polling);
        match s.open_packet() {
            Packet::Open(handshake) => assert_eq!(handshake.upgrades, vec!["websocket"]),
            other => panic!("Expected open, got {:?}", other),
        }

        assert!(s.upgrade());
        assert_eq!(s.transport(), SessionTransport::WebSocket);
        assert!(!s.upgrade());
    }

    #[test]
    fn test_events_before_greeting_are_dropped() {
        let mut s = session();
        let stale_roster = Packet::event("users_list", vec![json!([])]);
        let greeting = Packet::event("your_id", vec![json!("abcd1234")]);

        assert!(!s.admit_outbound(&stale_roster));
        assert!(!s.admit_outbound(&Packet::event("send_message_to_all", vec![json!("hi")])));
        assert!(s.admit_outbound(&greeting));
        assert!(s.admit_outbound(&stale_roster));
    }

    #[test]
    fn test_join_then_events() {
        let mut s = session();

        let early = s.handle(Packet::event("typing", vec![]));
        assert_eq!(early, SessionAction::Ignore);

        match s.handle(connect("/")) {
            SessionAction::Join { reply } => assert_eq!(reply, Packet::connected("abcd1234")),
            other => panic!("Expected join, got {:?}", other),
        }
        assert!(s.is_joined());
        assert_eq!(s.handle(connect("/")), SessionAction::Ignore);

        let action = s.handle(Packet::event("chat message", vec![json!("hi")]));
        assert_eq!(
            action,
            SessionAction::Event(ClientEvent::new("chat message", vec![json!("hi")]))
        );
    }

    #[test]
    fn test_unknown_namespace() {
        let mut s = session();
        assert_eq!(
            s.handle(connect("/admin")),
            SessionAction::Reply(Packet::connect_error("/admin", "Invalid namespace"))
        );
        assert_eq!(s.phase(), SessionPhase::AwaitingConnect);
    }

    #[test]
    fn test_close_paths() {
        let mut s = session();
        s.handle(connect("/"));
        assert_eq!(
            s.handle(Packet::Disconnect {
                namespace: "/".into()
            }),
            SessionAction::Close
        );
        assert_eq!(s.phase(), SessionPhase::Closed);
        assert_eq!(s.handle(Packet::Ping), SessionAction::Ignore);

        let mut s = session();
        assert_eq!(s.handle(Packet::Close), SessionAction::Close);
    }

    #[test]
    fn test_heartbeat() {
        let start = Instant::now();
        let mut hb = Heartbeat::new(Duration::from_secs(20));
        assert!(!hb.is_expired(start + Duration::from_secs(60)));

        hb.ping_sent(start);
        assert!(!hb.is_expired(start + Duration::from_secs(10)));
        assert!(hb.is_expired(start + Duration::from_secs(21)));

        hb.pong_received();
        assert!(!hb.is_expired(start + Duration::from_secs(21)));
    }

    #[test]
    fn test_heartbeat_check() {
        let start = Instant::now();
        let mut hb = Heartbeat::new(Duration::from_secs(20));
        hb.ping_sent(start);

        assert!(hb.check(start + Duration::from_secs(5)).is_ok());
        assert!(matches!(
            hb.check(start + Duration::from_secs(30)),
            Err(TransportError::Timeout)
        ));
    }

    #[test]
    fn test_unanswered_ping_keeps_first_timestamp() {
        let start = Instant::now();
        let mut hb = Heartbeat::new(Duration::from_secs(20));
        hb.ping_sent(start);
        hb.ping_sent(start + Duration::from_secs(15));
        assert!(hb.is_expired(start + Duration::from_secs(21)));
    }
}
