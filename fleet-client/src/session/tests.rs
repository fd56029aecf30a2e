use super::*;
use crate::transport::{FrameSink, FrameStream};
use async_trait::async_trait;
use fleetwatch::broker::Envelope;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Server side of one fake connection
struct ServerEnd {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<String>,
}

impl ServerEnd {
    async fn frame(&mut self) -> Value {
        let text = self.from_client.recv().await.unwrap();
        serde_json::from_str(&text).unwrap()
    }

    fn push(&self, envelope: &Envelope) {
        self.to_client
            .send(serde_json::to_string(envelope).unwrap())
            .unwrap();
    }
}

struct FakeSink(mpsc::UnboundedSender<String>);

#[async_trait]
impl FrameSink for FakeSink {
    async fn send(&mut self, text: String) -> Result<(), SessionError> {
        self.0
            .send(text)
            .map_err(|_| SessionError::TransportClosed("server gone".to_string()))
    }

    async fn close(&mut self) {}
}

struct FakeStream(mpsc::UnboundedReceiver<String>);

#[async_trait]
impl FrameStream for FakeStream {
    async fn next_frame(&mut self) -> Option<Result<String, SessionError>> {
        self.0.recv().await.map(Ok)
    }
}

/// In-memory transport; every accepted connection is handed to the test
struct FakeTransport {
    refuse: AtomicBool,
    hang: AtomicBool,
    attempts: AtomicU32,
    accepted: mpsc::UnboundedSender<ServerEnd>,
}

impl FakeTransport {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            refuse: AtomicBool::new(false),
            hang: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
            accepted,
        });
        (transport, rx)
    }

    fn refusing() -> Arc<Self> {
        let (transport, _) = Self::new();
        transport.refuse.store(true, Ordering::SeqCst);
        transport
    }

    /// Accepts the dial but never completes the handshake
    fn hanging() -> Arc<Self> {
        let (transport, _) = Self::new();
        transport.hang.store(true, Ordering::SeqCst);
        transport
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, _url: &str) -> Result<Connection, SessionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(SessionError::Connect("connection refused".to_string()));
        }
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let (client_tx, from_client) = mpsc::unbounded_channel();
        let (to_client, client_rx) = mpsc::unbounded_channel();
        let _ = self.accepted.send(ServerEnd {
            from_client,
            to_client,
        });

        Ok(Connection {
            sink: Box::new(FakeSink(client_tx)),
            stream: Box::new(FakeStream(client_rx)),
        })
    }
}

fn config(max_reconnect_attempts: u32) -> FleetClientConfig {
    FleetClientConfig {
        url: "ws://fake/api/ws".to_string(),
        token: None,
        reconnect_delay: Duration::from_secs(5),
        max_reconnect_attempts,
        heartbeat_interval: Duration::from_secs(30),
        connect_timeout: Duration::from_secs(10),
    }
}

fn events_for(session: &ClientSession, topic: Topic) -> mpsc::UnboundedReceiver<ClientEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    session.subscribe(topic, move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

async fn wait_for_state(session: &ClientSession, state: SessionState) {
    let mut rx = session.watch_state();
    let _ = rx.wait_for(|s| *s == state).await;
}

#[tokio::test(start_paused = true)]
async fn test_cached_subscriptions_replayed_before_caller_messages() {
    let (transport, mut accepted) = FakeTransport::new();
    let session = ClientSession::new(config(10), transport.clone());

    // Both requested before any connection exists
    let _positions = events_for(&session, Topic::Positions);
    let _alerts = events_for(&session, Topic::Alerts);

    session.connect().unwrap();
    let mut server = accepted.recv().await.unwrap();
    assert_eq!(
        server.frame().await,
        json!({"type": "subscribe", "topic": "positions"})
    );
    assert_eq!(
        server.frame().await,
        json!({"type": "subscribe", "topic": "alerts"})
    );

    // Drop the connection mid-stream
    drop(server);
    wait_for_state(&session, SessionState::Reconnecting).await;
    assert!(!session.send(Topic::System, json!("while down")));

    let mut server = accepted.recv().await.unwrap();
    wait_for_state(&session, SessionState::Connected).await;
    assert!(session.send(Topic::System, json!({"hello": "again"})));

    assert_eq!(
        server.frame().await,
        json!({"type": "subscribe", "topic": "positions"})
    );
    assert_eq!(
        server.frame().await,
        json!({"type": "subscribe", "topic": "alerts"})
    );
    assert_eq!(
        server.frame().await,
        json!({"type": "send", "topic": "system", "payload": {"hello": "again"}})
    );
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);

    session.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_while_connected_is_sent_immediately() {
    let (transport, mut accepted) = FakeTransport::new();
    let session = ClientSession::new(config(10), transport);

    session.connect().unwrap();
    let mut server = accepted.recv().await.unwrap();
    wait_for_state(&session, SessionState::Connected).await;

    let _heartbeats = events_for(&session, Topic::Heartbeat);
    assert_eq!(
        server.frame().await,
        json!({"type": "subscribe", "topic": "heartbeat"})
    );

    session.unsubscribe(Topic::Heartbeat);
    assert_eq!(
        server.frame().await,
        json!({"type": "unsubscribe", "topic": "heartbeat"})
    );

    session.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_inbound_frames_reach_topic_callbacks() {
    let (transport, mut accepted) = FakeTransport::new();
    let session = ClientSession::new(config(10), transport);
    let mut system = events_for(&session, Topic::System);
    let mut heartbeats = events_for(&session, Topic::Heartbeat);

    session.connect().unwrap();
    let server = accepted.recv().await.unwrap();

    server.to_client.send("not an envelope".to_string()).unwrap();
    server.push(&Envelope::system("maintenance at noon"));
    server.push(&Envelope::heartbeat(json!({"connections": 1})));

    match system.recv().await.unwrap() {
        ClientEvent::System { message, .. } => {
            assert_eq!(message.as_deref(), Some("maintenance at noon"));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(
        heartbeats.recv().await.unwrap(),
        ClientEvent::Heartbeat(json!({"connections": 1}))
    );

    session.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_sent_while_connected() {
    let (transport, mut accepted) = FakeTransport::new();
    let session = ClientSession::new(config(10), transport);

    session.connect().unwrap();
    let mut server = accepted.recv().await.unwrap();

    let started = Instant::now();
    assert_eq!(server.frame().await, json!({"type": "heartbeat"}));
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(server.frame().await, json!({"type": "heartbeat"}));

    session.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_exhaustion_is_terminal() {
    let transport = FakeTransport::refusing();
    let session = ClientSession::new(config(3), transport.clone());
    let mut system = events_for(&session, Topic::System);

    session.connect().unwrap();
    let result = session.closed().await;

    assert_eq!(result, Err(SessionError::ReconnectExhausted { attempts: 3 }));
    // First attempt plus three retries
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 4);
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(
        system.recv().await.unwrap(),
        ClientEvent::ReconnectExhausted { attempts: 3 }
    );

    // Staying down until the caller asks again
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 4);

    session.connect().unwrap();
    assert_eq!(
        session.closed().await,
        Err(SessionError::ReconnectExhausted { attempts: 3 })
    );
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 8);
}

#[tokio::test(start_paused = true)]
async fn test_hung_connect_times_out_as_failed_attempt() {
    let transport = FakeTransport::hanging();
    let session = ClientSession::new(config(1), transport.clone());

    let started = Instant::now();
    session.connect().unwrap();
    let result = session.closed().await;

    assert_eq!(result, Err(SessionError::ReconnectExhausted { attempts: 1 }));
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);
    // Two timed-out attempts and one delay in between
    assert!(started.elapsed() >= Duration::from_secs(25));
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_cancels_backoff() {
    let transport = FakeTransport::refusing();
    let session = ClientSession::new(
        FleetClientConfig {
            reconnect_delay: Duration::from_secs(600),
            ..config(10)
        },
        transport.clone(),
    );

    session.connect().unwrap();
    wait_for_state(&session, SessionState::Reconnecting).await;

    let started = Instant::now();
    session.dispose().await;
    assert!(started.elapsed() < Duration::from_secs(1));

    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(session.connect(), Err(SessionError::Disposed));
}

#[tokio::test(start_paused = true)]
async fn test_send_when_disconnected_is_dropped() {
    let (transport, _accepted) = FakeTransport::new();
    let session = ClientSession::new(config(10), transport);

    assert!(!session.send(Topic::System, json!({"x": 1})));
    assert_eq!(session.closed().await, Ok(()));
}

#[tokio::test(start_paused = true)]
async fn test_connect_twice_keeps_one_driver() {
    let (transport, mut accepted) = FakeTransport::new();
    let session = ClientSession::new(config(10), transport.clone());

    session.connect().unwrap();
    session.connect().unwrap();
    let _server = accepted.recv().await.unwrap();
    wait_for_state(&session, SessionState::Connected).await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);

    session.dispose().await;
}
