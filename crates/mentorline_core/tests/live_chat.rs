//! End-to-end scenarios over an in-memory transport pair.
//!
//! The fake connector hands the manager one side of an mpsc pair and keeps
//! the "server" side for the test, so connection lifecycle, live chat and
//! notification delivery run against the real public API with no network.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use mentorline_core::config::{ClientConfig, ReconnectPolicy};
use mentorline_core::connection::{ConnectionStatus, SocketEvent, SocketManager};
use mentorline_core::conversation::{ConversationChannel, ConversationEvent, ConversationHandler};
use mentorline_core::error::ChatError;
use mentorline_core::event::{
    ClientEvent, MessagesRead, Notification, ServerEvent, SessionStarted,
};
use mentorline_core::message::{ChatPayload, DeliveryStatus, MessageKind};
use mentorline_core::notification::{NotificationHandler, NotificationListener};
use mentorline_core::session::{Role, SessionGate, User};
use mentorline_core::transport::{SocketTransport, TransportConnector, TransportError, WsMessage};

const WAIT: Duration = Duration::from_secs(2);

// ==================== In-memory transport ====================

struct FakeTransport {
    incoming: mpsc::UnboundedReceiver<Result<WsMessage, TransportError>>,
    outgoing: mpsc::UnboundedSender<WsMessage>,
}

#[async_trait::async_trait]
impl SocketTransport for FakeTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.outgoing
            .send(WsMessage::Text(text))
            .map_err(|_| TransportError::SendFailed("server side closed".to_string()))
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.outgoing
            .send(WsMessage::Ping(vec![]))
            .map_err(|_| TransportError::SendFailed("server side closed".to_string()))
    }

    async fn recv(&mut self) -> Option<Result<WsMessage, TransportError>> {
        self.incoming.recv().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// The server half of the most recent fake connection.
struct ServerSide {
    from_client: mpsc::UnboundedReceiver<WsMessage>,
    to_client: mpsc::UnboundedSender<Result<WsMessage, TransportError>>,
}

impl ServerSide {
    fn push_event(&self, event: &ServerEvent) {
        let frame = serde_json::to_string(event).unwrap();
        self.push_text(&frame);
    }

    fn push_text(&self, text: &str) {
        self.to_client
            .send(Ok(WsMessage::Text(text.to_string())))
            .unwrap();
    }

    async fn next_text(&mut self) -> Option<String> {
        while let Some(message) = self.from_client.recv().await {
            if let WsMessage::Text(text) = message {
                return Some(text);
            }
        }
        None
    }
}

#[derive(Clone, Default)]
struct FakeConnector {
    dials: Arc<AtomicUsize>,
    refuse: Arc<AtomicBool>,
    server: Arc<StdMutex<Option<ServerSide>>>,
}

impl FakeConnector {
    fn take_server(&self) -> ServerSide {
        self.server
            .lock()
            .unwrap()
            .take()
            .expect("no live connection")
    }
}

#[async_trait::async_trait]
impl TransportConnector for FakeConnector {
    type Transport = FakeTransport;

    async fn connect(&self, _url: &str) -> Result<FakeTransport, TransportError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed("refused".to_string()));
        }
        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        *self.server.lock().unwrap() = Some(ServerSide {
            from_client,
            to_client,
        });
        Ok(FakeTransport { incoming, outgoing })
    }
}

// ==================== Helpers ====================

fn test_user(id: &str) -> User {
    User {
        id: id.to_string(),
        display_name: id.to_uppercase(),
        role: Role::Mentee,
    }
}

fn logged_in_gate(id: &str) -> SessionGate {
    let gate = SessionGate::new();
    gate.set_user(test_user(id));
    gate
}

fn fast_config() -> ClientConfig {
    ClientConfig::new("https://api.test", "wss://socket.test/socket")
        .with_auth("tok")
        .with_reconnect(ReconnectPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(10),
        })
}

fn inbound_payload(message_id: &str, chat_id: &str, ts: &str) -> ChatPayload {
    ChatPayload {
        chat_id: chat_id.to_string(),
        sender_id: "u2".to_string(),
        sender_name: "U2".to_string(),
        receiver_id: "u1".to_string(),
        message_id: message_id.to_string(),
        message: format!("msg {}", message_id),
        kind: MessageKind::Text,
        timestamp: ts.parse().unwrap(),
        attachment: None,
    }
}

async fn wait_for_status(manager: &SocketManager<FakeConnector>, wanted: ConnectionStatus) {
    let mut rx = manager.watch_status();
    timeout(WAIT, async {
        loop {
            if *rx.borrow_and_update() == wanted {
                return;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap_or_else(|_| panic!("status {:?} not reached, at {:?}", wanted, manager.status()));
}

async fn wait_until(cond: impl Fn() -> bool) {
    timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[derive(Default)]
struct RecordingHandler {
    events: StdMutex<Vec<ConversationEvent>>,
}

impl RecordingHandler {
    fn events(&self) -> Vec<ConversationEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ConversationHandler for RecordingHandler {
    fn on_event(&self, event: ConversationEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ==================== Connection lifecycle ====================

#[tokio::test]
async fn connect_without_login_is_refused() {
    let connector = FakeConnector::default();
    let manager = SocketManager::new(fast_config(), connector.clone(), SessionGate::new());

    manager.connect().await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(connector.dials.load(Ordering::SeqCst), 0);
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn second_connect_is_a_no_op() {
    let connector = FakeConnector::default();
    let manager = SocketManager::new(fast_config(), connector.clone(), logged_in_gate("u1"));

    manager.connect().await;
    wait_for_status(&manager, ConnectionStatus::Connected).await;
    manager.connect().await;
    manager.connect().await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(connector.dials.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reconnect_is_one_disconnect_then_one_connect() {
    let connector = FakeConnector::default();
    let manager = SocketManager::new(fast_config(), connector.clone(), logged_in_gate("u1"));
    let mut events = manager.subscribe();

    manager.connect().await;
    wait_for_status(&manager, ConnectionStatus::Connected).await;
    match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
        SocketEvent::Connected { generation } => assert_eq!(generation, 1),
        other => panic!("expected Connected, got {:?}", other),
    }

    manager.reconnect().await;
    wait_for_status(&manager, ConnectionStatus::Connected).await;

    // Exactly one connection-lost then one connection-established, never
    // two disconnects.
    assert!(matches!(
        timeout(WAIT, events.recv()).await.unwrap().unwrap(),
        SocketEvent::Disconnected
    ));
    match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
        SocketEvent::Connected { generation } => assert_eq!(generation, 2),
        other => panic!("expected Connected, got {:?}", other),
    }
    assert_eq!(connector.dials.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn retry_budget_exhaustion_surfaces_unavailable() {
    let connector = FakeConnector::default();
    connector.refuse.store(true, Ordering::SeqCst);
    let manager = SocketManager::new(fast_config(), connector.clone(), logged_in_gate("u1"));

    manager.connect().await;
    wait_for_status(&manager, ConnectionStatus::Unavailable).await;
    assert_eq!(connector.dials.load(Ordering::SeqCst), 3);

    // Terminal until the next explicit connect, which starts a fresh budget.
    connector.refuse.store(false, Ordering::SeqCst);
    manager.connect().await;
    wait_for_status(&manager, ConnectionStatus::Connected).await;
}

#[tokio::test]
async fn session_gate_drives_lifecycle() {
    let connector = FakeConnector::default();
    let gate = SessionGate::new();
    let manager = SocketManager::new(fast_config(), connector.clone(), gate.clone());
    let _watcher = manager.watch_session();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(connector.dials.load(Ordering::SeqCst), 0);

    gate.set_user(test_user("u1"));
    wait_for_status(&manager, ConnectionStatus::Connected).await;

    gate.clear_user();
    wait_for_status(&manager, ConnectionStatus::Disconnected).await;
    assert_eq!(connector.dials.load(Ordering::SeqCst), 1);
}

// ==================== Live conversation ====================

#[tokio::test]
async fn optimistic_send_reconciles_on_echo_then_reads() {
    let connector = FakeConnector::default();
    let manager = SocketManager::new(fast_config(), connector.clone(), logged_in_gate("u1"));
    manager.connect().await;
    wait_for_status(&manager, ConnectionStatus::Connected).await;
    let mut server = connector.take_server();

    let channel = ConversationChannel::new(Arc::clone(&manager), "c1", test_user("u1"), "u2");
    let handler = Arc::new(RecordingHandler::default());
    let _handle = channel
        .attach(handler.clone() as Arc<dyn ConversationHandler>)
        .expect("first attach");
    // Attaching twice must not duplicate the subscription.
    assert!(channel
        .attach(handler.clone() as Arc<dyn ConversationHandler>)
        .is_none());

    let message = channel.send("hello", MessageKind::Text, None).await.unwrap();
    assert_eq!(message.status, DeliveryStatus::Pending);

    // The server sees the frame and echoes it back to the sender.
    let frame = timeout(WAIT, server.next_text()).await.unwrap().unwrap();
    let ClientEvent::LiveMessage(payload) = serde_json::from_str(&frame).unwrap();
    assert_eq!(payload.message_id, message.message_id);
    server.push_event(&ServerEvent::LiveMessage(payload));

    wait_until(|| channel.history_snapshot()[0].status == DeliveryStatus::Sent).await;
    // One history entry, not two.
    assert_eq!(channel.history_snapshot().len(), 1);
    assert!(handler.events().iter().any(|e| matches!(
        e,
        ConversationEvent::MessageSent { message_id } if *message_id == message.message_id
    )));

    // The peer reads it.
    server.push_event(&ServerEvent::MessagesRead(MessagesRead {
        chat_id: "c1".to_string(),
        reader_id: "u2".to_string(),
        message_ids: vec![message.message_id.clone()],
    }));
    wait_until(|| channel.history_snapshot()[0].status == DeliveryStatus::Read).await;
}

#[tokio::test]
async fn inbound_messages_are_ordered_and_scoped() {
    let connector = FakeConnector::default();
    let manager = SocketManager::new(fast_config(), connector.clone(), logged_in_gate("u1"));
    manager.connect().await;
    wait_for_status(&manager, ConnectionStatus::Connected).await;
    let server = connector.take_server();

    let channel = ConversationChannel::new(Arc::clone(&manager), "c1", test_user("u1"), "u2");
    let handler = Arc::new(RecordingHandler::default());
    let _handle = channel.attach(handler).expect("first attach");

    // Out-of-order arrival, plus one message for another conversation.
    server.push_event(&ServerEvent::LiveMessage(inbound_payload(
        "m3", "c1", "2025-11-03T10:00:03Z",
    )));
    server.push_event(&ServerEvent::LiveMessage(inbound_payload(
        "other", "c2", "2025-11-03T10:00:00Z",
    )));
    server.push_event(&ServerEvent::LiveMessage(inbound_payload(
        "m1", "c1", "2025-11-03T10:00:01Z",
    )));
    server.push_event(&ServerEvent::LiveMessage(inbound_payload(
        "m2", "c1", "2025-11-03T10:00:02Z",
    )));

    wait_until(|| channel.history_snapshot().len() == 3).await;
    let ids: Vec<String> = channel
        .history_snapshot()
        .iter()
        .map(|m| m.message_id.clone())
        .collect();
    assert_eq!(ids, vec!["m1", "m2", "m3"]);
}

#[tokio::test]
async fn send_without_connection_keeps_pending() {
    let manager = SocketManager::new(
        fast_config(),
        FakeConnector::default(),
        logged_in_gate("u1"),
    );
    let channel = ConversationChannel::new(manager, "c1", test_user("u1"), "u2");

    let err = channel
        .send("hello", MessageKind::Text, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::NotConnected));

    // The optimistic entry is retained; the caller decides what to do.
    let history = channel.history_snapshot();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, DeliveryStatus::Pending);
    assert!(channel.mark_send_failed(&history[0].message_id));
}

#[tokio::test]
async fn detach_stops_callbacks() {
    let connector = FakeConnector::default();
    let manager = SocketManager::new(fast_config(), connector.clone(), logged_in_gate("u1"));
    manager.connect().await;
    wait_for_status(&manager, ConnectionStatus::Connected).await;
    let server = connector.take_server();

    let channel = ConversationChannel::new(Arc::clone(&manager), "c1", test_user("u1"), "u2");
    let handler = Arc::new(RecordingHandler::default());
    let handle = channel
        .attach(handler.clone() as Arc<dyn ConversationHandler>)
        .expect("first attach");

    handle.detach();
    assert!(!channel.is_attached());

    server.push_event(&ServerEvent::LiveMessage(inbound_payload(
        "m1", "c1", "2025-11-03T10:00:01Z",
    )));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(handler.events().is_empty());
    assert!(channel.history_snapshot().is_empty());

    // A fresh attach works after detach.
    assert!(channel.attach(handler).is_some());
}

// ==================== Notifications ====================

#[derive(Default)]
struct RecordingNotifications {
    notifications: StdMutex<Vec<Notification>>,
    sessions: StdMutex<Vec<SessionStarted>>,
}

impl NotificationHandler for RecordingNotifications {
    fn on_notification(&self, notification: Notification) {
        self.notifications.lock().unwrap().push(notification);
    }

    fn on_session_started(&self, session: SessionStarted) {
        self.sessions.lock().unwrap().push(session);
    }
}

#[tokio::test]
async fn notification_listener_receives_named_events() {
    let connector = FakeConnector::default();
    let manager = SocketManager::new(fast_config(), connector.clone(), logged_in_gate("u1"));
    manager.connect().await;
    wait_for_status(&manager, ConnectionStatus::Connected).await;
    let server = connector.take_server();

    let handler = Arc::new(RecordingNotifications::default());
    let _handle = NotificationListener::attach(
        &manager,
        handler.clone() as Arc<dyn NotificationHandler>,
    );

    // An unknown event name is dropped at the decode boundary.
    server.push_text(r#"{"event":"typing_indicator","data":{}}"#);

    server.push_event(&ServerEvent::NewNotification(Notification {
        id: "n1".to_string(),
        kind: "booking_request".to_string(),
        title: "New booking".to_string(),
        body: String::new(),
        created_at: "2025-11-03T10:00:00Z".parse().unwrap(),
    }));
    server.push_event(&ServerEvent::SessionStarted(SessionStarted {
        session_id: "s1".to_string(),
        mentor_id: "u9".to_string(),
        mentee_id: "u1".to_string(),
        starts_at: "2025-11-03T11:00:00Z".parse().unwrap(),
    }));

    wait_until(|| {
        handler.notifications.lock().unwrap().len() == 1
            && handler.sessions.lock().unwrap().len() == 1
    })
    .await;
    assert_eq!(handler.notifications.lock().unwrap()[0].id, "n1");
}
