//! The socket manager: owner of the single live connection.
//!
//! `SocketManager` maintains at most one connection to the messaging server
//! and reacts to session changes. Everything else in the crate (the
//! conversation channels, the notification listener) holds a non-owning
//! subscription to the manager's event bus and never touches the socket.
//!
//! # Architecture
//!
//! ```text
//!  SessionGate ──watch──▶ SocketManager ──owns──▶ background socket loop
//!                              │                        │
//!                              │ broadcast bus          │ TransportConnector
//!                              ▼                        ▼
//!                   ConversationChannel /        SocketTransport
//!                   NotificationListener         (tokio-tungstenite)
//! ```
//!
//! Connection failures never panic or throw: dial errors are retried on the
//! configured fixed-delay budget, then surfaced as the terminal
//! [`ConnectionStatus::Unavailable`] state. Every transition is observable
//! on [`SocketManager::watch_status`] and the event bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, mpsc, watch};

use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::event::{ClientEvent, ServerEvent};
use crate::session::SessionGate;
use crate::transport::{SocketTransport, TransportConnector, WsMessage};

const EVENT_BUS_CAPACITY: usize = 256;
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Lifecycle state of the managed connection.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ConnectionStatus {
    /// No connection, none being attempted.
    Disconnected,
    /// Dialing the server.
    Connecting,
    /// Connection established.
    Connected,
    /// Connection lost; retrying on the fixed-delay policy.
    Reconnecting {
        /// Current attempt number.
        attempt: u32,
    },
    /// Retry budget exhausted. Terminal until the next explicit `connect`.
    Unavailable,
}

/// Events published on the manager's bus.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// A connection was established. `generation` increases by one per
    /// established connection, so subscribers can tell reconnects apart.
    Connected {
        /// Connection generation number.
        generation: u64,
    },
    /// The live connection was lost or closed.
    Disconnected,
    /// A connection-level error: dial failure, mid-session transport error,
    /// or the terminal retry-budget exhaustion.
    ConnectionError {
        /// Human-readable description.
        message: String,
    },
    /// A named server event, decoded at the envelope boundary.
    Server(ServerEvent),
}

#[derive(Default)]
struct Link {
    outgoing: Option<mpsc::UnboundedSender<String>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

/// Owner of the single live connection to the messaging server.
pub struct SocketManager<C: TransportConnector> {
    config: ClientConfig,
    connector: C,
    gate: SessionGate,
    status: watch::Sender<ConnectionStatus>,
    events: broadcast::Sender<SocketEvent>,
    running: AtomicBool,
    generation: AtomicU64,
    link: Mutex<Link>,
}

impl<C> SocketManager<C>
where
    C: TransportConnector + 'static,
{
    /// Create a manager. No connection is opened until [`connect`] is
    /// called (or [`watch_session`] observes a login).
    ///
    /// [`connect`]: SocketManager::connect
    /// [`watch_session`]: SocketManager::watch_session
    pub fn new(config: ClientConfig, connector: C, gate: SessionGate) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Arc::new(Self {
            config,
            connector,
            gate,
            status,
            events,
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            link: Mutex::new(Link::default()),
        })
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Subscribe to status changes (e.g., for a degraded/offline indicator).
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Subscribe to the event bus.
    ///
    /// The bus belongs to the manager and outlives any individual
    /// connection, so subscriptions survive reconnects.
    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.events.subscribe()
    }

    /// Open the connection.
    ///
    /// No-op unless the session gate reports logged-in; no-op if a
    /// connection is already live or being dialed. Dial failures are
    /// retried on the configured policy and never thrown; observe
    /// [`watch_status`](SocketManager::watch_status) and the bus instead.
    pub async fn connect(self: &Arc<Self>) {
        if !self.gate.is_logged_in() {
            log::warn!("[SocketManager] connect ignored: not logged in");
            return;
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("[SocketManager] connect ignored: already connected");
            return;
        }

        let url = match self.config.dial_url() {
            Ok(url) => url,
            Err(e) => {
                log::error!("[SocketManager] invalid socket URL: {}", e);
                self.running.store(false, Ordering::SeqCst);
                return;
            }
        };

        self.status.send_replace(ConnectionStatus::Connecting);

        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let manager = Arc::clone(self);
        let task = tokio::spawn(async move {
            manager.run_socket_loop(url, rx).await;
        });

        let mut link = self.link.lock().await;
        link.outgoing = Some(tx);
        link.task = Some(task);
    }

    /// Close the connection. Idempotent: always stops the loop and clears
    /// the stored link, whatever state it was in.
    pub async fn disconnect(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);

        let mut link = self.link.lock().await;
        link.outgoing = None;
        if let Some(task) = link.task.take() {
            task.abort();
        }
        drop(link);

        let was_connected = matches!(self.status(), ConnectionStatus::Connected);
        self.status.send_replace(ConnectionStatus::Disconnected);
        if was_connected {
            let _ = self.events.send(SocketEvent::Disconnected);
        }
        if was_running {
            log::info!("[SocketManager] disconnected");
        }
    }

    /// Tear down the connection and dial again: exactly one disconnect
    /// followed by exactly one connect.
    pub async fn reconnect(self: &Arc<Self>) {
        self.disconnect().await;
        self.connect().await;
    }

    /// Send a named event over the live connection.
    ///
    /// Fails with [`ChatError::NotConnected`] when no connection is live
    /// (including while a dial or reconnect is in progress) rather than
    /// queueing or hanging.
    pub async fn send_event(&self, event: &ClientEvent) -> Result<(), ChatError> {
        if !matches!(self.status(), ConnectionStatus::Connected) {
            return Err(ChatError::NotConnected);
        }
        let frame = serde_json::to_string(event)?;
        let link = self.link.lock().await;
        match link.outgoing.as_ref() {
            Some(tx) if tx.send(frame).is_ok() => Ok(()),
            _ => Err(ChatError::NotConnected),
        }
    }

    /// Drive the connection from session changes: connect on login,
    /// disconnect on logout. The returned task runs until the gate is
    /// dropped.
    pub fn watch_session(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut rx = self.gate.subscribe();
        tokio::spawn(async move {
            loop {
                let logged_in = rx.borrow_and_update().logged_in();
                if logged_in {
                    manager.connect().await;
                } else {
                    manager.disconnect().await;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// The background loop: dial, pump, retry on the fixed-delay budget.
    async fn run_socket_loop(self: Arc<Self>, url: String, mut outgoing: mpsc::UnboundedReceiver<String>) {
        let policy = self.config.reconnect.clone();
        let mut attempt: u32 = 0;

        while self.running.load(Ordering::SeqCst) {
            if attempt > 0 {
                if attempt >= policy.max_attempts {
                    log::error!(
                        "[SocketManager] giving up after {} attempts",
                        policy.max_attempts
                    );
                    self.status.send_replace(ConnectionStatus::Unavailable);
                    let _ = self.events.send(SocketEvent::ConnectionError {
                        message: "messaging server unavailable".to_string(),
                    });
                    self.running.store(false, Ordering::SeqCst);
                    break;
                }
                log::info!(
                    "[SocketManager] retrying in {:?} (attempt {}/{})",
                    policy.delay,
                    attempt,
                    policy.max_attempts
                );
                self.status
                    .send_replace(ConnectionStatus::Reconnecting { attempt });
                tokio::time::sleep(policy.delay).await;
                if !self.running.load(Ordering::SeqCst) {
                    break;
                }
            }

            let mut transport = match self.connector.connect(&url).await {
                Ok(t) => t,
                Err(e) => {
                    log::error!("[SocketManager] connection failed: {}", e);
                    let _ = self.events.send(SocketEvent::ConnectionError {
                        message: e.to_string(),
                    });
                    attempt += 1;
                    continue;
                }
            };

            attempt = 0;
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.status.send_replace(ConnectionStatus::Connected);
            let _ = self.events.send(SocketEvent::Connected { generation });
            log::info!("[SocketManager] connected (generation {})", generation);

            let error = self.pump(&mut transport, &mut outgoing).await;
            let _ = transport.close().await;

            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let _ = self.events.send(SocketEvent::Disconnected);
            if let Some(message) = error {
                let _ = self.events.send(SocketEvent::ConnectionError { message });
            }
            attempt = 1;
        }

        log::debug!("[SocketManager] socket loop exited");
    }

    /// Pump one established connection. Returns the error message that
    /// ended it, or `None` for a graceful close / shutdown.
    async fn pump(
        &self,
        transport: &mut C::Transport,
        outgoing: &mut mpsc::UnboundedReceiver<String>,
    ) -> Option<String> {
        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.tick().await; // Consume first immediate tick

        loop {
            if !self.running.load(Ordering::SeqCst) {
                return None;
            }

            tokio::select! {
                inbound = transport.recv() => {
                    match inbound {
                        Some(Ok(WsMessage::Text(text))) => self.dispatch_frame(&text),
                        Some(Ok(WsMessage::Close)) | None => {
                            log::info!("[SocketManager] server closed the connection");
                            return None;
                        }
                        Some(Ok(_)) => {} // binary frames and pongs are not part of the protocol
                        Some(Err(e)) => {
                            log::error!("[SocketManager] transport error: {}", e);
                            return Some(e.to_string());
                        }
                    }
                }
                frame = outgoing.recv() => {
                    match frame {
                        Some(frame) => {
                            if let Err(e) = transport.send_text(frame).await {
                                log::error!("[SocketManager] send failed: {}", e);
                                return Some(e.to_string());
                            }
                        }
                        // Sender cleared by disconnect().
                        None => return None,
                    }
                }
                _ = keepalive.tick() => {
                    if let Err(e) = transport.send_ping().await {
                        log::error!("[SocketManager] keepalive failed: {}", e);
                        return Some(e.to_string());
                    }
                }
            }
        }
    }

    /// The single boundary where inbound frames are decoded. Unknown event
    /// names are dropped here, with a log line instead of a wildcard
    /// dispatch.
    fn dispatch_frame(&self, text: &str) {
        match ServerEvent::parse(text) {
            Ok(event) => {
                let _ = self.events.send(SocketEvent::Server(event));
            }
            Err(e) => log::warn!("[SocketManager] dropping unrecognized event ({}): {}", e, text),
        }
    }
}
