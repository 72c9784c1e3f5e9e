//! Transport abstraction for the messaging socket.
//!
//! The socket manager never talks to tokio-tungstenite directly; it drives a
//! [`SocketTransport`] obtained from a [`TransportConnector`]. Production
//! code uses [`crate::tokio_transport::TokioConnector`]; tests substitute an
//! in-memory pair.
//!
//! # Message Flow
//!
//! 1. The manager dials via `TransportConnector::connect`
//! 2. Inbound frames arrive from `recv()`
//! 3. Outbound frames go through `send_text()`
//! 4. `close()` ends the connection gracefully

use async_trait::async_trait;

/// A message read from or written to the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum WsMessage {
    /// A text frame (the protocol's JSON envelope).
    Text(String),
    /// A binary frame. Not part of the protocol; ignored by the manager.
    Binary(Vec<u8>),
    /// A ping frame.
    Ping(Vec<u8>),
    /// A pong frame.
    Pong(Vec<u8>),
    /// The close frame.
    Close,
}

/// Errors surfaced by a socket transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The dial failed (network error, auth rejection, bad URL).
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// A frame could not be written.
    #[error("send failed: {0}")]
    SendFailed(String),
    /// The connection is closed.
    #[error("connection closed")]
    Closed,
    /// Any other transport error.
    #[error("{0}")]
    Other(String),
}

/// A live bidirectional connection to the messaging server.
///
/// Implementations must be `Send` so the manager can own the transport
/// inside its background task.
#[async_trait]
pub trait SocketTransport: Send {
    /// Send a text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a keepalive ping.
    async fn send_ping(&mut self) -> Result<(), TransportError>;

    /// Receive the next message. `None` means the stream ended.
    async fn recv(&mut self) -> Option<Result<WsMessage, TransportError>>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Factory that dials new socket connections.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// The transport type produced by this connector.
    type Transport: SocketTransport + 'static;

    /// Dial the given URL and return a live transport.
    async fn connect(&self, url: &str) -> Result<Self::Transport, TransportError>;
}
