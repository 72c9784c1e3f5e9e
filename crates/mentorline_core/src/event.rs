//! Named server events (JSON over WebSocket text frames).
//!
//! Every frame is an envelope `{"event": <name>, "data": <payload>}`
//! decoded once, at the socket manager boundary, into the closed
//! [`ServerEvent`] set. There is no wildcard dispatch: a frame whose name is
//! not in the set fails to decode and is logged and dropped at that
//! boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::ChatPayload;

/// A server-pushed notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Notification identifier.
    pub id: String,
    /// Notification kind tag (e.g., "booking_request").
    pub kind: String,
    /// Short title for display.
    pub title: String,
    /// Longer body text.
    #[serde(default)]
    pub body: String,
    /// Server-side creation time.
    pub created_at: DateTime<Utc>,
}

/// A mentorship session has started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStarted {
    /// Booked session identifier.
    pub session_id: String,
    /// Mentor participant.
    pub mentor_id: String,
    /// Mentee participant.
    pub mentee_id: String,
    /// Scheduled start time.
    pub starts_at: DateTime<Utc>,
}

/// Read receipts for a batch of messages in one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesRead {
    /// Conversation identifier.
    pub chat_id: String,
    /// Who read the messages.
    pub reader_id: String,
    /// The messages that were read.
    pub message_ids: Vec<String>,
}

/// Named events pushed by the messaging server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A chat message for one of this user's conversations.
    LiveMessage(ChatPayload),
    /// A platform notification.
    NewNotification(Notification),
    /// A booked mentorship session has started.
    SessionStarted(SessionStarted),
    /// The peer read messages in a conversation.
    MessagesRead(MessagesRead),
}

impl ServerEvent {
    /// Decode a text frame. Unknown event names fail here and nowhere else.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Named events sent from this client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// An outgoing chat message.
    LiveMessage(ChatPayload),
}
