//! Chat messages: the in-memory model, the delivery state machine, and the
//! wire payload.
//!
//! A message is created in one of two ways: locally by
//! [`Message::pending`] when the user sends (optimistic, not yet
//! acknowledged), or from an inbound [`ChatPayload`] via
//! [`Message::from_payload`]. Delivery status only ever advances:
//! `pending → sent → read`, with `pending → failed` as the only other exit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::User;

/// Kind of message content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// A file attachment with an optional caption.
    File,
    /// An image attachment with an optional caption.
    Image,
}

/// Attachment metadata carried with `FILE` and `IMAGE` messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Where the uploaded file lives.
    pub url: String,
    /// Size in bytes.
    pub size: u64,
    /// File-type tag (e.g., "application/pdf").
    pub file_type: String,
}

/// Delivery state of a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Produced locally, not yet acknowledged by the server.
    Pending,
    /// Acknowledged by the server (or received from it).
    Sent,
    /// The recipient has read it. Final.
    Read,
    /// The send errored before any acknowledgment. Final.
    Failed,
}

impl DeliveryStatus {
    /// Whether a transition to `next` is allowed.
    pub fn can_advance_to(self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        matches!((self, next), (Pending, Sent) | (Pending, Failed) | (Sent, Read))
    }
}

/// Wire payload of a `live_message` event (both directions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    /// Conversation identifier.
    pub chat_id: String,
    /// Sender identifier.
    pub sender_id: String,
    /// Sender display name.
    pub sender_name: String,
    /// Recipient identifier.
    pub receiver_id: String,
    /// Message identifier. Client-generated for sends; echoed back by the
    /// server unchanged.
    pub message_id: String,
    /// Textual content.
    pub message: String,
    /// Content kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Message timestamp (RFC 3339 on the wire).
    pub timestamp: DateTime<Utc>,
    /// Attachment for `FILE`/`IMAGE` messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

/// A chat message held in conversation history.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Conversation identifier.
    pub chat_id: String,
    /// Sender identifier.
    pub sender_id: String,
    /// Sender display name.
    pub sender_name: String,
    /// Recipient identifier.
    pub receiver_id: String,
    /// Message identifier, unique within the conversation.
    pub message_id: String,
    /// Textual content.
    pub content: String,
    /// Content kind.
    pub kind: MessageKind,
    /// Message timestamp.
    pub timestamp: DateTime<Utc>,
    /// Attachment for `FILE`/`IMAGE` messages.
    pub attachment: Option<Attachment>,
    /// Delivery state.
    pub status: DeliveryStatus,
}

impl Message {
    /// Build the optimistic local message for an outgoing send: a fresh
    /// uuid, the local clock, `pending` status.
    pub fn pending(
        chat_id: impl Into<String>,
        sender: &User,
        receiver_id: impl Into<String>,
        content: impl Into<String>,
        kind: MessageKind,
        attachment: Option<Attachment>,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            sender_id: sender.id.clone(),
            sender_name: sender.display_name.clone(),
            receiver_id: receiver_id.into(),
            message_id: Uuid::new_v4().to_string(),
            content: content.into(),
            kind,
            timestamp: Utc::now(),
            attachment,
            status: DeliveryStatus::Pending,
        }
    }

    /// Build a message from an inbound payload. Inbound messages are
    /// server-acknowledged by definition, so they start as `sent`.
    pub fn from_payload(payload: ChatPayload) -> Self {
        Self {
            chat_id: payload.chat_id,
            sender_id: payload.sender_id,
            sender_name: payload.sender_name,
            receiver_id: payload.receiver_id,
            message_id: payload.message_id,
            content: payload.message,
            kind: payload.kind,
            timestamp: payload.timestamp,
            attachment: payload.attachment,
            status: DeliveryStatus::Sent,
        }
    }

    /// The wire payload for this message.
    pub fn to_payload(&self) -> ChatPayload {
        ChatPayload {
            chat_id: self.chat_id.clone(),
            sender_id: self.sender_id.clone(),
            sender_name: self.sender_name.clone(),
            receiver_id: self.receiver_id.clone(),
            message_id: self.message_id.clone(),
            message: self.content.clone(),
            kind: self.kind,
            timestamp: self.timestamp,
            attachment: self.attachment.clone(),
        }
    }

    /// Advance the delivery status if the transition is allowed.
    /// Returns whether the status changed.
    pub fn advance(&mut self, next: DeliveryStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}
