//! Live conversation channel: ordered, deduplicated history for one chat
//! room, with optimistic local echo of outgoing messages.
//!
//! The module is split the way the sync stack splits protocol from
//! transport: [`ConversationHistory`] is pure state (insertion ordering,
//! reconciliation, read receipts) that tests can drive directly, and
//! [`ConversationChannel`] is the async wrapper that feeds it from the
//! socket manager's bus and pushes sends the other way.
//!
//! # Usage
//!
//! ```ignore
//! let channel = ConversationChannel::new(manager, "chat-42", me, "user-7");
//! let _handle = channel.attach(Arc::new(MyHandler)).expect("first attach");
//!
//! let message = channel.send("hello", MessageKind::Text, None).await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::connection::{SocketEvent, SocketManager};
use crate::error::ChatError;
use crate::event::{ClientEvent, MessagesRead, ServerEvent};
use crate::message::{Attachment, ChatPayload, DeliveryStatus, Message, MessageKind};
use crate::session::User;
use crate::transport::TransportConnector;

/// How one inbound event changed the history.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryChange {
    /// A new message was appended at the tail.
    Appended {
        /// Index of the new message.
        index: usize,
    },
    /// An out-of-order message was inserted before the tail.
    Inserted {
        /// Index of the new message.
        index: usize,
    },
    /// An inbound echo reconciled a pending local message to `sent`.
    Reconciled {
        /// Index of the reconciled message.
        index: usize,
    },
    /// Read receipts advanced one or more messages to `read`.
    MarkedRead {
        /// The message ids that actually advanced.
        message_ids: Vec<String>,
    },
    /// The event changed nothing (duplicate delivery or unknown ids).
    Ignored,
}

/// Ordered, deduplicated message history for one conversation.
///
/// Ordering is ascending by timestamp, ties broken by arrival order.
/// Messages normally arrive in order, so insertion scans from the tail.
#[derive(Debug)]
pub struct ConversationHistory {
    chat_id: String,
    messages: Vec<Message>,
}

impl ConversationHistory {
    /// Create an empty history for one conversation.
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            messages: Vec::new(),
        }
    }

    /// The conversation this history belongs to.
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// The messages, in display order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the history is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Look up a message by id.
    pub fn get(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.message_id == message_id)
    }

    /// Append a locally constructed pending message (optimistic send).
    pub fn push_pending(&mut self, message: Message) -> HistoryChange {
        self.messages.push(message);
        HistoryChange::Appended {
            index: self.messages.len() - 1,
        }
    }

    /// Apply an inbound `live_message` payload.
    ///
    /// If the id matches an existing pending message this is the server
    /// echo of our own send: the message advances to `sent` in place. A
    /// repeated delivery of a known id changes nothing. Otherwise the
    /// message is inserted at its timestamp position.
    pub fn apply_inbound(&mut self, payload: ChatPayload) -> HistoryChange {
        if let Some(index) = self
            .messages
            .iter()
            .position(|m| m.message_id == payload.message_id)
        {
            if self.messages[index].advance(DeliveryStatus::Sent) {
                return HistoryChange::Reconciled { index };
            }
            return HistoryChange::Ignored;
        }

        let message = Message::from_payload(payload);
        let index = self.insertion_index(message.timestamp);
        if index == self.messages.len() {
            self.messages.push(message);
            HistoryChange::Appended { index }
        } else {
            self.messages.insert(index, message);
            HistoryChange::Inserted { index }
        }
    }

    /// Apply read receipts. Only `sent` messages advance; the change lists
    /// the ids that actually moved.
    pub fn apply_read(&mut self, receipt: &MessagesRead) -> HistoryChange {
        let mut advanced = Vec::new();
        for id in &receipt.message_ids {
            if let Some(message) = self.messages.iter_mut().find(|m| m.message_id == *id) {
                if message.advance(DeliveryStatus::Read) {
                    advanced.push(id.clone());
                }
            }
        }
        if advanced.is_empty() {
            HistoryChange::Ignored
        } else {
            HistoryChange::MarkedRead {
                message_ids: advanced,
            }
        }
    }

    /// Mark a pending message as failed (send errored before any
    /// acknowledgment). Returns whether the status changed.
    pub fn mark_send_failed(&mut self, message_id: &str) -> bool {
        self.messages
            .iter_mut()
            .find(|m| m.message_id == message_id)
            .is_some_and(|m| m.advance(DeliveryStatus::Failed))
    }

    /// Insertion position for a timestamp, scanning from the tail.
    /// Equal timestamps land after existing entries: arrival order.
    fn insertion_index(&self, timestamp: DateTime<Utc>) -> usize {
        let mut index = self.messages.len();
        while index > 0 && self.messages[index - 1].timestamp > timestamp {
            index -= 1;
        }
        index
    }
}

/// Activity reported to the embedding client.
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    /// An inbound message was added to the history.
    MessageReceived {
        /// The new message.
        message: Message,
        /// Whether the local user sent it (e.g., from another device).
        is_own: bool,
    },
    /// The server acknowledged a local pending message.
    MessageSent {
        /// Id of the message that advanced to `sent`.
        message_id: String,
    },
    /// The peer read messages.
    MessagesRead {
        /// Ids that advanced to `read`.
        message_ids: Vec<String>,
    },
}

/// Callbacks for conversation activity.
///
/// Implementors translate events into frontend-specific actions (UI
/// updates, CLI prints).
pub trait ConversationHandler: Send + Sync {
    /// Called for every history change driven by the server.
    fn on_event(&self, event: ConversationEvent);
}

/// Detach handle for a bus subscription.
///
/// Detaching (or dropping) the handle stops the subscriber task; events
/// that arrive afterwards produce no callback.
#[derive(Debug)]
pub struct AttachHandle {
    pub(crate) task: tokio::task::JoinHandle<()>,
    pub(crate) attached: Arc<AtomicBool>,
}

impl AttachHandle {
    /// Stop the subscription. Dropping the handle has the same effect.
    pub fn detach(self) {}
}

impl Drop for AttachHandle {
    fn drop(&mut self) {
        self.attached.store(false, Ordering::SeqCst);
        self.task.abort();
    }
}

/// Per-conversation message stream built atop the socket manager.
pub struct ConversationChannel<C: TransportConnector> {
    manager: Arc<SocketManager<C>>,
    chat_id: String,
    local_user: User,
    peer_id: String,
    history: Arc<Mutex<ConversationHistory>>,
    attached: Arc<AtomicBool>,
}

impl<C> ConversationChannel<C>
where
    C: TransportConnector + 'static,
{
    /// Create a channel for one conversation room.
    pub fn new(
        manager: Arc<SocketManager<C>>,
        chat_id: impl Into<String>,
        local_user: User,
        peer_id: impl Into<String>,
    ) -> Self {
        let chat_id = chat_id.into();
        Self {
            manager,
            history: Arc::new(Mutex::new(ConversationHistory::new(chat_id.clone()))),
            chat_id,
            local_user,
            peer_id: peer_id.into(),
            attached: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to inbound events for this conversation.
    ///
    /// Idempotent: a second attach while one is live changes nothing and
    /// returns `None`; the existing subscription keeps running.
    pub fn attach(&self, handler: Arc<dyn ConversationHandler>) -> Option<AttachHandle> {
        if self
            .attached
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("[Conversation] attach ignored: already attached to {}", self.chat_id);
            return None;
        }

        let mut rx = self.manager.subscribe();
        let history = Arc::clone(&self.history);
        let chat_id = self.chat_id.clone();
        let local_id = self.local_user.id.clone();
        let attached = Arc::clone(&self.attached);

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(SocketEvent::Server(ServerEvent::LiveMessage(payload)))
                        if payload.chat_id == chat_id =>
                    {
                        let message_id = payload.message_id.clone();
                        let is_own = payload.sender_id == local_id;
                        let (change, message) = {
                            let mut history = history.lock().unwrap();
                            let change = history.apply_inbound(payload);
                            (change, history.get(&message_id).cloned())
                        };
                        match (change, message) {
                            (HistoryChange::Reconciled { .. }, _) => {
                                handler.on_event(ConversationEvent::MessageSent { message_id });
                            }
                            (
                                HistoryChange::Appended { .. } | HistoryChange::Inserted { .. },
                                Some(message),
                            ) => {
                                handler.on_event(ConversationEvent::MessageReceived {
                                    message,
                                    is_own,
                                });
                            }
                            _ => {}
                        }
                    }
                    Ok(SocketEvent::Server(ServerEvent::MessagesRead(receipt)))
                        if receipt.chat_id == chat_id =>
                    {
                        let change = history.lock().unwrap().apply_read(&receipt);
                        if let HistoryChange::MarkedRead { message_ids } = change {
                            handler.on_event(ConversationEvent::MessagesRead { message_ids });
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!(
                            "[Conversation] {} subscriber lagged, {} events dropped",
                            chat_id,
                            skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Some(AttachHandle { task, attached })
    }

    /// Whether a subscription is currently live.
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    /// Send a message: append it to the history immediately (optimistic),
    /// then emit it over the connection.
    ///
    /// With no live connection this fails with
    /// [`ChatError::NotConnected`]; the message stays in the history as
    /// `pending` and the caller decides whether to retry the send or
    /// [`mark_send_failed`](ConversationChannel::mark_send_failed).
    pub async fn send(
        &self,
        content: &str,
        kind: MessageKind,
        attachment: Option<Attachment>,
    ) -> Result<Message, ChatError> {
        let message = Message::pending(
            self.chat_id.clone(),
            &self.local_user,
            self.peer_id.clone(),
            content,
            kind,
            attachment,
        );
        self.history
            .lock()
            .unwrap()
            .push_pending(message.clone());

        let event = ClientEvent::LiveMessage(message.to_payload());
        match self.manager.send_event(&event).await {
            Ok(()) => Ok(message),
            Err(e) => {
                log::warn!(
                    "[Conversation] send failed, message {} left pending: {}",
                    message.message_id,
                    e
                );
                Err(e)
            }
        }
    }

    /// Mark a pending message as failed.
    pub fn mark_send_failed(&self, message_id: &str) -> bool {
        self.history.lock().unwrap().mark_send_failed(message_id)
    }

    /// Seed the history from a REST history fetch (payloads are applied
    /// with the same ordering and dedup rules as live events).
    pub fn seed_history(&self, payloads: Vec<ChatPayload>) {
        let mut history = self.history.lock().unwrap();
        for payload in payloads {
            let _ = history.apply_inbound(payload);
        }
    }

    /// Snapshot of the history in display order.
    pub fn history_snapshot(&self) -> Vec<Message> {
        self.history.lock().unwrap().messages().to_vec()
    }
}
