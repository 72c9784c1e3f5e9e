//! # `mentorline_core`
//!
//! Real-time messaging core shared by the Mentorline clients.
//!
//! The crate owns the parts of the chat stack that have to be right
//! everywhere: exactly one live socket connection tied to the session
//! lifecycle, a closed set of typed server events, per-conversation history
//! with optimistic send and echo reconciliation, and the HTTP interceptor
//! that recovers from expired credentials with a single coalesced refresh.
//!
//! Rendering, routing and persistence stay in the embedding clients; they
//! interact with this crate through [`session::SessionGate`],
//! [`connection::SocketManager`], [`conversation::ConversationChannel`],
//! [`notification::NotificationListener`] and [`api::ApiClient`].

#![warn(missing_docs)]

pub mod api;
pub mod config;
pub mod connection;
pub mod conversation;
pub mod error;
pub mod event;
pub mod message;
pub mod notification;
pub mod session;
pub mod tokio_transport;
pub mod transport;
