//! Session state and the gate that owns it.
//!
//! `SessionGate` is the single writer of authentication state. Every other
//! component holds a cloned handle and only reads: a snapshot via
//! [`SessionGate::current`], or a [`tokio::sync::watch`] subscription via
//! [`SessionGate::subscribe`]. The socket manager uses the subscription to
//! keep the connection lifecycle in step with login state.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Role of the authenticated user on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A mentor account.
    Mentor,
    /// A mentee account.
    Mentee,
    /// An administrator account.
    Admin,
}

/// The authenticated user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Stable user identifier.
    pub id: String,
    /// Display name shown alongside messages.
    pub display_name: String,
    /// Platform role.
    pub role: Role,
}

/// Current session state: logged in with a user, or logged out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    /// The authenticated user, if any.
    pub user: Option<User>,
}

impl SessionState {
    /// Whether a user is logged in.
    pub fn logged_in(&self) -> bool {
        self.user.is_some()
    }
}

/// Owner of the session state.
///
/// Cloning the gate clones the handle, not the state; all clones observe
/// the same session.
#[derive(Debug, Clone)]
pub struct SessionGate {
    tx: Arc<watch::Sender<SessionState>>,
}

impl SessionGate {
    /// Create a logged-out gate.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::default());
        Self { tx: Arc::new(tx) }
    }

    /// Record a successful login or session restore.
    pub fn set_user(&self, user: User) {
        log::info!("[SessionGate] session opened for {}", user.id);
        self.tx.send_replace(SessionState { user: Some(user) });
    }

    /// Destroy the session (logout or authentication failure).
    pub fn clear_user(&self) {
        let previous = self.tx.send_replace(SessionState::default());
        if let Some(user) = previous.user {
            log::info!("[SessionGate] session cleared for {}", user.id);
        }
    }

    /// Snapshot of the current state.
    pub fn current(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    /// Whether a user is currently logged in.
    pub fn is_logged_in(&self) -> bool {
        self.tx.borrow().logged_in()
    }

    /// Subscribe to session changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }
}

impl Default for SessionGate {
    fn default() -> Self {
        Self::new()
    }
}
