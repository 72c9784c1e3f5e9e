//! Notification listener: forwards server-pushed notification and
//! session-started events to a registered handler.
//!
//! Toast display, badge counters and the rest of the downstream handling
//! belong to the embedding client; this module only delivers the events.
//! The subscription is against the manager-owned bus, which outlives any
//! individual socket, so it survives reconnects without rebinding.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::broadcast;

use crate::connection::{SocketEvent, SocketManager};
use crate::conversation::AttachHandle;
use crate::event::{Notification, ServerEvent, SessionStarted};
use crate::transport::TransportConnector;

/// Callbacks for server-pushed platform events.
pub trait NotificationHandler: Send + Sync {
    /// A new notification arrived.
    fn on_notification(&self, notification: Notification);

    /// A booked mentorship session started.
    fn on_session_started(&self, session: SessionStarted);
}

/// Subscribes to notification events for the lifetime of the returned
/// handle.
pub struct NotificationListener;

impl NotificationListener {
    /// Attach a handler to the manager's bus. Dropping (or detaching) the
    /// handle stops delivery.
    pub fn attach<C>(
        manager: &Arc<SocketManager<C>>,
        handler: Arc<dyn NotificationHandler>,
    ) -> AttachHandle
    where
        C: TransportConnector + 'static,
    {
        let mut rx = manager.subscribe();
        let attached = Arc::new(AtomicBool::new(true));

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(SocketEvent::Server(ServerEvent::NewNotification(notification))) => {
                        handler.on_notification(notification);
                    }
                    Ok(SocketEvent::Server(ServerEvent::SessionStarted(session))) => {
                        handler.on_session_started(session);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!(
                            "[Notifications] subscriber lagged, {} events dropped",
                            skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        AttachHandle { task, attached }
    }
}
