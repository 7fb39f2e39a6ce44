//! Cross-context notification bus.
//!
//! UI contexts (popup, settings page) have independent lifecycles from the
//! background worker; the only push primitive between them is broadcast
//! messaging with no delivery guarantee. This crate wraps that primitive:
//! publishing is fire-and-forget and tolerates the absence of listeners,
//! and every notification is advisory; a consumer that misses one
//! recovers through the state owners' pull APIs.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Default capacity of the broadcast channel. Slow consumers past this
/// lag are dropped, which is acceptable for advisory notifications.
const CHANNEL_CAPACITY: usize = 64;

/// Kinds of state-change notifications published by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Authentication state changed (login, logout, eviction, repair).
    AuthStatusChanged,
    /// Server reachability or credential validity changed.
    ServerStatusChanged,
}

/// A broadcast notification: a kind plus an opaque JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Notification kind (e.g. "auth_status_changed").
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Payload, shaped by the publishing component.
    pub payload: serde_json::Value,
}

impl Notification {
    /// Build an auth-status notification.
    pub fn auth_status_changed(payload: serde_json::Value) -> Self {
        Self {
            kind: NotificationKind::AuthStatusChanged,
            payload,
        }
    }

    /// Build a server-status notification.
    pub fn server_status_changed(payload: serde_json::Value) -> Self {
        Self {
            kind: NotificationKind::ServerStatusChanged,
            payload,
        }
    }
}

/// Fire-and-forget broadcast bus for state-change notifications.
#[derive(Clone)]
pub struct NotificationBus {
    sender: broadcast::Sender<Notification>,
}

impl NotificationBus {
    /// Create a new bus.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Subscribe to notifications. Each receiver sees every notification
    /// published after the subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Publish a notification to all current subscribers.
    ///
    /// Delivery is best-effort: with no subscribers the notification is
    /// dropped silently, matching the extension messaging primitive where
    /// no context may be listening.
    pub fn publish(&self, notification: Notification) {
        debug!(kind = ?notification.kind, "Publishing notification");
        let _ = self.sender.send(notification);
    }

    /// Number of currently attached subscribers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}
