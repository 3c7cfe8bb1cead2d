use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{Ms, Span};

const CHANNEL_CAPACITY: usize = 256;

/// What a listener on a resource is told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Created { reservation_id: Ulid, span: Span },
    Canceled { reservation_id: Ulid },
    Rescheduled { reservation_id: Ulid, span: Span },
    Completed { reservation_id: Ulid },
    /// Time left until the reservation ends, sent every sweep.
    Countdown { reservation_id: Ulid, remaining_ms: Ms },
}

/// Outbound, fire-and-forget. Implementations must not block.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, resource_id: Ulid, notification: Notification);
}

/// Broadcast hub with one channel per resource.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for a resource. Creates the channel if needed.
    pub fn subscribe(&self, resource_id: Ulid) -> broadcast::Receiver<Notification> {
        self.channels
            .entry(resource_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drop channels nobody listens to any more.
    pub fn prune(&self) {
        self.channels.retain(|_, tx| tx.receiver_count() > 0);
    }
}

impl NotificationSink for NotifyHub {
    /// No-op if nobody is listening.
    fn notify(&self, resource_id: Ulid, notification: Notification) {
        if let Some(sender) = self.channels.get(&resource_id) {
            let _ = sender.send(notification);
        }
    }
}
