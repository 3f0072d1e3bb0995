//! Realtime push notifications.

use driftdb_core::Record;
use driftdb_storage::Changeset;
use tokio::sync::broadcast;

/// Default number of notifications buffered per subscriber.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// A signal that remote state changed.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Event name, `sync-<collection>` by convention.
    pub event: String,
    /// Changes attached to the notification, if the sender included them.
    pub payload: Option<Changeset<Record>>,
}

impl Notification {
    /// Creates a notification.
    pub fn new(event: impl Into<String>, payload: Option<Changeset<Record>>) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    /// Returns the attached changes if there are any.
    pub fn changes(&self) -> Option<&Changeset<Record>> {
        self.payload.as_ref().filter(|changes| !changes.is_empty())
    }
}

/// Fan-out channel carrying [`Notification`]s to every subscriber.
///
/// Clones share the same channel.
#[derive(Debug, Clone)]
pub struct PushChannel {
    sender: broadcast::Sender<Notification>,
}

impl PushChannel {
    /// Creates a channel with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a channel buffering up to `capacity` notifications per
    /// subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes a notification. Returns the number of subscribers reached.
    pub fn publish(&self, event: impl Into<String>, payload: Option<Changeset<Record>>) -> usize {
        self.sender
            .send(Notification::new(event, payload))
            .unwrap_or(0)
    }

    /// Subscribes to notifications published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for PushChannel {
    fn default() -> Self {
        Self::new()
    }
}
