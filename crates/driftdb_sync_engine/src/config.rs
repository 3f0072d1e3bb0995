//! Configuration for the sync manager.

use std::time::Duration;

/// Default prefix of the shared pending-change and snapshot stores.
pub const DEFAULT_STORE_PREFIX: &str = "sync-manager";

/// Default prefix of push-notification event names.
pub const DEFAULT_NOTIFICATION_PREFIX: &str = "sync-";

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Prefix of the `<prefix>-changes` and `<prefix>-snapshots` stores.
    pub store_prefix: String,
    /// Interval for automatic sync of every collection.
    pub sync_interval: Option<Duration>,
    /// Pull everything (cursor `0`) when a collection has no snapshot yet.
    pub full_initial_pull: bool,
    /// Prefix of notification events; the rest names the collection.
    pub notification_prefix: String,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            store_prefix: DEFAULT_STORE_PREFIX.to_string(),
            sync_interval: None,
            full_initial_pull: false,
            notification_prefix: DEFAULT_NOTIFICATION_PREFIX.to_string(),
        }
    }

    /// Sets the store prefix.
    pub fn with_store_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.store_prefix = prefix.into();
        self
    }

    /// Sets the sync interval for automatic sync.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Pulls the whole remote history on a collection's first pass.
    pub fn with_full_initial_pull(mut self) -> Self {
        self.full_initial_pull = true;
        self
    }

    /// Sets the notification event prefix.
    pub fn with_notification_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.notification_prefix = prefix.into();
        self
    }

    /// Name of the pending-change store.
    pub fn changes_store(&self) -> String {
        format!("{}-changes", self.store_prefix)
    }

    /// Name of the snapshot store.
    pub fn snapshots_store(&self) -> String {
        format!("{}-snapshots", self.store_prefix)
    }

    /// Notification event that wakes up the named collection.
    pub fn notification_event(&self, collection: &str) -> String {
        format!("{}{collection}", self.notification_prefix)
    }

    /// Collection named by a notification event, if it carries the prefix.
    pub fn collection_for_event<'a>(&self, event: &'a str) -> Option<&'a str> {
        event
            .strip_prefix(self.notification_prefix.as_str())
            .filter(|name| !name.is_empty())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
