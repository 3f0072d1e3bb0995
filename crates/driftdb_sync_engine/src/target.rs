//! Type-erased handle on a registered collection.

use crate::connectivity::Connectivity;
use crate::manager::{Command, Inbox};
use async_trait::async_trait;
use driftdb_core::{
    timestamp, Collection, CollectionEventKind, CoreError, CoreResult, Document, Record,
    SubscriptionId,
};
use driftdb_storage::Changeset;
use driftdb_sync_protocol::{PendingChange, PendingChangeType};

/// Local-change events and the pending-change kind each one produces.
const DETECTED: [(CollectionEventKind, PendingChangeType); 3] = [
    (CollectionEventKind::DebugInserted, PendingChangeType::Inserted),
    (CollectionEventKind::DebugUpdated, PendingChangeType::Updated),
    (CollectionEventKind::DebugRemoved, PendingChangeType::Removed),
];

/// What the manager needs from a collection, whatever its record type.
#[async_trait]
pub(crate) trait SyncTarget: Send + Sync {
    /// Applies remote changes, emitting public events only.
    async fn apply_remote(&self, changes: Changeset<Record>) -> CoreResult<()>;

    /// Removes every handler the manager installed.
    fn detach(&self);
}

/// A collection with the manager's event handlers installed.
pub(crate) struct Hooked<T: Document> {
    collection: Collection<T>,
    subscriptions: Vec<(CollectionEventKind, SubscriptionId)>,
}

impl<T: Document> Hooked<T> {
    /// Routes local changes of `collection` into `inbox` and calls
    /// `on_destroyed` when it is cleaned up.
    ///
    /// Each change carries the connectivity seen when it happened.
    pub(crate) fn attach<F>(
        name: &str,
        collection: &Collection<T>,
        inbox: &Inbox,
        connectivity: &Connectivity,
        on_destroyed: F,
    ) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut subscriptions = Vec::with_capacity(DETECTED.len() + 1);
        for (kind, change_type) in DETECTED {
            let inbox = inbox.clone();
            let connectivity = connectivity.clone();
            let name = name.to_string();
            let id = collection.on(kind, move |event| {
                let Some(document) = event.record() else {
                    return;
                };
                let record = match Record::from_document(document) {
                    Ok(record) => record,
                    Err(err) => {
                        tracing::warn!(collection = %name, error = %err, "cannot track local change");
                        return;
                    }
                };
                let online = connectivity.is_online();
                let change =
                    PendingChange::new(name.clone(), change_type, record, timestamp::now_millis());
                if inbox.send(Command::Detected { change, online }).is_err() {
                    tracing::debug!(collection = %name, "sync manager gone, change not tracked");
                }
            });
            subscriptions.push((kind, id));
        }

        let id = collection.on(CollectionEventKind::Destroyed, move |_| on_destroyed());
        subscriptions.push((CollectionEventKind::Destroyed, id));

        Self {
            collection: collection.clone(),
            subscriptions,
        }
    }
}

#[async_trait]
impl<T: Document> SyncTarget for Hooked<T> {
    async fn apply_remote(&self, changes: Changeset<Record>) -> CoreResult<()> {
        let typed = changes
            .try_map(|record| record.into_document::<T>())
            .map_err(CoreError::from)?;
        self.collection.register_remote_change(typed).await
    }

    fn detach(&self) {
        for (kind, id) in &self.subscriptions {
            self.collection.off(*kind, *id);
        }
    }
}
