//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use crate::notify::PushChannel;
use async_trait::async_trait;
use driftdb_core::{timestamp, Record};
use driftdb_storage::Changeset;
use driftdb_sync_protocol::{CollectionRef, PullParams, PullResponse, PushRequest};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

/// A sync transport handles communication with the remote authority.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, WebSocket, in-process for testing, etc.).
/// Timeouts and retries belong to the implementation.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Fetches the changes made to a collection since `params.last_sync`.
    async fn pull(&self, collection: &CollectionRef, params: PullParams) -> SyncResult<PullResponse>;

    /// Sends resolved local changes.
    async fn push(&self, collection: &CollectionRef, request: PushRequest) -> SyncResult<()>;
}

/// A scripted transport for testing.
///
/// Pull responses are served from a queue (an empty response once it runs
/// dry). Every call is recorded.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    pull_responses: Mutex<VecDeque<SyncResult<PullResponse>>>,
    push_error: Mutex<Option<String>>,
    pulls: Mutex<Vec<(String, PullParams)>>,
    pushes: Mutex<Vec<(String, Changeset<Record>)>>,
}

impl MockTransport {
    /// Creates a connected mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            pull_responses: Mutex::new(VecDeque::new()),
            push_error: Mutex::new(None),
            pulls: Mutex::new(Vec::new()),
            pushes: Mutex::new(Vec::new()),
        }
    }

    /// Queues the response to the next unanswered pull.
    pub fn queue_pull(&self, changes: Changeset<Record>) {
        self.pull_responses
            .lock()
            .push_back(Ok(PullResponse::new(changes)));
    }

    /// Queues a failure for the next unanswered pull.
    pub fn queue_pull_error(&self, error: SyncError) {
        self.pull_responses.lock().push_back(Err(error));
    }

    /// Makes every push fail with a retryable error until cleared.
    pub fn set_push_error(&self, message: Option<&str>) {
        *self.push_error.lock() = message.map(str::to_string);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Checks if the transport is connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Every pull made so far, as `(collection, params)`.
    pub fn pulls(&self) -> Vec<(String, PullParams)> {
        self.pulls.lock().clone()
    }

    /// Every successful push made so far, as `(collection, changes)`.
    pub fn pushes(&self) -> Vec<(String, Changeset<Record>)> {
        self.pushes.lock().clone()
    }

    /// Number of successful pushes.
    pub fn push_count(&self) -> usize {
        self.pushes.lock().len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteTransport for MockTransport {
    async fn pull(&self, collection: &CollectionRef, params: PullParams) -> SyncResult<PullResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.pulls.lock().push((collection.name.clone(), params));
        self.pull_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(PullResponse::empty()))
    }

    async fn push(&self, collection: &CollectionRef, request: PushRequest) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        if let Some(message) = self.push_error.lock().clone() {
            return Err(SyncError::transport_retryable(message));
        }
        self.pushes
            .lock()
            .push((collection.name.clone(), request.changes));
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct RemoteEntry {
    record: Record,
    created: i64,
    changed: i64,
    deleted: bool,
}

#[derive(Debug, Default)]
struct RemoteState {
    clock: i64,
    collections: HashMap<String, BTreeMap<String, RemoteEntry>>,
}

impl RemoteState {
    /// Strictly increasing stamp, never behind the wall clock.
    fn stamp(&mut self) -> i64 {
        self.clock = timestamp::now_millis().max(self.clock + 1);
        self.clock
    }

    fn write(&mut self, name: &str, changes: Changeset<Record>) -> i64 {
        let now = self.stamp();
        let store = self.collections.entry(name.to_string()).or_default();
        for record in changes.added.into_iter().chain(changes.modified) {
            let created = match store.get(&record.id) {
                Some(entry) if !entry.deleted => entry.created,
                _ => now,
            };
            store.insert(
                record.id.clone(),
                RemoteEntry {
                    record,
                    created,
                    changed: now,
                    deleted: false,
                },
            );
        }
        for record in changes.removed {
            let created = store.get(&record.id).map_or(now, |entry| entry.created);
            store.insert(
                record.id.clone(),
                RemoteEntry {
                    record,
                    created,
                    changed: now,
                    deleted: true,
                },
            );
        }
        now
    }
}

/// An in-process remote authority.
///
/// Holds the records of every collection, serves "changed since" pulls and
/// applies pushes. Removals are kept as tombstones so later pulls report
/// them. Writes made through [`apply`](Self::apply) stand in for other
/// clients and are announced on the attached [`PushChannel`].
#[derive(Debug)]
pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
    channel: Option<PushChannel>,
    notification_prefix: String,
}

impl InMemoryRemote {
    /// Creates an empty remote with no notification channel.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RemoteState::default()),
            channel: None,
            notification_prefix: crate::config::DEFAULT_NOTIFICATION_PREFIX.to_string(),
        }
    }

    /// Creates an empty remote announcing writes on `channel`.
    pub fn with_channel(channel: PushChannel) -> Self {
        Self {
            channel: Some(channel),
            ..Self::new()
        }
    }

    /// Writes changes as another client would, then publishes
    /// `sync-<name>` with the changes attached.
    ///
    /// Records without `updatedAt` are stamped with the remote clock.
    pub fn apply(&self, name: &str, changes: Changeset<Record>) {
        let stamped = {
            let mut state = self.state.lock();
            let now = state.stamp();
            let stamp = |mut record: Record| {
                if record.updated_at.is_none() {
                    record = record.with_updated_at_millis(now);
                }
                record
            };
            let stamped = Changeset {
                added: changes.added.into_iter().map(stamp).collect(),
                modified: changes.modified.into_iter().map(stamp).collect(),
                removed: changes.removed,
            };
            state.write(name, stamped.clone());
            stamped
        };
        tracing::debug!(collection = %name, changes = stamped.len(), "remote write");

        if let Some(channel) = &self.channel {
            channel.publish(format!("{}{name}", self.notification_prefix), Some(stamped));
        }
    }

    /// Live (not removed) records of a collection, ordered by id.
    pub fn records(&self, name: &str) -> Vec<Record> {
        self.state
            .lock()
            .collections
            .get(name)
            .map(|store| {
                store
                    .values()
                    .filter(|entry| !entry.deleted)
                    .map(|entry| entry.record.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// A live record by id.
    pub fn get(&self, name: &str, id: &str) -> Option<Record> {
        self.state
            .lock()
            .collections
            .get(name)
            .and_then(|store| store.get(id))
            .filter(|entry| !entry.deleted)
            .map(|entry| entry.record.clone())
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteTransport for InMemoryRemote {
    async fn pull(&self, collection: &CollectionRef, params: PullParams) -> SyncResult<PullResponse> {
        let state = self.state.lock();
        let mut changes = Changeset::new();
        if let Some(store) = state.collections.get(&collection.name) {
            for entry in store.values().filter(|e| e.changed >= params.last_sync) {
                let record = entry.record.clone();
                if entry.deleted {
                    changes.removed.push(record);
                } else if entry.created >= params.last_sync {
                    changes.added.push(record);
                } else {
                    changes.modified.push(record);
                }
            }
        }
        Ok(PullResponse::new(changes))
    }

    async fn push(&self, collection: &CollectionRef, request: PushRequest) -> SyncResult<()> {
        let count = request.changes.len();
        self.state.lock().write(&collection.name, request.changes);
        tracing::debug!(collection = %collection.name, changes = count, "accepted push");
        Ok(())
    }
}
