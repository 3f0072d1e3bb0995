//! The sync manager: offline mutation logs and pull/resolve/push passes.

use crate::config::SyncConfig;
use crate::connectivity::Connectivity;
use crate::error::{SyncError, SyncResult};
use crate::notify::{Notification, PushChannel};
use crate::state::{SyncCycleResult, SyncState, SyncStats};
use crate::stores::SyncStores;
use crate::target::{Hooked, SyncTarget};
use crate::transport::RemoteTransport;
use driftdb_core::{timestamp, Collection, Document, Record};
use driftdb_storage::Changeset;
use driftdb_sync_protocol::{
    coalesce, is_changeset_empty, resolve_detailed, CollectionRef, PendingChange,
    PendingChangeType, PullParams, PushRequest, Snapshot,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Work for the inbox worker.
pub(crate) enum Command {
    /// A local change detected on a registered collection, and whether
    /// the device was online when it happened.
    Detected { change: PendingChange, online: bool },
    /// Completes once every earlier command has been processed.
    Flush(oneshot::Sender<()>),
}

pub(crate) type Inbox = mpsc::UnboundedSender<Command>;

/// Per-collection registration.
struct Entry {
    target: Box<dyn SyncTarget>,
    /// Serializes sync passes and direct remote applies.
    sync_guard: tokio::sync::Mutex<()>,
    /// Serializes read-modify-write of the pending log.
    log_lock: tokio::sync::Mutex<()>,
    /// Sync passes requested or running. While non-zero, detected
    /// changes go through the pending log.
    passes: AtomicUsize,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
}

impl Entry {
    fn new(target: Box<dyn SyncTarget>) -> Self {
        Self {
            target,
            sync_guard: tokio::sync::Mutex::new(()),
            log_lock: tokio::sync::Mutex::new(()),
            passes: AtomicUsize::new(0),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    fn pass_in_progress(&self) -> bool {
        self.passes.load(Ordering::Acquire) > 0
    }
}

/// Marks a sync pass as requested until dropped.
struct PassMarker<'a>(&'a Entry);

impl<'a> PassMarker<'a> {
    fn new(entry: &'a Entry) -> Self {
        entry.passes.fetch_add(1, Ordering::AcqRel);
        Self(entry)
    }
}

impl Drop for PassMarker<'_> {
    fn drop(&mut self) {
        self.0.passes.fetch_sub(1, Ordering::AcqRel);
    }
}

struct Shared {
    config: SyncConfig,
    transport: Arc<dyn RemoteTransport>,
    stores: SyncStores,
    connectivity: Connectivity,
    collections: RwLock<BTreeMap<String, Arc<Entry>>>,
    inbox: Inbox,
}

/// Keeps registered collections in sync with a remote authority.
///
/// Local changes made while online are pushed as soon as they are
/// processed. Changes made offline, or while a sync pass is pending, are
/// coalesced into a durable per-record pending log, which a sync pass
/// reconciles against the remote:
///
/// 1. Pull changes since the collection's snapshot and apply them
/// 2. Resolve the pending log against them (last write wins)
/// 3. Push the outcome and clear the log
/// 4. Advance the snapshot to the time the pass started
///
/// A pass first processes every change detected before it was requested,
/// so none of them bypass conflict resolution. A failed pull or push leaves
/// the log and snapshot untouched, so the next pass retries the same window.
///
/// # Runtime
///
/// Must be created inside a Tokio runtime. Background tasks end when the
/// manager is dropped.
///
/// # Example
///
/// ```rust,ignore
/// let manager = SyncManager::new(
///     SyncConfig::default(),
///     Arc::new(InMemoryRemote::new()),
///     SyncStores::in_memory(&SyncConfig::default()),
///     Connectivity::online(),
/// );
/// manager.add_collection("widgets", &widgets);
/// manager.listen(&channel);
/// manager.sync("widgets").await?;
/// ```
pub struct SyncManager {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncManager {
    /// Creates a manager and starts its inbox worker.
    ///
    /// Also starts periodic sync if the config sets an interval.
    pub fn new(
        config: SyncConfig,
        transport: Arc<dyn RemoteTransport>,
        stores: SyncStores,
        connectivity: Connectivity,
    ) -> Self {
        let (inbox, commands) = mpsc::unbounded_channel();
        let interval = config.sync_interval;
        let shared = Arc::new(Shared {
            config,
            transport,
            stores,
            connectivity,
            collections: RwLock::new(BTreeMap::new()),
            inbox,
        });

        let manager = Self {
            tasks: Mutex::new(Vec::new()),
            shared,
        };
        manager.spawn(run_worker(Arc::downgrade(&manager.shared), commands));
        if let Some(interval) = interval {
            manager.spawn_periodic(interval);
        }
        manager
    }

    /// The configuration in use.
    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    /// The connectivity flag the manager consults.
    pub fn connectivity(&self) -> &Connectivity {
        &self.shared.connectivity
    }

    /// Starts tracking a collection under `name`.
    ///
    /// Returns false (and changes nothing) if the name is already taken.
    /// The registration ends when the collection is cleaned up.
    pub fn add_collection<T: Document>(
        &self,
        name: impl Into<String>,
        collection: &Collection<T>,
    ) -> bool {
        let name = name.into();
        let mut registry = self.shared.collections.write();
        if registry.contains_key(&name) {
            tracing::warn!(collection = %name, "collection already registered");
            return false;
        }

        let weak = Arc::downgrade(&self.shared);
        let destroyed_name = name.clone();
        let hooked = Hooked::attach(
            &name,
            collection,
            &self.shared.inbox,
            &self.shared.connectivity,
            move || {
                if let Some(shared) = weak.upgrade() {
                    shared.deregister(&destroyed_name);
                }
            },
        );
        registry.insert(name.clone(), Arc::new(Entry::new(Box::new(hooked))));
        tracing::debug!(collection = %name, "registered collection");
        true
    }

    /// Stops tracking a collection. Its pending log and snapshot are kept.
    ///
    /// Returns false if it was not registered.
    pub fn remove_collection(&self, name: &str) -> bool {
        self.shared.deregister(name)
    }

    /// Returns true if a collection is registered under `name`.
    pub fn is_registered(&self, name: &str) -> bool {
        self.shared.collections.read().contains_key(name)
    }

    /// Registered collection names, in order.
    pub fn collections(&self) -> Vec<String> {
        self.shared.collections.read().keys().cloned().collect()
    }

    /// Waits until every local change detected so far has been pushed or
    /// queued.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ShutDown`] if the inbox worker has stopped.
    pub async fn flush(&self) -> SyncResult<()> {
        self.shared.drain().await
    }

    /// Runs one sync pass for a collection.
    ///
    /// Unknown collections and offline passes yield a skipped result.
    ///
    /// # Errors
    ///
    /// Returns an error if the pull, the push, applying remote changes, or
    /// the sync stores fail, if the pulled changes are malformed, or if the
    /// manager is shut down.
    pub async fn sync(&self, name: &str) -> SyncResult<SyncCycleResult> {
        self.shared.sync(name).await
    }

    /// Syncs every registered collection in name order.
    pub async fn sync_all(&self) -> Vec<SyncResult<SyncCycleResult>> {
        self.shared.sync_all().await
    }

    /// Reacts to push notifications from `channel`.
    ///
    /// `sync-<name>` with attached changes applies them directly; without
    /// changes it runs a sync pass. Other events are ignored.
    pub fn listen(&self, channel: &PushChannel) {
        let mut notifications = channel.subscribe();
        let weak = Arc::downgrade(&self.shared);
        self.spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(notification) => {
                        let Some(shared) = weak.upgrade() else { break };
                        shared.handle_notification(notification).await;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "missed push notifications, syncing everything");
                        let Some(shared) = weak.upgrade() else { break };
                        shared.sync_all().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    /// Syncs every registered collection every `period`.
    pub fn spawn_periodic(&self, period: Duration) {
        if period.is_zero() {
            tracing::warn!("ignoring zero sync interval");
            return;
        }
        let weak = Arc::downgrade(&self.shared);
        self.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else { break };
                shared.sync_all().await;
            }
        });
    }

    /// Syncs every registered collection whenever connectivity comes back.
    pub fn watch_connectivity(&self) {
        let mut changes = self.shared.connectivity.subscribe();
        let weak = Arc::downgrade(&self.shared);
        self.spawn(async move {
            let mut was_online = *changes.borrow_and_update();
            while changes.changed().await.is_ok() {
                let online = *changes.borrow_and_update();
                if online && !was_online {
                    let Some(shared) = weak.upgrade() else { break };
                    tracing::info!("back online, syncing all collections");
                    shared.sync_all().await;
                }
                was_online = online;
            }
        });
    }

    /// Current state of a registered collection.
    pub fn state(&self, name: &str) -> Option<SyncState> {
        self.shared.entry(name).map(|entry| *entry.state.read())
    }

    /// Statistics of a registered collection.
    pub fn stats(&self, name: &str) -> Option<SyncStats> {
        self.shared.entry(name).map(|entry| entry.stats.read().clone())
    }

    /// Pending log of a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the pending-change store fails.
    pub async fn pending_changes(&self, name: &str) -> SyncResult<Vec<PendingChange>> {
        self.shared.stores.pending_for(name).await
    }

    /// Sync cursor of a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot store fails.
    pub async fn snapshot(&self, name: &str) -> SyncResult<Option<Snapshot>> {
        self.shared.stores.snapshot_for(name).await
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }
}

impl Drop for SyncManager {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
        let entries = std::mem::take(&mut *self.shared.collections.write());
        for entry in entries.values() {
            entry.target.detach();
        }
    }
}

impl fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncManager")
            .field("config", &self.shared.config)
            .field("stores", &self.shared.stores)
            .field("collections", &self.collections())
            .finish()
    }
}

async fn run_worker(shared: Weak<Shared>, mut commands: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Detected { change, online } => {
                let Some(shared) = shared.upgrade() else { break };
                shared.push_detected_change(change, online).await;
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

impl Shared {
    fn entry(&self, name: &str) -> Option<Arc<Entry>> {
        self.collections.read().get(name).cloned()
    }

    /// Waits for the inbox worker to process every earlier command.
    async fn drain(&self) -> SyncResult<()> {
        let (done, wait) = oneshot::channel();
        self.inbox
            .send(Command::Flush(done))
            .map_err(|_| SyncError::ShutDown)?;
        wait.await.map_err(|_| SyncError::ShutDown)
    }

    fn deregister(&self, name: &str) -> bool {
        let removed = self.collections.write().remove(name);
        match removed {
            Some(entry) => {
                entry.target.detach();
                tracing::debug!(collection = %name, "deregistered collection");
                true
            }
            None => false,
        }
    }

    /// Pushes a local change right away, or folds it into the pending log.
    ///
    /// Only changes detected online are pushed. A record that already has a
    /// pending entry is always queued so its changes reach the remote in
    /// order, and so is everything processed while a sync pass is pending.
    async fn push_detected_change(&self, change: PendingChange, online: bool) {
        let Some(entry) = self.entry(&change.name) else {
            tracing::debug!(collection = %change.name, "dropping change for unregistered collection");
            return;
        };
        let _log = entry.log_lock.lock().await;

        let existing = match self
            .stores
            .pending_entry(&change.name, change.target_id())
            .await
        {
            Ok(existing) => existing,
            Err(err) => {
                tracing::warn!(
                    collection = %change.name,
                    record_id = %change.target_id(),
                    error = %err,
                    "cannot read pending log, change not tracked"
                );
                return;
            }
        };

        let immediate = online
            && existing.is_none()
            && !entry.pass_in_progress()
            && self.connectivity.is_online();
        if immediate {
            match self.push_now(&change).await {
                Ok(()) => {
                    entry.stats.write().immediate_pushes += 1;
                    tracing::debug!(
                        collection = %change.name,
                        record_id = %change.target_id(),
                        change = %change.change_type,
                        "pushed change"
                    );
                    return;
                }
                Err(err) => {
                    tracing::warn!(
                        collection = %change.name,
                        record_id = %change.target_id(),
                        error = %err,
                        "push failed, queuing change"
                    );
                }
            }
        }

        let name = change.name.clone();
        let record_id = change.target_id().to_string();
        match self.enqueue(change, existing).await {
            Ok(kind) => {
                entry.stats.write().changes_queued += 1;
                tracing::debug!(collection = %name, record_id = %record_id, pending = %kind, "queued change");
            }
            Err(err) => {
                tracing::warn!(collection = %name, record_id = %record_id, error = %err, "failed to queue change");
            }
        }
    }

    async fn push_now(&self, change: &PendingChange) -> SyncResult<()> {
        let changes = match change.change_type {
            PendingChangeType::Inserted => Changeset::added(change.data.clone()),
            PendingChangeType::Updated => Changeset::modified(change.data.clone()),
            PendingChangeType::Removed => Changeset::removed(change.data.clone()),
            PendingChangeType::Noop => return Ok(()),
        };
        self.transport
            .push(&CollectionRef::new(&change.name), PushRequest::new(changes))
            .await
    }

    /// Writes a change into the pending log. Returns the resulting kind.
    async fn enqueue(
        &self,
        change: PendingChange,
        existing: Option<PendingChange>,
    ) -> SyncResult<PendingChangeType> {
        let Some(mut existing) = existing else {
            let kind = change.change_type;
            self.stores.changes.save(&Changeset::added(change)).await?;
            return Ok(kind);
        };

        let coalesced = coalesce(&existing, &change);
        if coalesced.is_noop() {
            self.stores.changes.save(&Changeset::removed(existing)).await?;
            return Ok(PendingChangeType::Noop);
        }
        existing.apply_coalesced(coalesced, change.time);
        let kind = existing.change_type;
        self.stores.changes.save(&Changeset::modified(existing)).await?;
        Ok(kind)
    }

    async fn sync(&self, name: &str) -> SyncResult<SyncCycleResult> {
        let Some(entry) = self.entry(name) else {
            tracing::warn!(collection = %name, "sync requested for unregistered collection");
            return Ok(SyncCycleResult::skipped(name));
        };
        let _requested = PassMarker::new(&entry);
        self.drain().await?;
        let _pass = entry.sync_guard.lock().await;

        if !self.connectivity.is_online() {
            tracing::debug!(collection = %name, "offline, skipping sync");
            return Ok(SyncCycleResult::skipped(name));
        }

        let started = Instant::now();
        match self.run_pass(name, &entry).await {
            Ok(mut result) => {
                result.duration = started.elapsed();
                entry.set_state(SyncState::Synced);
                entry.stats.write().record_cycle(&result);
                tracing::info!(
                    collection = %name,
                    pulled = result.pulled,
                    pushed = result.pushed,
                    conflicts = result.conflicts,
                    "sync pass complete"
                );
                Ok(result)
            }
            Err(err) => {
                entry.set_state(SyncState::Error);
                entry.stats.write().last_error = Some(err.to_string());
                tracing::warn!(collection = %name, error = %err, "sync pass failed");
                Err(err)
            }
        }
    }

    async fn run_pass(&self, name: &str, entry: &Entry) -> SyncResult<SyncCycleResult> {
        let pass_start = timestamp::now_millis();
        let collection = CollectionRef::new(name);
        let mut result = SyncCycleResult::new(name);

        entry.set_state(SyncState::Pulling);
        let snapshot = self.stores.snapshot_for(name).await?;
        let last_sync = match &snapshot {
            Some(snapshot) => snapshot.last_sync,
            None if self.config.full_initial_pull => 0,
            None => pass_start,
        };
        let remote = self
            .transport
            .pull(&collection, PullParams::since(last_sync))
            .await?
            .changes;
        check_pulled(&remote)?;
        result.pulled = remote.len();
        if !remote.is_empty() {
            entry.target.apply_remote(remote.clone()).await?;
        }

        entry.set_state(SyncState::Pushing);
        let log = entry.log_lock.lock().await;
        let pending = self.stores.pending_for(name).await?;
        let resolution = resolve_detailed(&pending, &remote);
        result.conflicts = resolution.conflicts();

        let restore = resolution.local_restore();
        if !restore.is_empty() {
            entry.target.apply_remote(restore).await?;
        }

        let outgoing = resolution.outgoing;
        if !is_changeset_empty(&outgoing) {
            result.pushed = outgoing.len();
            self.transport
                .push(&collection, PushRequest::new(outgoing))
                .await?;
        }
        if !pending.is_empty() {
            result.settled = pending.len();
            self.stores
                .changes
                .save(&Changeset {
                    added: Vec::new(),
                    modified: Vec::new(),
                    removed: pending,
                })
                .await?;
        }
        drop(log);

        let snapshot = match snapshot {
            Some(snapshot) => snapshot.advanced_to(pass_start),
            None => Snapshot::new(name, pass_start),
        };
        self.stores
            .snapshots
            .save(&Changeset::modified(snapshot))
            .await?;
        Ok(result)
    }

    async fn sync_all(&self) -> Vec<SyncResult<SyncCycleResult>> {
        let names: Vec<String> = self.collections.read().keys().cloned().collect();
        let mut results = Vec::with_capacity(names.len());
        for name in names {
            results.push(self.sync(&name).await);
        }
        results
    }

    async fn handle_notification(&self, notification: Notification) {
        let Some(name) = self.config.collection_for_event(&notification.event) else {
            tracing::trace!(event = %notification.event, "ignoring notification");
            return;
        };
        let Some(entry) = self.entry(name) else {
            tracing::debug!(collection = %name, "notification for unregistered collection");
            return;
        };

        match notification.changes() {
            Some(changes) => {
                let _pass = entry.sync_guard.lock().await;
                let count = changes.len();
                match entry.target.apply_remote(changes.clone()).await {
                    Ok(()) => {
                        entry.stats.write().records_pulled += count as u64;
                        tracing::debug!(collection = %name, pulled = count, "applied pushed changes");
                    }
                    Err(err) => {
                        let err = SyncError::from(err);
                        tracing::warn!(collection = %name, error = %err, "failed to apply pushed changes");
                    }
                }
            }
            None => {
                // Failures are already logged by the pass.
                let _ = self.sync(name).await;
            }
        }
    }
}

/// Rejects pulled changes that lack ids or name a record twice.
fn check_pulled(changes: &Changeset<Record>) -> SyncResult<()> {
    let mut seen = HashSet::new();
    for record in changes
        .added
        .iter()
        .chain(&changes.modified)
        .chain(&changes.removed)
    {
        if record.id.is_empty() {
            return Err(SyncError::Protocol("pulled record without id".into()));
        }
        if !seen.insert(record.id.as_str()) {
            return Err(SyncError::Protocol(format!(
                "record {} pulled more than once",
                record.id
            )));
        }
    }
    Ok(())
}
