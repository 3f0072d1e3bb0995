//! Observable, persisted collection.

use super::options::CollectionOptions;
use crate::error::{CoreError, CoreResult};
use crate::events::{CollectionEvent, CollectionEventKind, EventBus, SubscriptionId};
use crate::query::Query;
use crate::record::{
    generate_id, merge_fields, Document, Record, CREATED_AT_FIELD, ID_FIELD, UPDATED_AT_FIELD,
};
use crate::timestamp;
use driftdb_storage::{Changeset, InMemoryAdapter, PersistenceAdapter};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// The authoritative local view of one entity's records.
///
/// `Collection<T>` persists every mutation through its adapter and then
/// notifies subscribers. It is a cheap handle: clones share state.
///
/// # Failure Policy
///
/// Operations never return storage errors to the caller. A failed adapter
/// call is logged, delivered through the `persistence.error` event, and the
/// operation yields an empty result. The one exception is
/// [`register_remote_change`](Self::register_remote_change), which also
/// returns the error so the sync layer can abort its pass.
///
/// # Events
///
/// Local mutations emit a public event (`inserted`, `updated`, `removed`)
/// followed by its `_debug.*` twin for the sync layer. Remote changes emit
/// only the public events.
///
/// # Example
///
/// ```rust,ignore
/// use driftdb_core::{Collection, CollectionEventKind};
/// use serde_json::json;
///
/// let widgets: Collection = Collection::in_memory("widgets");
/// widgets.on(CollectionEventKind::Inserted, |event| println!("{event:?}"));
///
/// let widget = widgets.insert(json!({"name": "Gear", "teeth": 12})).await.unwrap();
/// widgets.update(json!({"id": widget.id, "teeth": 14})).await;
/// widgets.remove(&widget.id).await;
/// ```
pub struct Collection<T: Document = Record> {
    inner: Arc<Inner<T>>,
}

struct Inner<T: Document> {
    options: CollectionOptions<T>,
    adapter: Arc<dyn PersistenceAdapter<T>>,
    events: EventBus<CollectionEventKind, CollectionEvent<T>>,
}

impl<T: Document> Collection<T> {
    /// Creates a collection over an existing adapter.
    pub fn new(options: CollectionOptions<T>, adapter: Arc<dyn PersistenceAdapter<T>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                adapter,
                events: EventBus::new(),
            }),
        }
    }

    /// Creates a collection backed by an [`InMemoryAdapter`].
    pub fn in_memory(entity: impl Into<String>) -> Self {
        Self::in_memory_with(CollectionOptions::new(entity))
    }

    /// Creates a collection backed by an [`InMemoryAdapter`] with the given options.
    pub fn in_memory_with(options: CollectionOptions<T>) -> Self {
        let adapter =
            InMemoryAdapter::with_indexes(options.entity().to_string(), options.indexes().to_vec());
        Self::new(options, Arc::new(adapter))
    }

    /// Entity (store) name.
    pub fn entity(&self) -> &str {
        self.inner.options.entity()
    }

    /// The backing adapter.
    pub fn adapter(&self) -> &Arc<dyn PersistenceAdapter<T>> {
        &self.inner.adapter
    }

    /// Returns every record, in index order.
    pub async fn get_all(&self) -> Vec<T> {
        match self.inner.adapter.get_all().await {
            Ok(records) => records.into_iter().map(|r| self.present(r)).collect(),
            Err(err) => {
                self.report(err.into());
                Vec::new()
            }
        }
    }

    /// Returns the record with the given id.
    pub async fn get(&self, id: &str) -> Option<T> {
        match self.inner.adapter.get_one(id).await {
            Ok(record) => record.map(|r| self.present(r)),
            Err(err) => {
                self.report(err.into());
                None
            }
        }
    }

    /// Returns the records matching a query.
    ///
    /// Query errors are reported like storage errors.
    pub async fn find(&self, query: &Query) -> Vec<T> {
        let all = self.get_all().await;
        match query.run(&all) {
            Ok(found) => found,
            Err(err) => {
                self.report(err.into());
                Vec::new()
            }
        }
    }

    /// Inserts a record built from `partial`.
    ///
    /// A fresh `id` and `createdAt` always overwrite any in the partial.
    /// Returns `None` if the partial does not form a valid `T` or the write
    /// fails.
    pub async fn insert<P: Serialize>(&self, partial: P) -> Option<T> {
        match self.try_insert(partial).await {
            Ok(record) => Some(record),
            Err(err) => {
                self.report(err);
                None
            }
        }
    }

    /// Shallow-merges `partial` onto the record named by its `id`.
    ///
    /// Does nothing if the partial has no `id`. A missing record is reported
    /// as [`CoreError::NotFound`].
    pub async fn update<P: Serialize>(&self, partial: P) -> Option<T> {
        match self.try_update(partial).await {
            Ok(record) => record,
            Err(err) => {
                self.report(err);
                None
            }
        }
    }

    /// Removes a record. Does nothing if it does not exist.
    ///
    /// Returns the removed record.
    pub async fn remove(&self, id: &str) -> Option<T> {
        match self.try_remove(id).await {
            Ok(record) => record,
            Err(err) => {
                self.report(err);
                None
            }
        }
    }

    /// Applies an already-resolved remote changeset in one write.
    ///
    /// Remote `added` records are written as upserts so re-applying the same
    /// changeset is harmless. Emits only public events.
    ///
    /// # Errors
    ///
    /// Returns the storage error, after reporting it through
    /// `persistence.error`.
    pub async fn register_remote_change(&self, changeset: Changeset<T>) -> CoreResult<()> {
        let write = Changeset {
            added: Vec::new(),
            modified: changeset
                .added
                .iter()
                .chain(&changeset.modified)
                .cloned()
                .collect(),
            removed: changeset.removed.clone(),
        };

        if let Err(err) = self.inner.adapter.save(&write).await {
            let err = CoreError::from(err);
            self.report(err.clone());
            return Err(err);
        }

        tracing::debug!(
            collection = %self.entity(),
            added = changeset.added.len(),
            modified = changeset.modified.len(),
            removed = changeset.removed.len(),
            "applied remote changes"
        );

        for record in changeset.added {
            self.emit(CollectionEvent::Inserted(self.present(record)));
        }
        for record in changeset.modified {
            self.emit(CollectionEvent::Updated(self.present(record)));
        }
        for record in changeset.removed {
            self.emit(CollectionEvent::Removed(self.present(record)));
        }
        Ok(())
    }

    /// Subscribes to one kind of event.
    pub fn on<F>(&self, kind: CollectionEventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&CollectionEvent<T>) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(kind, handler)
    }

    /// Unsubscribes a handler. Returns false if it was not registered.
    pub fn off(&self, kind: CollectionEventKind, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(kind, id)
    }

    /// Number of handlers registered for one kind of event.
    pub fn subscriber_count(&self, kind: CollectionEventKind) -> usize {
        self.inner.events.subscriber_count(kind)
    }

    /// Emits `destroyed`, then drops every subscription.
    pub fn cleanup(&self) {
        self.emit(CollectionEvent::Destroyed);
        self.inner.events.clear();
    }

    async fn try_insert<P: Serialize>(&self, partial: P) -> CoreResult<T> {
        let mut fields = to_object(partial)?;
        fields.insert(ID_FIELD.into(), Value::String(generate_id()));
        fields.insert(CREATED_AT_FIELD.into(), Value::String(timestamp::now_string()));
        let record: T = serde_json::from_value(Value::Object(fields))?;

        self.inner.adapter.save(&Changeset::added(record.clone())).await?;
        tracing::debug!(collection = %self.entity(), record_id = %record.record_id(), "inserted record");

        let public = self.present(record.clone());
        self.emit(CollectionEvent::Inserted(public.clone()));
        self.emit(CollectionEvent::DebugInserted(record));
        Ok(public)
    }

    async fn try_update<P: Serialize>(&self, partial: P) -> CoreResult<Option<T>> {
        let mut patch = to_object(partial)?;
        let id = match patch.remove(ID_FIELD) {
            Some(Value::String(id)) if !id.is_empty() => id,
            _ => return Ok(None),
        };

        let previous = self
            .inner
            .adapter
            .get_one(&id)
            .await?
            .ok_or_else(|| CoreError::not_found(self.entity(), id.as_str()))?;

        let mut fields = to_object(&previous)?;
        merge_fields(&mut fields, patch);
        fields.insert(UPDATED_AT_FIELD.into(), Value::String(timestamp::now_string()));
        let record: T = serde_json::from_value(Value::Object(fields))?;

        self.inner.adapter.save(&Changeset::modified(record.clone())).await?;
        tracing::debug!(collection = %self.entity(), record_id = %id, "updated record");

        let public = self.present(record.clone());
        self.emit(CollectionEvent::Updated(public.clone()));
        self.emit(CollectionEvent::DebugUpdated(record));
        Ok(Some(public))
    }

    async fn try_remove(&self, id: &str) -> CoreResult<Option<T>> {
        let Some(previous) = self.inner.adapter.get_one(id).await? else {
            return Ok(None);
        };

        self.inner.adapter.save(&Changeset::removed(previous.clone())).await?;
        tracing::debug!(collection = %self.entity(), record_id = %id, "removed record");

        let public = self.present(previous.clone());
        self.emit(CollectionEvent::Removed(public.clone()));
        self.emit(CollectionEvent::DebugRemoved(previous));
        Ok(Some(public))
    }

    fn present(&self, record: T) -> T {
        match self.inner.options.transform() {
            Some(transform) => transform(record),
            None => record,
        }
    }

    fn emit(&self, event: CollectionEvent<T>) {
        self.inner.events.publish(event.kind(), &event);
    }

    fn report(&self, err: CoreError) {
        tracing::warn!(collection = %self.entity(), error = %err, "persistence error");
        self.emit(CollectionEvent::PersistenceError(err));
    }
}

fn to_object<P: Serialize>(value: P) -> CoreResult<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(CoreError::invalid_record(format!(
            "expected an object, got {other}"
        ))),
    }
}

impl<T: Document> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Document> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("entity", &self.entity())
            .field("options", &self.inner.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Query;
    use driftdb_storage::{FileAdapter, StorageError};
    use parking_lot::Mutex;
    use serde::Deserialize;
    use serde_json::json;

    /// Records every event kind (and record id) a collection emits.
    fn record_events<T: Document>(collection: &Collection<T>) -> Arc<Mutex<Vec<String>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        for kind in CollectionEventKind::ALL {
            let log = Arc::clone(&log);
            collection.on(kind, move |event| {
                let entry = match event.record() {
                    Some(r) => format!("{}:{}", kind, r.record_id()),
                    None => kind.to_string(),
                };
                log.lock().push(entry);
            });
        }
        log
    }

    fn failing() -> (Collection, Arc<InMemoryAdapter<Record>>) {
        let adapter = Arc::new(InMemoryAdapter::new("widgets"));
        let collection = Collection::new(CollectionOptions::new("widgets"), adapter.clone());
        (collection, adapter)
    }

    #[tokio::test]
    async fn insert_assigns_id_and_created_at() {
        let widgets: Collection = Collection::in_memory("widgets");
        let inserted = widgets
            .insert(json!({"id": "mine", "createdAt": "1999-01-01T00:00:00.000Z", "name": "Gear"}))
            .await
            .unwrap();

        assert_ne!(inserted.id, "mine");
        assert_ne!(inserted.created_at.as_deref(), Some("1999-01-01T00:00:00.000Z"));
        assert!(inserted.updated_at.is_none());
        assert_eq!(widgets.get(&inserted.id).await, Some(inserted.clone()));
        assert_eq!(widgets.get_all().await, vec![inserted]);
    }

    #[tokio::test]
    async fn insert_emits_public_then_debug() {
        let widgets: Collection = Collection::in_memory("widgets");
        let log = record_events(&widgets);
        let w = widgets.insert(json!({"name": "Gear"})).await.unwrap();

        assert_eq!(
            *log.lock(),
            vec![format!("inserted:{}", w.id), format!("_debug.inserted:{}", w.id)]
        );
    }

    #[tokio::test]
    async fn update_merges_and_stamps() {
        let widgets: Collection = Collection::in_memory("widgets");
        let w = widgets.insert(json!({"name": "Gear", "teeth": 12, "color": "red"})).await.unwrap();
        let log = record_events(&widgets);

        let updated = widgets.update(json!({"id": w.id, "teeth": 14})).await.unwrap();
        assert_eq!(updated.field("teeth"), Some(&json!(14)));
        assert_eq!(updated.field("color"), Some(&json!("red")));
        assert_eq!(updated.created_at, w.created_at);
        assert!(updated.updated_at.is_some());
        assert_eq!(
            *log.lock(),
            vec![format!("updated:{}", w.id), format!("_debug.updated:{}", w.id)]
        );
    }

    #[tokio::test]
    async fn update_without_id_is_a_no_op() {
        let widgets: Collection = Collection::in_memory("widgets");
        let log = record_events(&widgets);
        assert!(widgets.update(json!({"teeth": 3})).await.is_none());
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn update_missing_record_reports_not_found() {
        let widgets: Collection = Collection::in_memory("widgets");
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        widgets.on(CollectionEventKind::PersistenceError, move |event| {
            if let Some(err) = event.error() {
                sink.lock().push(err.clone());
            }
        });

        assert!(widgets.update(json!({"id": "ghost", "teeth": 3})).await.is_none());
        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], CoreError::NotFound { id, .. } if id == "ghost"));
    }

    #[tokio::test]
    async fn remove_emits_previous_value() {
        let widgets: Collection = Collection::in_memory("widgets");
        let w = widgets.insert(json!({"name": "Gear"})).await.unwrap();
        let log = record_events(&widgets);

        assert_eq!(widgets.remove(&w.id).await, Some(w.clone()));
        assert!(widgets.get(&w.id).await.is_none());
        assert_eq!(
            *log.lock(),
            vec![format!("removed:{}", w.id), format!("_debug.removed:{}", w.id)]
        );

        assert!(widgets.remove(&w.id).await.is_none());
        assert_eq!(log.lock().len(), 2);
    }

    #[tokio::test]
    async fn non_object_partial_is_invalid() {
        let widgets: Collection = Collection::in_memory("widgets");
        let log = record_events(&widgets);
        assert!(widgets.insert(json!([1, 2, 3])).await.is_none());
        assert_eq!(*log.lock(), vec!["persistence.error".to_string()]);
    }

    #[tokio::test]
    async fn typed_collection_rejects_incomplete_partial() {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Widget {
            id: String,
            name: String,
            teeth: u32,
            #[serde(default)]
            created_at: Option<String>,
            #[serde(default)]
            updated_at: Option<String>,
        }

        impl driftdb_storage::StoredRecord for Widget {
            fn record_id(&self) -> &str {
                &self.id
            }
        }

        impl Document for Widget {
            fn created_at(&self) -> Option<&str> {
                self.created_at.as_deref()
            }
            fn updated_at(&self) -> Option<&str> {
                self.updated_at.as_deref()
            }
        }

        let widgets: Collection<Widget> = Collection::in_memory("widgets");
        let log = record_events(&widgets);
        assert!(widgets.insert(json!({"name": "Gear"})).await.is_none());
        assert_eq!(*log.lock(), vec!["persistence.error".to_string()]);

        let w = widgets.insert(json!({"name": "Gear", "teeth": 3})).await.unwrap();
        let w = widgets.update(json!({"id": w.id, "teeth": 4})).await.unwrap();
        assert_eq!(w.teeth, 4);
        assert!(w.updated_at_millis() > 0);
    }

    #[tokio::test]
    async fn storage_failures_degrade_to_events() {
        let (widgets, adapter) = failing();
        let w = widgets.insert(json!({"name": "Gear"})).await.unwrap();
        let log = record_events(&widgets);

        adapter.set_failing(true);
        assert!(widgets.get_all().await.is_empty());
        assert!(widgets.get(&w.id).await.is_none());
        assert!(widgets.insert(json!({"name": "Bolt"})).await.is_none());
        assert!(widgets.update(json!({"id": w.id, "name": "x"})).await.is_none());
        assert!(widgets.remove(&w.id).await.is_none());
        let err = widgets
            .register_remote_change(Changeset::added(Record::new("r")))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Storage(ref e) if matches!(**e, StorageError::Unavailable(_))));

        assert_eq!(log.lock().len(), 6);
        assert!(log.lock().iter().all(|e| e == "persistence.error"));

        adapter.set_failing(false);
        assert_eq!(widgets.get_all().await.len(), 1);
    }

    #[tokio::test]
    async fn remote_changes_emit_public_events_only_and_are_idempotent() {
        let widgets: Collection = Collection::in_memory("widgets");
        let local = widgets.insert(json!({"name": "Local"})).await.unwrap();
        let log = record_events(&widgets);

        let changes = Changeset {
            added: vec![Record::new("r1").with_name("Remote")],
            modified: vec![Record::new(local.id.clone()).with_name("Edited")],
            removed: vec![],
        };
        widgets.register_remote_change(changes.clone()).await.unwrap();
        let first_state = widgets.get_all().await;
        let first_events = log.lock().len();

        widgets.register_remote_change(changes).await.unwrap();
        assert_eq!(widgets.get_all().await, first_state);
        assert_eq!(log.lock().len(), first_events * 2);
        assert!(log.lock().iter().all(|e| !e.starts_with("_debug")));
        assert_eq!(
            log.lock()[..2].to_vec(),
            vec!["inserted:r1".to_string(), format!("updated:{}", local.id)]
        );

        widgets
            .register_remote_change(Changeset::removed(Record::new("r1")))
            .await
            .unwrap();
        assert!(widgets.get("r1").await.is_none());
    }

    #[tokio::test]
    async fn transform_applies_to_public_reads_only() {
        let options = CollectionOptions::new("widgets").with_transform(|mut r: Record| {
            r.name = r.name.to_uppercase();
            r
        });
        let widgets: Collection = Collection::in_memory_with(options);

        let raw = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&raw);
        widgets.on(CollectionEventKind::DebugInserted, move |event| {
            *sink.lock() = event.record().map(|r| r.name.clone());
        });

        let w = widgets.insert(json!({"name": "gear"})).await.unwrap();
        assert_eq!(w.name, "GEAR");
        assert_eq!(widgets.get(&w.id).await.unwrap().name, "GEAR");
        assert_eq!(raw.lock().as_deref(), Some("gear"));
        let stored = widgets.adapter().get_one(&w.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "gear");
    }

    #[tokio::test]
    async fn off_and_cleanup() {
        let widgets: Collection = Collection::in_memory("widgets");
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let id = widgets.on(CollectionEventKind::Inserted, move |_| sink.lock().push("first"));
        let sink = Arc::clone(&log);
        widgets.on(CollectionEventKind::Destroyed, move |_| sink.lock().push("destroyed"));

        assert!(widgets.off(CollectionEventKind::Inserted, id));
        widgets.insert(json!({"name": "Gear"})).await;
        widgets.cleanup();
        widgets.cleanup();

        assert_eq!(*log.lock(), vec!["destroyed"]);
        assert_eq!(widgets.subscriber_count(CollectionEventKind::Destroyed), 0);
    }

    #[tokio::test]
    async fn find_filters_with_queries() {
        let widgets: Collection = Collection::in_memory("widgets");
        widgets.insert(json!({"name": "a", "teeth": 10})).await;
        widgets.insert(json!({"name": "b", "teeth": 20})).await;
        widgets.insert(json!({"name": "c", "teeth": 30})).await;

        let query = Query::parse(&json!({"teeth": {"$gte": 20}})).unwrap();
        let names: Vec<String> = widgets.find(&query).await.into_iter().map(|r| r.name).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"b".to_string()) && names.contains(&"c".to_string()));
    }

    #[tokio::test]
    async fn file_backed_collection_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let adapter: FileAdapter<Record> = FileAdapter::open(dir.path(), "widgets", vec![]).unwrap();
            let widgets: Collection =
                Collection::new(CollectionOptions::new("widgets"), Arc::new(adapter));
            widgets.insert(json!({"name": "Gear"})).await.unwrap().id
        };

        let adapter: FileAdapter<Record> = FileAdapter::open(dir.path(), "widgets", vec![]).unwrap();
        let widgets: Collection = Collection::new(CollectionOptions::new("widgets"), Arc::new(adapter));
        assert_eq!(widgets.get(&id).await.unwrap().name, "Gear");
    }
}
