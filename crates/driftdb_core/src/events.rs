//! Typed publish/subscribe for collection events.
//!
//! The event bus delivers events to every handler registered for the event's
//! kind, in registration order. It backs:
//! - Reactive UI updates (`inserted`, `updated`, `removed`)
//! - Sync layer integration (`_debug.*`, `destroyed`)
//! - Error reporting (`persistence.error`)
//!
//! # Usage
//!
//! ```rust
//! use driftdb_core::EventBus;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let bus: EventBus<&'static str, u32> = EventBus::new();
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&seen);
//! let id = bus.subscribe("tick", move |n| {
//!     counter.fetch_add(*n as usize, Ordering::SeqCst);
//! });
//!
//! bus.publish("tick", &2);
//! assert!(bus.unsubscribe("tick", id));
//! bus.publish("tick", &5);
//! assert_eq!(seen.load(Ordering::SeqCst), 2);
//! ```

use crate::error::CoreError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A typed event bus keyed by event kind.
///
/// The bus:
/// - Preserves registration order per kind
/// - Supports multiple handlers per kind
/// - Lets handlers subscribe or unsubscribe while being dispatched
/// - Is thread-safe
pub struct EventBus<K, E> {
    handlers: RwLock<HashMap<K, Vec<(SubscriptionId, Handler<E>)>>>,
    next_id: AtomicU64,
}

impl<K: Eq + Hash + Copy, E> EventBus<K, E> {
    /// Creates an event bus with no subscribers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a handler for one event kind.
    pub fn subscribe<F>(&self, kind: K, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Removes a handler. Returns false if it was not registered for `kind`.
    pub fn unsubscribe(&self, kind: K, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sub, _)| *sub != id);
        before != list.len()
    }

    /// Delivers an event to every handler of `kind`. Returns how many ran.
    pub fn publish(&self, kind: K, event: &E) -> usize {
        // Handlers are cloned out so they may touch the bus re-entrantly.
        let snapshot: Vec<Handler<E>> = match self.handlers.read().get(&kind) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return 0,
        };
        for handler in &snapshot {
            handler(event);
        }
        snapshot.len()
    }

    /// Returns the number of handlers registered for `kind`.
    pub fn subscriber_count(&self, kind: K) -> usize {
        self.handlers.read().get(&kind).map_or(0, Vec::len)
    }

    /// Removes every handler of every kind.
    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}

impl<K: Eq + Hash + Copy, E> Default for EventBus<K, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, E> fmt::Debug for EventBus<K, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("kinds", &self.handlers.read().len())
            .finish()
    }
}

/// Kinds of event a collection emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionEventKind {
    /// A record was inserted.
    Inserted,
    /// A record was updated.
    Updated,
    /// A record was removed.
    Removed,
    /// A storage operation failed.
    PersistenceError,
    /// A local insert, for the sync layer.
    DebugInserted,
    /// A local update, for the sync layer.
    DebugUpdated,
    /// A local removal, for the sync layer.
    DebugRemoved,
    /// The collection was cleaned up.
    Destroyed,
}

impl CollectionEventKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Inserted,
        Self::Updated,
        Self::Removed,
        Self::PersistenceError,
        Self::DebugInserted,
        Self::DebugUpdated,
        Self::DebugRemoved,
        Self::Destroyed,
    ];

    /// Returns the wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inserted => "inserted",
            Self::Updated => "updated",
            Self::Removed => "removed",
            Self::PersistenceError => "persistence.error",
            Self::DebugInserted => "_debug.inserted",
            Self::DebugUpdated => "_debug.updated",
            Self::DebugRemoved => "_debug.removed",
            Self::Destroyed => "destroyed",
        }
    }

    /// Looks a kind up by wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Returns true for the sync-internal `_debug.*` kinds.
    pub fn is_debug(self) -> bool {
        matches!(
            self,
            Self::DebugInserted | Self::DebugUpdated | Self::DebugRemoved
        )
    }
}

impl fmt::Display for CollectionEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event emitted by a collection.
#[derive(Debug, Clone)]
pub enum CollectionEvent<T> {
    /// A record was inserted.
    Inserted(T),
    /// A record was updated.
    Updated(T),
    /// A record was removed (pre-removal value).
    Removed(T),
    /// A storage operation failed.
    PersistenceError(CoreError),
    /// A local insert, for the sync layer.
    DebugInserted(T),
    /// A local update, for the sync layer.
    DebugUpdated(T),
    /// A local removal, for the sync layer.
    DebugRemoved(T),
    /// The collection was cleaned up.
    Destroyed,
}

impl<T> CollectionEvent<T> {
    /// Returns the kind of this event.
    pub fn kind(&self) -> CollectionEventKind {
        match self {
            Self::Inserted(_) => CollectionEventKind::Inserted,
            Self::Updated(_) => CollectionEventKind::Updated,
            Self::Removed(_) => CollectionEventKind::Removed,
            Self::PersistenceError(_) => CollectionEventKind::PersistenceError,
            Self::DebugInserted(_) => CollectionEventKind::DebugInserted,
            Self::DebugUpdated(_) => CollectionEventKind::DebugUpdated,
            Self::DebugRemoved(_) => CollectionEventKind::DebugRemoved,
            Self::Destroyed => CollectionEventKind::Destroyed,
        }
    }

    /// Returns the record payload, if this event carries one.
    pub fn record(&self) -> Option<&T> {
        match self {
            Self::Inserted(r)
            | Self::Updated(r)
            | Self::Removed(r)
            | Self::DebugInserted(r)
            | Self::DebugUpdated(r)
            | Self::DebugRemoved(r) => Some(r),
            Self::PersistenceError(_) | Self::Destroyed => None,
        }
    }

    /// Returns the error payload of a `persistence.error` event.
    pub fn error(&self) -> Option<&CoreError> {
        match self {
            Self::PersistenceError(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn delivers_in_registration_order() {
        let bus: EventBus<u8, &'static str> = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            bus.subscribe(1, move |e| log.lock().push(format!("{tag}:{e}")));
        }

        assert_eq!(bus.publish(1, &"x"), 3);
        assert_eq!(*log.lock(), vec!["first:x", "second:x", "third:x"]);
    }

    #[test]
    fn kinds_are_isolated() {
        let bus: EventBus<u8, ()> = EventBus::new();
        bus.subscribe(1, |_| {});
        assert_eq!(bus.publish(2, &()), 0);
        assert_eq!(bus.subscriber_count(1), 1);
        assert_eq!(bus.subscriber_count(2), 0);
    }

    #[test]
    fn unsubscribe_only_matching_kind() {
        let bus: EventBus<u8, ()> = EventBus::new();
        let id = bus.subscribe(1, |_| {});
        assert!(!bus.unsubscribe(2, id));
        assert!(bus.unsubscribe(1, id));
        assert!(!bus.unsubscribe(1, id));
    }

    #[test]
    fn handler_can_unsubscribe_itself() {
        let bus: Arc<EventBus<u8, ()>> = Arc::new(EventBus::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let inner_bus = Arc::clone(&bus);
        let inner_slot = Arc::clone(&slot);
        let id = bus.subscribe(1, move |_| {
            if let Some(id) = *inner_slot.lock() {
                inner_bus.unsubscribe(1, id);
            }
        });
        *slot.lock() = Some(id);

        assert_eq!(bus.publish(1, &()), 1);
        assert_eq!(bus.publish(1, &()), 0);
    }

    #[test]
    fn clear_drops_everything() {
        let bus: EventBus<u8, ()> = EventBus::new();
        bus.subscribe(1, |_| {});
        bus.subscribe(2, |_| {});
        bus.clear();
        assert_eq!(bus.subscriber_count(1) + bus.subscriber_count(2), 0);
    }

    #[test]
    fn wire_names() {
        assert_eq!(CollectionEventKind::PersistenceError.as_str(), "persistence.error");
        assert_eq!(CollectionEventKind::DebugUpdated.to_string(), "_debug.updated");
        for kind in CollectionEventKind::ALL {
            assert_eq!(CollectionEventKind::from_name(kind.as_str()), Some(kind));
        }
        assert!(CollectionEventKind::DebugRemoved.is_debug());
        assert!(!CollectionEventKind::Removed.is_debug());
    }

    #[test]
    fn event_accessors() {
        let event = CollectionEvent::Updated(7);
        assert_eq!(event.kind(), CollectionEventKind::Updated);
        assert_eq!(event.record(), Some(&7));
        assert!(event.error().is_none());

        let event: CollectionEvent<i32> = CollectionEvent::Destroyed;
        assert!(event.record().is_none());
    }
}
