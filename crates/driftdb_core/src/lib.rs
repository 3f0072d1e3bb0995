//! # DriftDB Core
//!
//! Observable record collections for DriftDB.
//!
//! This crate provides:
//! - [`Record`] and the [`Document`] trait for typed records
//! - [`Collection`], a persisted record set with change events
//! - [`EventBus`], the typed publish/subscribe used by collections
//! - [`query`], MongoDB-style record matching for filtered views
//! - [`timestamp`], the canonical record clock

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod error;
mod events;
pub mod query;
mod record;
pub mod timestamp;

pub use collection::{Collection, CollectionOptions, Transform};
pub use error::{CoreError, CoreResult};
pub use events::{CollectionEvent, CollectionEventKind, EventBus, SubscriptionId};
pub use query::{Query, QueryError, Selector, SortOrder};
pub use record::{
    generate_id, merge_fields, Document, Record, CREATED_AT_FIELD, ID_FIELD, UPDATED_AT_FIELD,
};
