//! Collection API.
//!
//! Provides `Collection<T>`, an observable record set persisted through a
//! [`driftdb_storage::PersistenceAdapter`], and its options.

mod options;
mod typed;

pub use options::{CollectionOptions, Transform};
pub use typed::Collection;
