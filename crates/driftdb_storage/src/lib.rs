//! # DriftDB Storage
//!
//! Persistence adapter contract and implementations for DriftDB.
//!
//! This crate provides the lowest-level storage abstraction for DriftDB.
//! An adapter serves one named store of typed records, keyed by id, with
//! optional secondary indexes. Writes arrive as [`Changeset`]s and are
//! applied atomically.
//!
//! ## Design Principles
//!
//! - Adapters know records only through [`StoredRecord`] and serde
//! - A changeset is applied entirely or not at all
//! - Must be `Send + Sync` for concurrent access
//! - Collections and the sync engine own all record semantics
//!
//! ## Available Adapters
//!
//! - [`InMemoryAdapter`] - For testing and ephemeral stores
//! - [`FileAdapter`] - For persistent stores (CBOR file per store)
//!
//! ## Example
//!
//! ```rust,ignore
//! use driftdb_storage::{Changeset, InMemoryAdapter, PersistenceAdapter};
//!
//! let store = InMemoryAdapter::new("widgets");
//! store.save(&Changeset::added(widget)).await?;
//! let all = store.get_all().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod changeset;
mod error;
mod file;
mod index;
mod memory;
mod table;

pub use adapter::PersistenceAdapter;
pub use changeset::{Changeset, StoredRecord};
pub use error::{StorageError, StorageResult};
pub use file::FileAdapter;
pub use index::{compare_values, value_at_path, values_equal, IndexDescriptor};
pub use memory::InMemoryAdapter;
