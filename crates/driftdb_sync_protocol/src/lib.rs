//! # DriftDB Sync Protocol
//!
//! Sync vocabulary and merge functions for DriftDB.
//!
//! This crate provides:
//! - [`PendingChange`], the durable entry of the offline mutation log
//! - [`Snapshot`], the per-collection sync cursor
//! - [`coalesce`] for folding repeated mutations of one record
//! - [`resolve`] for last-write-wins conflict resolution
//! - Pull and push message shapes
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod merge;
mod messages;
mod pending;
mod snapshot;

pub use conflict::{
    is_changeset_empty, resolve, resolve_detailed, ConflictResolution, Decision, RemotePresence,
    Resolution,
};
pub use merge::{coalesce, merge_records};
pub use messages::{CollectionRef, PullParams, PullResponse, PushRequest};
pub use pending::{Coalesced, PendingChange, PendingChangeType};
pub use snapshot::Snapshot;
