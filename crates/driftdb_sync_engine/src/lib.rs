//! # DriftDB Sync Engine
//!
//! Offline-first synchronization for DriftDB collections.
//!
//! This crate provides:
//! - [`SyncManager`], which tracks local changes and runs sync passes
//! - Durable pending-change logs and sync cursors ([`SyncStores`])
//! - The [`RemoteTransport`] abstraction with in-process implementations
//! - Realtime wake-ups through a [`PushChannel`]
//! - A shared online flag ([`Connectivity`])
//!
//! ## Architecture
//!
//! The sync engine implements a **pull-then-push** synchronization model:
//! 1. Pull remote changes since the last pass and apply them locally
//! 2. Resolve local pending changes against them (last write wins)
//! 3. Push the outcome to the remote
//!
//! ## Key Invariants
//!
//! - Pull always happens before push
//! - At most one pending change exists per record
//! - Remote changes never re-enter the pending log
//! - A failed pass never advances the sync cursor

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod error;
mod manager;
mod notify;
mod state;
mod stores;
mod target;
mod transport;

pub use config::{SyncConfig, DEFAULT_NOTIFICATION_PREFIX, DEFAULT_STORE_PREFIX};
pub use connectivity::Connectivity;
pub use error::{SyncError, SyncResult};
pub use manager::SyncManager;
pub use notify::{Notification, PushChannel, DEFAULT_CHANNEL_CAPACITY};
pub use state::{SyncCycleResult, SyncState, SyncStats};
pub use stores::{SyncStores, NAME_INDEX, RECORD_ID_INDEX};
pub use transport::{InMemoryRemote, MockTransport, RemoteTransport};
