//! Per-collection sync state and statistics.

use std::time::{Duration, Instant};

/// Where a collection is in its sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Never synced.
    Idle,
    /// Pulling changes from the remote.
    Pulling,
    /// Resolving and pushing local changes.
    Pushing,
    /// The last pass completed.
    Synced,
    /// The last pass failed.
    Error,
}

impl SyncState {
    /// Returns true while a pass is running.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Pulling | SyncState::Pushing)
    }

    /// Returns true if a new pass may start right away.
    pub fn can_start_sync(&self) -> bool {
        !self.is_active()
    }
}

/// Statistics about sync operations for one collection.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync passes completed.
    pub cycles_completed: u64,
    /// Total number of remote records pulled.
    pub records_pulled: u64,
    /// Total number of records pushed by sync passes.
    pub records_pushed: u64,
    /// Local changes pushed as soon as they were detected.
    pub immediate_pushes: u64,
    /// Local changes written to the pending log.
    pub changes_queued: u64,
    /// Total number of records both sides had touched.
    pub conflicts_encountered: u64,
    /// When the last pass completed.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

impl SyncStats {
    pub(crate) fn record_cycle(&mut self, result: &SyncCycleResult) {
        self.cycles_completed += 1;
        self.records_pulled += result.pulled as u64;
        self.records_pushed += result.pushed as u64;
        self.conflicts_encountered += result.conflicts as u64;
        self.last_sync_time = Some(Instant::now());
        self.last_error = None;
    }
}

/// Result of a sync pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncCycleResult {
    /// Collection the pass ran for.
    pub collection: String,
    /// Number of remote records pulled.
    pub pulled: usize,
    /// Number of records pushed.
    pub pushed: usize,
    /// Number of records both sides had touched.
    pub conflicts: usize,
    /// Number of pending-log entries the pass settled.
    pub settled: usize,
    /// True if nothing was attempted (offline or unknown collection).
    pub skipped: bool,
    /// Duration of the pass.
    pub duration: Duration,
}

impl SyncCycleResult {
    pub(crate) fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            pulled: 0,
            pushed: 0,
            conflicts: 0,
            settled: 0,
            skipped: false,
            duration: Duration::ZERO,
        }
    }

    /// A pass that did nothing.
    pub fn skipped(collection: impl Into<String>) -> Self {
        Self {
            skipped: true,
            ..Self::new(collection)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_state_checks() {
        assert!(SyncState::Idle.can_start_sync());
        assert!(SyncState::Synced.can_start_sync());
        assert!(SyncState::Error.can_start_sync());
        assert!(!SyncState::Pulling.can_start_sync());
        assert!(!SyncState::Pushing.can_start_sync());

        assert!(SyncState::Pulling.is_active());
        assert!(SyncState::Pushing.is_active());
        assert!(!SyncState::Idle.is_active());
    }

    #[test]
    fn stats_accumulate_cycles() {
        let mut stats = SyncStats {
            last_error: Some("boom".into()),
            ..SyncStats::default()
        };
        let result = SyncCycleResult {
            pulled: 3,
            pushed: 2,
            conflicts: 1,
            ..SyncCycleResult::new("widgets")
        };
        stats.record_cycle(&result);
        stats.record_cycle(&result);

        assert_eq!(stats.cycles_completed, 2);
        assert_eq!(stats.records_pulled, 6);
        assert_eq!(stats.records_pushed, 4);
        assert_eq!(stats.conflicts_encountered, 2);
        assert!(stats.last_sync_time.is_some());
        assert!(stats.last_error.is_none());
    }

    #[test]
    fn skipped_result() {
        let result = SyncCycleResult::skipped("widgets");
        assert!(result.skipped);
        assert_eq!(result.collection, "widgets");
        assert_eq!(result.pulled + result.pushed, 0);
    }
}
