//! Relay counters

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared between the committer and whoever reports on it.
#[derive(Debug, Default)]
pub struct RelayStats {
    /// Commit batches taken off the channel
    pub batches_committed: AtomicU64,
    /// Rows delivered to the sink
    pub rows_delivered: AtomicU64,
    /// Batches whose position was already recorded
    pub duplicates_skipped: AtomicU64,
    /// Successful checkpoint writes
    pub checkpoints_written: AtomicU64,
    /// Checkpoint writes that had to be retried
    pub checkpoint_retries: AtomicU64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_batch(&self, rows: usize) {
        self.batches_committed.fetch_add(1, Ordering::Relaxed);
        self.rows_delivered.fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checkpoint(&self) {
        self.checkpoints_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checkpoint_retry(&self) {
        self.checkpoint_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            rows_delivered: self.rows_delivered.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            checkpoints_written: self.checkpoints_written.load(Ordering::Relaxed),
            checkpoint_retries: self.checkpoint_retries.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStatsSnapshot {
    pub batches_committed: u64,
    pub rows_delivered: u64,
    pub duplicates_skipped: u64,
    pub checkpoints_written: u64,
    pub checkpoint_retries: u64,
}
