//! Batch Committer
//!
//! Sole owner of the live [`PositionSet`]. For every batch, in channel
//! order: deliver the rows, record the position, persist the whole set.
//! A batch whose position is already recorded is skipped entirely.

use crate::common::{
    CommitBatch, PositionSet, PositionStore, RelayStats, Result, RetryConfig, RowSink,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct BatchCommitter {
    stream_name: String,
    positions: PositionSet,
    store: Box<dyn PositionStore>,
    sink: Box<dyn RowSink>,
    retry: RetryConfig,
    stats: Arc<RelayStats>,
}

impl BatchCommitter {
    pub fn new(
        stream_name: impl Into<String>,
        positions: PositionSet,
        store: Box<dyn PositionStore>,
        sink: Box<dyn RowSink>,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            positions,
            store,
            sink,
            retry: RetryConfig::default(),
            stats: Arc::new(RelayStats::new()),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_stats(mut self, stats: Arc<RelayStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn positions(&self) -> &PositionSet {
        &self.positions
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    /// Commit one batch. Returns `false` if it was a duplicate.
    pub async fn commit(&mut self, batch: CommitBatch) -> Result<bool> {
        if self.positions.contains_marker(&batch.position) {
            warn!(
                "Skipping batch {} ({} row(s)): position already committed",
                batch.position,
                batch.len()
            );
            self.stats.record_duplicate();
            return Ok(false);
        }

        if !batch.is_empty() {
            self.sink.deliver(&batch).await?;
        }

        self.positions.add_marker(batch.position);
        save_with_retry(
            self.store.as_ref(),
            &self.stream_name,
            &self.positions,
            &self.retry,
            &self.stats,
        )
        .await?;
        self.stats.record_batch(batch.len());

        debug!(
            "Committed {} ({} row(s)), positions now {}",
            batch.position,
            batch.len(),
            self.positions
        );
        Ok(true)
    }

    /// Commit batches until every sender is gone and the channel is empty.
    ///
    /// Returns the final position set. On error the receiver is dropped,
    /// which the reader observes as a closed channel.
    pub async fn run(mut self, mut rx: mpsc::Receiver<CommitBatch>) -> Result<PositionSet> {
        info!(
            "Batch committer started for stream '{}' at {}",
            self.stream_name,
            if self.positions.is_empty() {
                "<empty>".to_string()
            } else {
                self.positions.to_string()
            }
        );

        while let Some(batch) = rx.recv().await {
            self.commit(batch).await?;
        }

        let stats = self.stats.snapshot();
        info!(
            "Batch committer drained: {} batch(es), {} row(s), {} duplicate(s) skipped",
            stats.batches_committed, stats.rows_delivered, stats.duplicates_skipped
        );
        Ok(self.positions)
    }
}

/// Persist the full set, retrying transient store failures.
async fn save_with_retry(
    store: &dyn PositionStore,
    stream_name: &str,
    positions: &PositionSet,
    retry: &RetryConfig,
    stats: &RelayStats,
) -> Result<()> {
    retry
        .run(
            "checkpoint write",
            move || store.save(stream_name, positions),
            || stats.record_checkpoint_retry(),
        )
        .await?;
    stats.record_checkpoint();
    Ok(())
}
