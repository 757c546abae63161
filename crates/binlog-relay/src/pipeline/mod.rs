//! # Relay Pipeline
//!
//! Two long-lived tasks connected by one bounded channel:
//!
//! ```text
//! ┌──────────────────┐   CommitBatch    ┌──────────────────┐
//! │ ReplicationStream│──▶ StreamReader ─┼─▶ BatchCommitter ─┼──▶ RowSink
//! └──────────────────┘   (mpsc, FIFO)   │   PositionSet    │──▶ PositionStore
//!                                       └──────────────────┘
//! ```
//!
//! The reader owns the stream, the committer owns the position set and the
//! checkpoint store. Batches move across the channel by value.
//!
//! ## Shutdown
//!
//! When the shutdown future resolves the reader stops and drops its sender;
//! the committer drains what is queued and returns the final positions.
//! A transaction still open at that point is never checkpointed, so it is
//! replayed on the next start.
//!
//! ## Failure
//!
//! The first fatal error ends the run. The committer always drains before
//! [`Pipeline::run`] returns; a committer error takes precedence over the
//! reader's (which is then just a closed channel).

mod committer;
mod reader;

pub use committer::BatchCommitter;
pub use reader::{StopReason, StreamReader};

use crate::common::{
    validate_stream_name, CdcError, PositionSet, PositionStore, RelayStats, RelayStatsSnapshot,
    ReplicationStream, Result, RetryConfig, RowSink, Stage, TableFilter,
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{info, warn};

/// Default number of commit batches buffered between reader and committer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Key of the checkpoint record
    pub stream_name: String,
    /// The captured table
    pub table: TableFilter,
    /// Bounded channel capacity (backpressure threshold)
    pub channel_capacity: usize,
    /// Retry policy for checkpoint writes
    pub retry: RetryConfig,
}

impl PipelineConfig {
    pub fn new(stream_name: impl Into<String>, table: TableFilter) -> Self {
        Self {
            stream_name: stream_name.into(),
            table,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_stream_name(&self.stream_name)?;
        self.table.validate()?;
        if self.channel_capacity == 0 {
            return Err(CdcError::config("channel capacity must be at least 1"));
        }
        self.retry.validate()
    }
}

/// What a completed run leaves behind.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Position set after the last committed batch
    pub positions: PositionSet,
    pub stop_reason: StopReason,
    pub stats: RelayStatsSnapshot,
}

/// Wires a stream, a sink and a checkpoint store into a running relay.
pub struct Pipeline {
    config: PipelineConfig,
    stats: Arc<RelayStats>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            stats: Arc::new(RelayStats::new()),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Live counters, updated while [`run`](Self::run) is in progress.
    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    /// Load the last checkpoint for this pipeline's stream.
    ///
    /// A missing record yields an empty set: capture starts at the server's
    /// default position.
    pub async fn load_positions<P>(&self, store: &P) -> Result<PositionSet>
    where
        P: PositionStore + ?Sized,
    {
        let stream_name = &self.config.stream_name;
        match store.load(stream_name).await {
            Ok(Some(positions)) => {
                info!("Resuming stream '{}' after {}", stream_name, positions);
                Ok(positions)
            }
            Ok(None) => {
                info!(
                    "No checkpoint for stream '{}', starting from the server default",
                    stream_name
                );
                Ok(PositionSet::new())
            }
            Err(e) => Err(e.in_stage(Stage::Startup)),
        }
    }

    /// Run until the stream ends, `shutdown` resolves or a stage fails.
    ///
    /// `positions` seeds the committer and must be the set the stream was
    /// opened from.
    pub async fn run<S, P, K, F>(
        &self,
        mut stream: S,
        positions: PositionSet,
        store: P,
        sink: K,
        shutdown: F,
    ) -> Result<PipelineOutcome>
    where
        S: ReplicationStream + 'static,
        P: PositionStore + 'static,
        K: RowSink + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);

        let reader = StreamReader::new(self.config.table.clone());
        let committer = BatchCommitter::new(
            self.config.stream_name.clone(),
            positions,
            Box::new(store),
            Box::new(sink),
        )
        .with_retry(self.config.retry.clone())
        .with_stats(Arc::clone(&self.stats));

        info!(
            "Starting relay for {} as stream '{}' (channel capacity {})",
            self.config.table, self.config.stream_name, self.config.channel_capacity
        );

        let reader_handle =
            tokio::spawn(async move { reader.run(&mut stream, tx, shutdown).await });
        let committer_handle = tokio::spawn(committer.run(rx));

        let (reader_result, committer_result) = tokio::join!(reader_handle, committer_handle);

        let committed = flatten(committer_result, Stage::BatchCommitter);
        let stopped = flatten(reader_result, Stage::StreamReader);

        let positions = committed?;
        let stop_reason = match stopped {
            Ok(reason) => reason,
            Err(e) => {
                warn!("Batch committer drained after stream reader failure");
                return Err(e);
            }
        };

        let stats = self.stats.snapshot();
        info!(
            "Relay stopped ({:?}): {} batch(es), {} row(s), {} checkpoint write(s)",
            stop_reason, stats.batches_committed, stats.rows_delivered, stats.checkpoints_written
        );

        Ok(PipelineOutcome {
            positions,
            stop_reason,
            stats,
        })
    }
}

fn flatten<T>(joined: std::result::Result<Result<T>, JoinError>, stage: Stage) -> Result<T> {
    match joined {
        Ok(result) => result.map_err(|e| e.in_stage(stage)),
        Err(e) => Err(CdcError::other(format!("task aborted: {}", e)).in_stage(stage)),
    }
}
