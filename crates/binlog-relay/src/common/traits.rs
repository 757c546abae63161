//! Traits at the pipeline's collaborator seams
//!
//! The replication client and the downstream consumer are external to the
//! pipeline; these traits are the only surface it relies on.

use crate::common::{CommitBatch, ReplicationEvent, Result};
use async_trait::async_trait;

/// Ordered source of structured replication events.
///
/// The stream is not restartable: once it returns an error or `Ok(None)`
/// it must not be polled again.
#[async_trait]
pub trait ReplicationStream: Send {
    /// Wait for the next event.
    ///
    /// Returns `Ok(None)` when the server closed the stream.
    async fn next_event(&mut self) -> Result<Option<ReplicationEvent>>;
}

/// Downstream consumer of committed rows.
#[async_trait]
pub trait RowSink: Send {
    /// Deliver the rows of one committed transaction.
    ///
    /// Called once per batch, in commit order, before the batch's position
    /// is checkpointed. Position-only batches are not delivered.
    async fn deliver(&mut self, batch: &CommitBatch) -> Result<()>;
}

