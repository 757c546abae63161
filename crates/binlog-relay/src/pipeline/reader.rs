//! Stream Reader
//!
//! Turns the ordered replication event stream into commit-aligned
//! [`CommitBatch`]es:
//!
//! ```text
//! Idle ──Gtid──▶ Accumulating ──Commit──▶ (batch emitted) ──▶ Idle
//!                   │    ▲
//!                   └Rows┘
//! ```
//!
//! Any event that does not fit this machine is a protocol error. The stream
//! offers no resynchronization point, so the reader stops instead of
//! guessing where the next transaction starts.

use crate::common::{
    CapturedRow, CdcError, CommitBatch, PositionMarker, ReplicationEvent, ReplicationStream,
    Result, RowsChange, TableFilter,
};
use std::future::Future;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Why the reader stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The shutdown signal fired
    Shutdown,
    /// The replication stream reported end of stream
    StreamEnded,
}

#[derive(Debug, Default)]
enum TxnState {
    #[default]
    Idle,
    Accumulating {
        position: PositionMarker,
        rows: Vec<CapturedRow>,
    },
}

/// Commit-boundary detector for one watched table.
#[derive(Debug)]
pub struct StreamReader {
    table: TableFilter,
    state: TxnState,
    batches_emitted: u64,
}

impl StreamReader {
    pub fn new(table: TableFilter) -> Self {
        Self {
            table,
            state: TxnState::Idle,
            batches_emitted: 0,
        }
    }

    /// Position of the transaction currently open, if any.
    pub fn pending_position(&self) -> Option<PositionMarker> {
        match &self.state {
            TxnState::Idle => None,
            TxnState::Accumulating { position, .. } => Some(*position),
        }
    }

    /// Rows captured so far for the open transaction.
    pub fn pending_rows(&self) -> usize {
        match &self.state {
            TxnState::Idle => 0,
            TxnState::Accumulating { rows, .. } => rows.len(),
        }
    }

    pub fn batches_emitted(&self) -> u64 {
        self.batches_emitted
    }

    /// Apply one event. Returns the finished batch on a commit boundary.
    pub fn handle(&mut self, event: ReplicationEvent) -> Result<Option<CommitBatch>> {
        match event {
            ReplicationEvent::Gtid(marker) => {
                if let TxnState::Accumulating { position, .. } = &self.state {
                    return Err(CdcError::protocol(format!(
                        "GTID {} received while transaction {} is still open",
                        marker, position
                    )));
                }
                trace!("Transaction {} begins", marker);
                self.state = TxnState::Accumulating {
                    position: marker,
                    rows: Vec::new(),
                };
                Ok(None)
            }

            ReplicationEvent::Rows(change) => {
                if !self.table.matches(&change.schema, &change.table) {
                    trace!(
                        "Ignoring {} rows of {}.{}",
                        change.rows.len(),
                        change.schema,
                        change.table
                    );
                    return Ok(None);
                }
                match &mut self.state {
                    TxnState::Idle => Err(CdcError::protocol(format!(
                        "rows for {}.{} outside of a transaction",
                        change.schema, change.table
                    ))),
                    TxnState::Accumulating { rows, .. } => {
                        capture_rows(&change, rows)?;
                        Ok(None)
                    }
                }
            }

            ReplicationEvent::Commit { xid } => match std::mem::take(&mut self.state) {
                TxnState::Idle => Err(CdcError::protocol(match xid {
                    Some(xid) => format!("commit (xid {}) without a preceding GTID", xid),
                    None => "commit without a preceding GTID".to_string(),
                })),
                TxnState::Accumulating { position, rows } => {
                    debug!(
                        "Transaction {} committed with {} row(s)",
                        position,
                        rows.len()
                    );
                    self.batches_emitted += 1;
                    Ok(Some(CommitBatch::new(rows, position, xid)))
                }
            },
        }
    }

    /// Read `stream` until it ends, fails or `shutdown` resolves, pushing
    /// every finished batch into `tx`.
    ///
    /// A full channel blocks the reader. If the receiving side is gone,
    /// even while waiting for the next event, the reader fails with
    /// [`CdcError::ChannelClosed`].
    pub async fn run<S, F>(
        mut self,
        stream: &mut S,
        tx: mpsc::Sender<CommitBatch>,
        shutdown: F,
    ) -> Result<StopReason>
    where
        S: ReplicationStream + ?Sized,
        F: Future<Output = ()>,
    {
        info!("Stream reader started for table {}", self.table);
        tokio::pin!(shutdown);

        let reason = loop {
            let event = tokio::select! {
                biased;
                _ = &mut shutdown => break StopReason::Shutdown,
                _ = tx.closed() => return Err(CdcError::ChannelClosed),
                event = stream.next_event() => event?,
            };

            let Some(event) = event else {
                break StopReason::StreamEnded;
            };

            if let Some(batch) = self.handle(event)? {
                tx.send(batch).await.map_err(|_| CdcError::ChannelClosed)?;
            }
        };

        if let TxnState::Accumulating { position, rows } = &self.state {
            info!(
                "Discarding open transaction {} ({} row(s)) on stop",
                position,
                rows.len()
            );
        }
        info!(
            "Stream reader stopped ({:?}) after {} batch(es)",
            reason, self.batches_emitted
        );
        Ok(reason)
    }
}

fn capture_rows(change: &RowsChange, rows: &mut Vec<CapturedRow>) -> Result<()> {
    rows.reserve(change.rows.len());
    for image in &change.rows {
        let row = CapturedRow::decode(change.op, image).map_err(|e| {
            CdcError::decode(format!("{}.{}: {}", change.schema, change.table, e))
        })?;
        trace!("Captured {} of row {}", row.op, row.id);
        rows.push(row);
    }
    Ok(())
}
