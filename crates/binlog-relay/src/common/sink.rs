//! Built-in row sinks

use crate::common::{CommitBatch, Result, RowSink};
use async_trait::async_trait;
use tracing::info;

/// Logs every captured row at `info` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RowSink for LogSink {
    async fn deliver(&mut self, batch: &CommitBatch) -> Result<()> {
        for row in &batch.rows {
            info!(
                id = row.id,
                op = %row.op,
                created_at = %row.created_at,
                gtid = %batch.position,
                "{}",
                String::from_utf8_lossy(&row.data)
            );
        }
        Ok(())
    }
}
