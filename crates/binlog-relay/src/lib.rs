//! # binlog-relay - commit-aligned change capture for MySQL
//!
//! Reads a MySQL binlog over GTID replication, cuts one batch per committed
//! transaction for a single watched table, hands the rows to a sink and
//! checkpoints the executed GTID set after every batch so a restart resumes
//! exactly where the last durable commit left off.
//!
//! ## Features
//!
//! - `mysql` (default) - binlog stream and checkpoint table over `mysql_async`
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  Gtid/Rows/Commit  ┌──────────────┐  CommitBatch  ┌────────────────┐
//! │ MySQL      │───────────────────▶│ StreamReader │──────────────▶│ BatchCommitter │
//! │ binlog     │                    └──────────────┘  (bounded)    └───────┬────────┘
//! └────────────┘                                                           │
//!                                                     RowSink ◀────────────┤
//!                                                     PositionStore ◀──────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "mysql")]
//! # async fn example() -> binlog_relay::Result<()> {
//! use binlog_relay::mysql::{MySqlBinlogStream, MySqlPositionStore, MySqlSourceConfig, MySqlStoreConfig};
//! use binlog_relay::{LogSink, Pipeline, PipelineConfig, TableFilter};
//!
//! let pipeline = Pipeline::new(PipelineConfig::new("core_event", TableFilter::new("core_event")))?;
//!
//! let store = MySqlPositionStore::new(&MySqlStoreConfig::new("localhost", "relay", "relay"))?;
//! store.ensure_table().await?;
//! let positions = pipeline.load_positions(&store).await?;
//!
//! let source = MySqlSourceConfig::new("localhost", "repl").with_password("secret");
//! let stream = MySqlBinlogStream::connect(&source, &positions).await?;
//!
//! let outcome = pipeline
//!     .run(stream, positions, store, LogSink::new(), async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//! println!("stopped at {}", outcome.positions);
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod pipeline;

#[cfg(feature = "mysql")]
pub mod mysql;

pub use common::{
    CapturedRow, CdcError, CommitBatch, FieldValue, LogSink, PositionMarker, PositionSet,
    PositionStore, ReplicationEvent, ReplicationStream, Result, RowOp, RowSink, RowsChange, Sid,
    Stage, TableFilter,
};
pub use pipeline::{Pipeline, PipelineConfig, PipelineOutcome, StopReason};
