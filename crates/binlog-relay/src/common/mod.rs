//! # Common Relay Types and Traits
//!
//! Database-agnostic building blocks of the relay:
//!
//! - [`PositionSet`] - Executed-GTID bookkeeping (sorted interval sets)
//! - [`ReplicationEvent`] - Structured events from the replication client
//! - [`CommitBatch`] - Rows of one committed transaction plus its position
//! - [`ReplicationStream`] / [`RowSink`] - Collaborator seams
//! - [`PositionStore`] - Durable checkpoint storage
//! - [`RetryConfig`] - Backoff for transient checkpoint failures
//! - [`RelayStats`] - Counters
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Common Module                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ReplicationStream ←─── MySqlBinlogStream implements        │
//! │  ReplicationEvent  ←─── Gtid / Rows / Commit                │
//! │  CommitBatch       ←─── One per commit boundary             │
//! │  PositionSet       ←─── sid:from-to text encoding           │
//! │  PositionStore     ←─── File, memory, MySQL table           │
//! │  RowSink           ←─── LogSink or embedder-provided        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod checkpoint;
mod error;
mod event;
mod position;
mod resilience;
mod sink;
mod stats;
mod traits;

pub use checkpoint::*;
pub use error::*;
pub use event::*;
pub use position::*;
pub use resilience::*;
pub use sink::*;
pub use stats::*;
pub use traits::*;
