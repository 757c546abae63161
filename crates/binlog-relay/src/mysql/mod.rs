//! MySQL adapters: GTID binlog stream and checkpoint table
//!
//! Requires:
//! - MySQL 5.7+, 8.0+ with `gtid_mode=ON`
//! - Row-based replication (`binlog_format=ROW`, `binlog_row_image=FULL`)
//!
//! # Example
//!
//! ```rust,no_run
//! use binlog_relay::common::PositionStore;
//! use binlog_relay::mysql::{MySqlBinlogStream, MySqlPositionStore, MySqlSourceConfig, MySqlStoreConfig};
//!
//! # async fn example() -> binlog_relay::common::Result<()> {
//! let store = MySqlPositionStore::new(&MySqlStoreConfig::new("localhost", "relay", "relay"))?;
//! store.ensure_table().await?;
//! let positions = store.load("core_event").await?.unwrap_or_default();
//!
//! let source = MySqlSourceConfig::new("localhost", "repl")
//!     .with_password("password")
//!     .with_server_id(1001);
//! let _stream = MySqlBinlogStream::connect(&source, &positions).await?;
//! # Ok(())
//! # }
//! ```

mod checkpoint;
mod config;
mod stream;

pub use checkpoint::MySqlPositionStore;
pub use config::{validate_identifier, MySqlSourceConfig, MySqlStoreConfig, DEFAULT_POSITION_TABLE};
pub use stream::MySqlBinlogStream;
