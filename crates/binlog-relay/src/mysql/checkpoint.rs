//! Checkpoint table in MySQL
//!
//! ```sql
//! CREATE TABLE relay_positions (
//!     stream_name   VARCHAR(255) NOT NULL PRIMARY KEY,
//!     position_text MEDIUMTEXT   NOT NULL,
//!     updated_at    TIMESTAMP    NOT NULL DEFAULT CURRENT_TIMESTAMP
//! )
//! ```
//!
//! Writes use the `INSERT ... AS new ON DUPLICATE KEY UPDATE` row alias,
//! which needs MySQL 8.0.19 or later.

use super::config::MySqlStoreConfig;
use crate::common::{validate_stream_name, PositionSet, PositionStore, Result};
use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::Pool;
use tracing::{debug, info};

/// Position store backed by one row per stream in a MySQL table.
pub struct MySqlPositionStore {
    pool: Pool,
    table: String,
}

impl MySqlPositionStore {
    pub fn new(config: &MySqlStoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            pool: Pool::new(config.opts()),
            table: config.table.clone(),
        })
    }

    /// Create the checkpoint table if it does not exist.
    pub async fn ensure_table(&self) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        conn.query_drop(format!(
            "CREATE TABLE IF NOT EXISTS `{}` (
                stream_name VARCHAR(255) NOT NULL PRIMARY KEY,
                position_text MEDIUMTEXT NOT NULL,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            self.table
        ))
        .await?;
        info!("Checkpoint table `{}` ready", self.table);
        Ok(())
    }

    /// Drain the connection pool.
    pub async fn disconnect(self) -> Result<()> {
        self.pool.disconnect().await?;
        Ok(())
    }
}

#[async_trait]
impl PositionStore for MySqlPositionStore {
    async fn load(&self, stream_name: &str) -> Result<Option<PositionSet>> {
        validate_stream_name(stream_name)?;

        let mut conn = self.pool.get_conn().await?;
        let text: Option<String> = conn
            .exec_first(select_statement(&self.table), (stream_name,))
            .await?;

        text.map(|text| text.parse()).transpose()
    }

    async fn save(&self, stream_name: &str, positions: &PositionSet) -> Result<()> {
        validate_stream_name(stream_name)?;

        let text = positions.to_string();
        let mut conn = self.pool.get_conn().await?;
        conn.exec_drop(upsert_statement(&self.table), (stream_name, text.as_str()))
            .await?;

        debug!("Saved position for {}: {}", stream_name, text);
        Ok(())
    }
}

fn select_statement(table: &str) -> String {
    format!(
        "SELECT position_text FROM `{}` WHERE stream_name = ?",
        table
    )
}

fn upsert_statement(table: &str) -> String {
    format!(
        "INSERT INTO `{}` (stream_name, position_text, updated_at) \
         VALUES (?, ?, CURRENT_TIMESTAMP) AS new \
         ON DUPLICATE KEY UPDATE \
         position_text = new.position_text, updated_at = CURRENT_TIMESTAMP",
        table
    )
}
