//! CLI argument parsing for the relay daemon
//!
//! Every option can also be supplied through a `BINLOG_RELAY_*`
//! environment variable.

use binlog_relay::common::RetryConfig;
use binlog_relay::mysql::{MySqlSourceConfig, MySqlStoreConfig, DEFAULT_POSITION_TABLE};
use binlog_relay::pipeline::DEFAULT_CHANNEL_CAPACITY;
use binlog_relay::{PipelineConfig, TableFilter};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Where checkpoints are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CheckpointBackend {
    /// Table in a MySQL schema
    Mysql,
    /// JSON file per stream in a local directory
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// binlog-relayd - commit-aligned row capture from a MySQL binlog
///
/// Streams committed changes of one table and checkpoints the executed
/// GTID set after every transaction, so restarts resume where the last
/// durable commit left off.
#[derive(Parser, Debug)]
#[command(name = "binlog-relayd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    // ============ Source ============
    /// MySQL host to replicate from
    #[arg(long, default_value = "localhost", env = "BINLOG_RELAY_SOURCE_HOST")]
    pub source_host: String,

    #[arg(long, default_value = "3306", env = "BINLOG_RELAY_SOURCE_PORT")]
    pub source_port: u16,

    /// Replication user (needs REPLICATION SLAVE, REPLICATION CLIENT)
    #[arg(long, default_value = "root", env = "BINLOG_RELAY_SOURCE_USER")]
    pub source_user: String,

    #[arg(long, env = "BINLOG_RELAY_SOURCE_PASSWORD", hide_env_values = true)]
    pub source_password: Option<String>,

    /// Replica server id, unique among all replicas of the source
    #[arg(long, default_value = "1001", env = "BINLOG_RELAY_SERVER_ID")]
    pub server_id: u32,

    // ============ Capture ============
    /// Table whose rows are captured
    #[arg(long, env = "BINLOG_RELAY_TABLE")]
    pub table: String,

    /// Schema of the captured table (any schema when omitted)
    #[arg(long, env = "BINLOG_RELAY_SCHEMA")]
    pub schema: Option<String>,

    /// Checkpoint key (defaults to the table name)
    #[arg(long, env = "BINLOG_RELAY_STREAM_NAME")]
    pub stream_name: Option<String>,

    /// Commit batches buffered between reader and committer
    #[arg(long, default_value_t = DEFAULT_CHANNEL_CAPACITY, env = "BINLOG_RELAY_CHANNEL_CAPACITY")]
    pub channel_capacity: usize,

    // ============ Checkpoint ============
    #[arg(long, value_enum, default_value = "mysql", env = "BINLOG_RELAY_CHECKPOINT_BACKEND")]
    pub checkpoint_backend: CheckpointBackend,

    /// Checkpoint host (defaults to the source host)
    #[arg(long, env = "BINLOG_RELAY_CHECKPOINT_HOST")]
    pub checkpoint_host: Option<String>,

    /// Checkpoint port (defaults to the source port)
    #[arg(long, env = "BINLOG_RELAY_CHECKPOINT_PORT")]
    pub checkpoint_port: Option<u16>,

    /// Checkpoint user (defaults to the source user)
    #[arg(long, env = "BINLOG_RELAY_CHECKPOINT_USER")]
    pub checkpoint_user: Option<String>,

    /// Checkpoint password (defaults to the source password)
    #[arg(long, env = "BINLOG_RELAY_CHECKPOINT_PASSWORD", hide_env_values = true)]
    pub checkpoint_password: Option<String>,

    /// Schema holding the checkpoint table
    #[arg(long, default_value = "binlog_relay", env = "BINLOG_RELAY_CHECKPOINT_DATABASE")]
    pub checkpoint_database: String,

    #[arg(long, default_value = DEFAULT_POSITION_TABLE, env = "BINLOG_RELAY_CHECKPOINT_TABLE")]
    pub checkpoint_table: String,

    /// Directory for the file checkpoint backend
    #[arg(long, default_value = "./checkpoints", env = "BINLOG_RELAY_CHECKPOINT_DIR")]
    pub checkpoint_dir: PathBuf,

    /// Retries for a failed checkpoint write before giving up
    #[arg(long, default_value = "5", env = "BINLOG_RELAY_CHECKPOINT_RETRIES")]
    pub checkpoint_retries: u32,

    #[arg(long, default_value = "100", env = "BINLOG_RELAY_RETRY_DELAY_MS")]
    pub retry_delay_ms: u64,

    #[arg(long, default_value = "5000", env = "BINLOG_RELAY_RETRY_MAX_DELAY_MS")]
    pub retry_max_delay_ms: u64,

    // ============ Logging ============
    /// Log level (trace, debug, info, warn, error); RUST_LOG wins if set
    #[arg(short, long, default_value = "info", env = "BINLOG_RELAY_LOG_LEVEL")]
    pub log_level: String,

    #[arg(long, value_enum, default_value = "text", env = "BINLOG_RELAY_LOG_FORMAT")]
    pub log_format: LogFormat,
}

impl Cli {
    pub fn validate(&self) -> Result<(), String> {
        if self.retry_delay_ms > self.retry_max_delay_ms {
            return Err(format!(
                "retry_delay_ms ({}) cannot exceed retry_max_delay_ms ({})",
                self.retry_delay_ms, self.retry_max_delay_ms
            ));
        }

        self.pipeline_config()
            .validate()
            .map_err(|e| e.to_string())?;
        self.source_config().validate().map_err(|e| e.to_string())?;
        if self.checkpoint_backend == CheckpointBackend::Mysql {
            self.store_config().validate().map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    pub fn stream_name(&self) -> &str {
        self.stream_name.as_deref().unwrap_or(&self.table)
    }

    pub fn table_filter(&self) -> TableFilter {
        let filter = TableFilter::new(self.table.clone());
        match &self.schema {
            Some(schema) => filter.with_schema(schema.clone()),
            None => filter,
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::builder()
            .max_retries(self.checkpoint_retries)
            .retry_delay(Duration::from_millis(self.retry_delay_ms))
            .max_delay(Duration::from_millis(self.retry_max_delay_ms))
            .build()
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::new(self.stream_name(), self.table_filter())
            .with_channel_capacity(self.channel_capacity)
            .with_retry(self.retry_config())
    }

    pub fn source_config(&self) -> MySqlSourceConfig {
        let mut config = MySqlSourceConfig::new(&self.source_host, &self.source_user)
            .with_port(self.source_port)
            .with_server_id(self.server_id);
        config.password = self.source_password.clone();
        config
    }

    pub fn store_config(&self) -> MySqlStoreConfig {
        let mut config = MySqlStoreConfig::new(
            self.checkpoint_host.as_deref().unwrap_or(&self.source_host),
            self.checkpoint_user.as_deref().unwrap_or(&self.source_user),
            &self.checkpoint_database,
        )
        .with_port(self.checkpoint_port.unwrap_or(self.source_port))
        .with_table(&self.checkpoint_table);
        config.password = self
            .checkpoint_password
            .clone()
            .or_else(|| self.source_password.clone());
        config
    }
}
