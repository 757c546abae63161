//! Error types for relay operations
//!
//! Every error that reaches the pipeline supervisor is fatal: it is wrapped
//! in [`CdcError::Stage`] so the process exit message names the stage that
//! failed. Retriable classification is only used by the checkpoint retry
//! loop.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error categories, logged with the fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Database-specific errors (connection, query)
    Database,
    /// Replication stream errors (binlog protocol, event ordering)
    Replication,
    /// Row or position decoding errors
    Decode,
    /// Checkpoint persistence errors
    Checkpoint,
    /// Configuration errors (invalid settings)
    Configuration,
    /// Network errors (connection, timeout)
    Network,
    /// Serialization errors (JSON)
    Serialization,
    /// Other/unknown errors
    Other,
}

/// Pipeline stage an error escaped from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Loading configuration, connecting, reading the last checkpoint
    Startup,
    /// Reading the replication stream and cutting commit batches
    StreamReader,
    /// Delivering batches and persisting positions
    BatchCommitter,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Startup => f.write_str("startup"),
            Self::StreamReader => f.write_str("stream reader"),
            Self::BatchCommitter => f.write_str("batch committer"),
        }
    }
}

/// Relay errors
#[derive(Error, Debug)]
pub enum CdcError {
    /// MySQL client error
    #[cfg(feature = "mysql")]
    #[error("MySQL error: {0}")]
    MySql(#[from] mysql_async::Error),

    /// Malformed event, field type mismatch, unparseable value
    #[error("Decode error: {0}")]
    Decode(String),

    /// Event arrived in a state the transaction lifecycle does not allow
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Replication stream error
    #[error("Replication error: {0}")]
    Replication(String),

    /// Checkpoint store error
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Downstream sink error
    #[error("Sink error: {0}")]
    Sink(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Pipeline channel closed while the peer was still running
    #[error("Pipeline channel closed")]
    ChannelClosed,

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Fatal error tagged with the stage it escaped from
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<CdcError>,
    },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl CdcError {
    /// Create a new decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a new replication error
    pub fn replication(msg: impl Into<String>) -> Self {
        Self::Replication(msg.into())
    }

    /// Create a new checkpoint error
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    /// Create a new sink error
    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Tag this error with the stage it escaped from.
    ///
    /// Already-tagged errors keep their original stage.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            Self::Stage { .. } => self,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Stage this error was tagged with, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Check if this error is retriable.
    ///
    /// Returns true for transient errors that may succeed on retry.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,

            #[cfg(feature = "mysql")]
            Self::MySql(e) => is_transient_mysql_error(e),

            Self::Io(e) => {
                use std::io::ErrorKind;
                matches!(
                    e.kind(),
                    ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::TimedOut
                        | ErrorKind::Interrupted
                )
            }

            Self::Stage { source, .. } => source.is_retriable(),

            Self::Decode(_)
            | Self::Protocol(_)
            | Self::Replication(_)
            | Self::Checkpoint(_)
            | Self::Sink(_)
            | Self::Config(_)
            | Self::Json(_)
            | Self::ChannelClosed
            | Self::Other(_) => false,
        }
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            #[cfg(feature = "mysql")]
            Self::MySql(_) => ErrorCategory::Database,
            Self::Decode(_) => ErrorCategory::Decode,
            Self::Protocol(_) => ErrorCategory::Replication,
            Self::Replication(_) => ErrorCategory::Replication,
            Self::Checkpoint(_) => ErrorCategory::Checkpoint,
            Self::Sink(_) => ErrorCategory::Other,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Json(_) => ErrorCategory::Serialization,
            Self::Io(_) => ErrorCategory::Network,
            Self::ChannelClosed => ErrorCategory::Other,
            Self::Timeout(_) => ErrorCategory::Network,
            Self::Stage { source, .. } => source.category(),
            Self::Other(_) => ErrorCategory::Other,
        }
    }

    /// Get a stable, label-safe error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            #[cfg(feature = "mysql")]
            Self::MySql(_) => "mysql_error",
            Self::Decode(_) => "decode_error",
            Self::Protocol(_) => "protocol_error",
            Self::Replication(_) => "replication_error",
            Self::Checkpoint(_) => "checkpoint_error",
            Self::Sink(_) => "sink_error",
            Self::Config(_) => "config_error",
            Self::Json(_) => "json_error",
            Self::Io(_) => "io_error",
            Self::ChannelClosed => "channel_closed",
            Self::Timeout(_) => "timeout",
            Self::Stage { source, .. } => source.error_code(),
            Self::Other(_) => "unknown",
        }
    }
}

/// Check if a MySQL error is transient.
#[cfg(feature = "mysql")]
fn is_transient_mysql_error(e: &mysql_async::Error) -> bool {
    match e {
        mysql_async::Error::Io(_) => true,
        // 1205 lock wait timeout, 1213 deadlock, 2006 server gone, 2013 lost connection
        mysql_async::Error::Server(server) => matches!(server.code, 1205 | 1213 | 2006 | 2013),
        _ => false,
    }
}

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, CdcError>;
