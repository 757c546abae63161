//! # Position Checkpointing
//!
//! Durable storage of the serialized [`PositionSet`] per logical stream.
//!
//! ## Stores
//!
//! - [`FilePositionStore`] - one JSON record per stream, written atomically
//! - [`MemoryPositionStore`] - in-process, for tests
//! - `MySqlPositionStore` (feature `mysql`) - relational table keyed by
//!   stream name
//!
//! A missing record is not an error: `load` returns `Ok(None)` and the
//! relay starts from an empty position set.
//!
//! ## Usage
//!
//! ```ignore
//! use binlog_relay::common::{FilePositionStore, PositionStore};
//!
//! let store = FilePositionStore::new("/var/lib/binlog-relay").await?;
//! let positions = store.load("core_event").await?.unwrap_or_default();
//! ```

use crate::common::{CdcError, PositionSet, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

/// Trait for position storage backends.
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Last saved position set for `stream_name`, if any.
    async fn load(&self, stream_name: &str) -> Result<Option<PositionSet>>;

    /// Insert or overwrite the position set for `stream_name`.
    async fn save(&self, stream_name: &str, positions: &PositionSet) -> Result<()>;
}

#[async_trait]
impl<T: PositionStore + ?Sized> PositionStore for Arc<T> {
    async fn load(&self, stream_name: &str) -> Result<Option<PositionSet>> {
        (**self).load(stream_name).await
    }

    async fn save(&self, stream_name: &str, positions: &PositionSet) -> Result<()> {
        (**self).save(stream_name, positions).await
    }
}

/// Reject names that cannot safely key a record.
pub fn validate_stream_name(stream_name: &str) -> Result<()> {
    if stream_name.is_empty() {
        return Err(CdcError::config("stream name must not be empty"));
    }
    if stream_name.len() > 255 {
        return Err(CdcError::config("stream name longer than 255 bytes"));
    }
    if stream_name.contains(|c| c == '/' || c == '\\') || stream_name.starts_with('.') {
        return Err(CdcError::config(format!(
            "invalid stream name '{}'",
            stream_name
        )));
    }
    Ok(())
}

/// On-disk record of one stream's position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PositionRecord {
    pub stream_name: String,
    pub position_text: PositionSet,
    /// Unix epoch seconds of the last write
    pub updated_at: u64,
}

/// File-backed position storage.
///
/// Each stream is stored as `<base_dir>/<stream_name>.json`, replaced via
/// write-to-temp, fsync, rename.
pub struct FilePositionStore {
    base_dir: PathBuf,
    fsync: bool,
}

impl FilePositionStore {
    /// Create a store rooted at `base_dir`, creating the directory.
    pub async fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_options(base_dir, true).await
    }

    /// Create a store with explicit fsync behaviour.
    pub async fn with_options(base_dir: impl AsRef<Path>, fsync: bool) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir).await?;
        Ok(Self { base_dir, fsync })
    }

    fn file_path(&self, stream_name: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", stream_name))
    }
}

#[async_trait]
impl PositionStore for FilePositionStore {
    async fn load(&self, stream_name: &str) -> Result<Option<PositionSet>> {
        validate_stream_name(stream_name)?;

        let contents = match fs::read_to_string(self.file_path(stream_name)).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: PositionRecord = serde_json::from_str(&contents)?;
        if record.stream_name != stream_name {
            return Err(CdcError::checkpoint(format!(
                "record for '{}' found under '{}'",
                record.stream_name, stream_name
            )));
        }

        Ok(Some(record.position_text))
    }

    async fn save(&self, stream_name: &str, positions: &PositionSet) -> Result<()> {
        validate_stream_name(stream_name)?;

        let record = PositionRecord {
            stream_name: stream_name.to_string(),
            position_text: positions.clone(),
            updated_at: current_timestamp(),
        };
        let json = serde_json::to_string_pretty(&record)?;

        let file_path = self.file_path(stream_name);
        let temp_path = file_path.with_extension("tmp");

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .await?;
        file.write_all(json.as_bytes()).await?;
        if self.fsync {
            file.sync_all().await?;
        }
        drop(file);

        fs::rename(&temp_path, &file_path).await?;

        debug!("Saved position for {}: {}", stream_name, positions);
        Ok(())
    }
}

/// In-memory position store (for testing or when persistence isn't needed).
#[derive(Debug, Default)]
pub struct MemoryPositionStore {
    records: RwLock<HashMap<String, String>>,
    writes: AtomicU64,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored text for `stream_name`.
    pub async fn position_text(&self, stream_name: &str) -> Option<String> {
        self.records.read().await.get(stream_name).cloned()
    }

    /// Number of successful `save` calls.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PositionStore for MemoryPositionStore {
    async fn load(&self, stream_name: &str) -> Result<Option<PositionSet>> {
        match self.records.read().await.get(stream_name) {
            Some(text) => Ok(Some(text.parse()?)),
            None => Ok(None),
        }
    }

    async fn save(&self, stream_name: &str, positions: &PositionSet) -> Result<()> {
        self.records
            .write()
            .await
            .insert(stream_name.to_string(), positions.to_string());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Get current Unix timestamp in seconds.
fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
