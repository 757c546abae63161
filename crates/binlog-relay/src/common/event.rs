//! Replication events, captured rows and commit batches
//!
//! The replication adapter turns raw binlog records into
//! [`ReplicationEvent`]s; the stream reader decodes watched rows into
//! [`CapturedRow`]s and cuts one [`CommitBatch`] per commit boundary.

use crate::common::{CdcError, PositionMarker, Result};
use bytes::Bytes;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Text layout accepted for creation timestamps delivered as strings.
pub const CREATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Row operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowOp {
    /// Row inserted
    Insert,
    /// Row updated (after-image captured)
    Update,
    /// Row deleted (before-image captured)
    Delete,
}

impl fmt::Display for RowOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => f.write_str("insert"),
            Self::Update => f.write_str("update"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// A single column value as delivered by the replication client.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Int(i64),
    UInt(u64),
    Bytes(Bytes),
    Text(String),
    DateTime(NaiveDateTime),
    /// Any type the relay does not interpret (floats, JSON, time-of-day...)
    Other(String),
}

impl FieldValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Bytes(_) => "bytes",
            Self::Text(_) => "text",
            Self::DateTime(_) => "datetime",
            Self::Other(_) => "other",
        }
    }
}

/// One row image of a rows event.
pub type RowImage = Vec<FieldValue>;

/// A batch of changed rows for one table, as carried by one rows event.
#[derive(Debug, Clone, PartialEq)]
pub struct RowsChange {
    pub schema: String,
    pub table: String,
    pub op: RowOp,
    /// Insert/update: after-images. Delete: before-images.
    pub rows: Vec<RowImage>,
}

/// Structured event produced by the replication client adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicationEvent {
    /// A new transaction begins with this GTID
    Gtid(PositionMarker),
    /// Row changes inside the open transaction
    Rows(RowsChange),
    /// The open transaction is durably committed
    Commit { xid: Option<u64> },
}

/// The table whose rows are captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFilter {
    /// Schema (database) name; `None` matches any schema
    pub schema: Option<String>,
    pub table: String,
}

impl TableFilter {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            schema: None,
            table: table.into(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn matches(&self, schema: &str, table: &str) -> bool {
        self.table == table && self.schema.as_deref().map_or(true, |s| s == schema)
    }

    pub fn validate(&self) -> Result<()> {
        if self.table.is_empty() {
            return Err(CdcError::config("watched table name must not be empty"));
        }
        if matches!(self.schema.as_deref(), Some("")) {
            return Err(CdcError::config("watched schema name must not be empty"));
        }
        Ok(())
    }
}

impl fmt::Display for TableFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.table),
            None => write!(f, "*.{}", self.table),
        }
    }
}

/// One captured row of the watched table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedRow {
    pub id: u64,
    pub data: Bytes,
    pub created_at: NaiveDateTime,
    pub op: RowOp,
}

impl CapturedRow {
    /// Decode a row image: field 0 is the id, field 1 the payload, field 2
    /// the creation timestamp. Extra fields are ignored.
    pub fn decode(op: RowOp, fields: &[FieldValue]) -> Result<Self> {
        let [id, data, created_at, ..] = fields else {
            return Err(CdcError::decode(format!(
                "expected at least 3 fields, got {}",
                fields.len()
            )));
        };

        Ok(Self {
            id: decode_id(id)?,
            data: decode_payload(data)?,
            created_at: decode_created_at(created_at)?,
            op,
        })
    }
}

fn decode_id(value: &FieldValue) -> Result<u64> {
    match value {
        FieldValue::Int(id) => u64::try_from(*id)
            .map_err(|_| CdcError::decode(format!("negative row id {}", id))),
        FieldValue::UInt(id) => Ok(*id),
        other => Err(CdcError::decode(format!(
            "field 0 (id): expected integer, got {}",
            other.type_name()
        ))),
    }
}

fn decode_payload(value: &FieldValue) -> Result<Bytes> {
    match value {
        FieldValue::Bytes(bytes) => Ok(bytes.clone()),
        FieldValue::Text(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
        other => Err(CdcError::decode(format!(
            "field 1 (data): expected bytes, got {}",
            other.type_name()
        ))),
    }
}

fn decode_created_at(value: &FieldValue) -> Result<NaiveDateTime> {
    let text = match value {
        FieldValue::DateTime(ts) => return Ok(*ts),
        FieldValue::Text(text) => text.as_str(),
        FieldValue::Bytes(bytes) => std::str::from_utf8(bytes)
            .map_err(|_| CdcError::decode("field 2 (created_at): timestamp is not UTF-8"))?,
        other => {
            return Err(CdcError::decode(format!(
                "field 2 (created_at): expected timestamp, got {}",
                other.type_name()
            )))
        }
    };

    NaiveDateTime::parse_from_str(text, CREATED_AT_FORMAT).map_err(|e| {
        CdcError::decode(format!(
            "field 2 (created_at): cannot parse '{}': {}",
            text, e
        ))
    })
}

/// Everything one committed transaction contributed, plus its position.
///
/// Heartbeat-style commits carry no rows but still advance the position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitBatch {
    pub rows: Vec<CapturedRow>,
    pub position: PositionMarker,
    pub xid: Option<u64>,
}

impl CommitBatch {
    pub fn new(rows: Vec<CapturedRow>, position: PositionMarker, xid: Option<u64>) -> Self {
        Self {
            rows,
            position,
            xid,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True for a position-only commit.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_decode_native_timestamp() {
        let row = CapturedRow::decode(
            RowOp::Insert,
            &[
                FieldValue::Int(7),
                FieldValue::Bytes(Bytes::from_static(b"hello")),
                FieldValue::DateTime(ts(10, 20, 30)),
            ],
        )
        .unwrap();

        assert_eq!(row.id, 7);
        assert_eq!(row.data, Bytes::from_static(b"hello"));
        assert_eq!(row.created_at, ts(10, 20, 30));
        assert_eq!(row.op, RowOp::Insert);
    }

    #[test]
    fn test_decode_text_timestamp() {
        let row = CapturedRow::decode(
            RowOp::Update,
            &[
                FieldValue::UInt(8),
                FieldValue::Text("payload".into()),
                FieldValue::Bytes(Bytes::from_static(b"2024-03-15 01:02:03")),
                FieldValue::Null,
            ],
        )
        .unwrap();

        assert_eq!(row.id, 8);
        assert_eq!(row.data, Bytes::from_static(b"payload"));
        assert_eq!(row.created_at, ts(1, 2, 3));
    }

    #[test]
    fn test_decode_rejects_other_timestamp_layouts() {
        for text in ["2024-03-15T01:02:03", "2024-03-15 01:02", "15/03/2024 01:02:03"] {
            let err = CapturedRow::decode(
                RowOp::Insert,
                &[
                    FieldValue::Int(1),
                    FieldValue::Bytes(Bytes::new()),
                    FieldValue::Text(text.into()),
                ],
            )
            .unwrap_err();
            assert!(matches!(err, CdcError::Decode(_)), "{}", text);
        }
    }

    #[test]
    fn test_decode_rejects_negative_id() {
        let err = CapturedRow::decode(
            RowOp::Insert,
            &[
                FieldValue::Int(-1),
                FieldValue::Bytes(Bytes::new()),
                FieldValue::DateTime(ts(0, 0, 0)),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("negative row id"));
    }

    #[test]
    fn test_decode_rejects_type_mismatch() {
        let err = CapturedRow::decode(
            RowOp::Insert,
            &[
                FieldValue::Int(1),
                FieldValue::Int(2),
                FieldValue::DateTime(ts(0, 0, 0)),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("field 1"));
    }

    #[test]
    fn test_decode_rejects_short_row() {
        let err = CapturedRow::decode(RowOp::Delete, &[FieldValue::Int(1)]).unwrap_err();
        assert!(err.to_string().contains("got 1"));
    }

    #[test]
    fn test_table_filter_matching() {
        let any_schema = TableFilter::new("core_event");
        assert!(any_schema.matches("bench", "core_event"));
        assert!(any_schema.matches("other", "core_event"));
        assert!(!any_schema.matches("bench", "core_event_archive"));

        let scoped = TableFilter::new("core_event").with_schema("bench");
        assert!(scoped.matches("bench", "core_event"));
        assert!(!scoped.matches("other", "core_event"));
        assert_eq!(scoped.to_string(), "bench.core_event");
    }

    #[test]
    fn test_table_filter_validate() {
        assert!(TableFilter::new("t").validate().is_ok());
        assert!(TableFilter::new("").validate().is_err());
        assert!(TableFilter::new("t").with_schema("").validate().is_err());
    }
}
