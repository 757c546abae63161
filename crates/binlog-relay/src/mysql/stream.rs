//! GTID binlog stream adapter
//!
//! Maps `mysql_async` binlog events onto [`ReplicationEvent`]s:
//!
//! | Binlog event                         | ReplicationEvent          |
//! |--------------------------------------|---------------------------|
//! | `GTID`                               | `Gtid(marker)`            |
//! | `WRITE/UPDATE/DELETE_ROWS`           | `Rows(change)`            |
//! | `XID`                                | `Commit { xid }`          |
//! | `XA_PREPARE`                         | `Commit { xid: None }`    |
//! | `QUERY "COMMIT"` / `"XA COMMIT .."`  | `Commit { xid: None }`    |
//! | `QUERY "XA ROLLBACK .."`             | `Commit { xid: None }`    |
//! | `QUERY` outside `BEGIN` (DDL)        | `Commit { xid: None }`    |
//! | anything else                        | skipped                   |
//!
//! `TIMESTAMP` columns arrive as unix seconds and are converted to UTC
//! date-times; `DATETIME` columns arrive already broken down.

use super::config::MySqlSourceConfig;
use crate::common::{
    CdcError, FieldValue, PositionMarker, PositionSet, ReplicationEvent, ReplicationStream,
    Result, RowImage, RowOp, RowsChange, Sid,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate};
use futures::StreamExt;
use mysql_async::binlog::events::{Event, EventData, RowsEventData};
use mysql_async::binlog::row::BinlogRow;
use mysql_async::binlog::value::BinlogValue;
use mysql_async::consts::ColumnType;
use mysql_async::prelude::Queryable;
use mysql_async::{BinlogStream, BinlogStreamRequest, Conn, GnoInterval, Value};
use tracing::{debug, info, trace};

/// How a statement logged as a query event affects transaction framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryKind {
    Begin,
    Commit,
    Other,
}

fn classify_query(query: &str) -> QueryKind {
    let statement = query.trim().trim_end_matches(';').trim();
    let mut words = statement.split_ascii_whitespace();
    let first = words.next().unwrap_or_default();
    if statement.eq_ignore_ascii_case("BEGIN") {
        QueryKind::Begin
    } else if statement.eq_ignore_ascii_case("COMMIT") {
        QueryKind::Commit
    } else if first.eq_ignore_ascii_case("XA") {
        match words.next() {
            Some(w) if w.eq_ignore_ascii_case("START") || w.eq_ignore_ascii_case("BEGIN") => {
                QueryKind::Begin
            }
            Some(w) if w.eq_ignore_ascii_case("COMMIT") || w.eq_ignore_ascii_case("ROLLBACK") => {
                QueryKind::Commit
            }
            _ => QueryKind::Other,
        }
    } else {
        QueryKind::Other
    }
}

/// Transaction framing for one query event.
///
/// Returns the new explicit-transaction flag and whether the event closes
/// the current transaction. Statements outside `BEGIN` commit themselves.
fn frame_query(kind: QueryKind, in_explicit_txn: bool) -> (bool, bool) {
    match kind {
        QueryKind::Begin => (true, false),
        QueryKind::Commit => (false, true),
        QueryKind::Other if in_explicit_txn => (true, false),
        QueryKind::Other => (false, true),
    }
}

/// Replication stream over a live MySQL binlog dump.
pub struct MySqlBinlogStream {
    inner: BinlogStream,
    in_explicit_txn: bool,
}

impl MySqlBinlogStream {
    /// Connect and request every transaction not in `positions`.
    ///
    /// An empty set lets the server start from its oldest retained binlog.
    pub async fn connect(config: &MySqlSourceConfig, positions: &PositionSet) -> Result<Self> {
        config.validate()?;

        let mut conn = Conn::new(config.opts()).await?;
        info!(
            "Connected to MySQL {}:{} (connection_id={})",
            config.host,
            config.port,
            conn.id()
        );

        check_gtid_mode(&mut conn).await?;

        let request = BinlogStreamRequest::new(config.server_id)
            .with_gtid()
            .with_gtid_set(executed_sids(positions)?);
        let inner = conn.get_binlog_stream(request).await?;

        info!(
            "Binlog stream opened as server_id {} after {} source(s)",
            config.server_id,
            positions.source_count()
        );

        Ok(Self {
            inner,
            in_explicit_txn: false,
        })
    }

    fn map_event(&mut self, event: &Event) -> Result<Option<ReplicationEvent>> {
        let Some(data) = event.read_data()? else {
            trace!("Skipping unsupported event {:?}", event.header().event_type());
            return Ok(None);
        };

        match data {
            EventData::GtidEvent(gtid) => {
                let gno = i64::try_from(gtid.gno()).map_err(|_| {
                    CdcError::decode(format!("GTID gno {} exceeds i64", gtid.gno()))
                })?;
                self.in_explicit_txn = false;
                Ok(Some(ReplicationEvent::Gtid(PositionMarker::new(
                    Sid::from_bytes(gtid.sid()),
                    gno,
                ))))
            }

            EventData::XidEvent(xid) => {
                self.in_explicit_txn = false;
                Ok(Some(ReplicationEvent::Commit { xid: Some(xid.xid) }))
            }

            EventData::XaPrepareLogEvent(_) => {
                self.in_explicit_txn = false;
                Ok(Some(ReplicationEvent::Commit { xid: None }))
            }

            EventData::QueryEvent(query) => {
                let text = query.query();
                let kind = classify_query(&text);
                let (in_txn, commits) = frame_query(kind, self.in_explicit_txn);
                if commits && kind == QueryKind::Other {
                    debug!("Self-committing statement: {}", text);
                }
                self.in_explicit_txn = in_txn;
                Ok(commits.then_some(ReplicationEvent::Commit { xid: None }))
            }

            EventData::RowsEvent(rows) => self.map_rows(&rows).map(Some),

            _ => Ok(None),
        }
    }

    fn map_rows(&self, rows: &RowsEventData<'_>) -> Result<ReplicationEvent> {
        let table_id = rows.table_id();
        let tme = self.inner.get_tme(table_id).ok_or_else(|| {
            CdcError::protocol(format!("rows event for unknown table_id {}", table_id))
        })?;

        let mut op = None;
        let mut images = Vec::new();
        for row in rows.rows(tme) {
            let (before, after) = row?;
            let (row_op, image) = match (before, after) {
                (None, Some(after)) => (RowOp::Insert, after),
                (Some(_), Some(after)) => (RowOp::Update, after),
                (Some(before), None) => (RowOp::Delete, before),
                (None, None) => {
                    return Err(CdcError::decode(format!(
                        "rows event for table_id {} carries neither image",
                        table_id
                    )))
                }
            };
            op = Some(row_op);
            images.push(map_row(&image));
        }

        Ok(ReplicationEvent::Rows(RowsChange {
            schema: tme.database_name().into_owned(),
            table: tme.table_name().into_owned(),
            op: op.unwrap_or(RowOp::Insert),
            rows: images,
        }))
    }
}

#[async_trait]
impl ReplicationStream for MySqlBinlogStream {
    async fn next_event(&mut self) -> Result<Option<ReplicationEvent>> {
        while let Some(event) = self.inner.next().await {
            let event = event?;
            if let Some(mapped) = self.map_event(&event)? {
                return Ok(Some(mapped));
            }
        }
        info!("Binlog stream closed by server");
        Ok(None)
    }
}

async fn check_gtid_mode(conn: &mut Conn) -> Result<()> {
    let mode: Option<String> = conn.query_first("SELECT @@GLOBAL.gtid_mode").await?;
    match mode.as_deref() {
        Some(mode) if mode.eq_ignore_ascii_case("ON") => Ok(()),
        Some(mode) => Err(CdcError::config(format!(
            "gtid_mode must be ON, server reports {}",
            mode
        ))),
        None => Err(CdcError::config("server does not report gtid_mode")),
    }
}

/// Executed GTID set as a dump request expects it (end-exclusive intervals).
fn executed_sids(positions: &PositionSet) -> Result<Vec<mysql_async::Sid<'static>>> {
    positions
        .sources()
        .map(|(sid, intervals)| {
            intervals.iter().try_fold(
                mysql_async::Sid::new(*sid.as_bytes()),
                |request_sid, interval| -> Result<mysql_async::Sid<'static>> {
                    let from = u64::try_from(interval.from).map_err(|_| {
                        CdcError::config(format!(
                            "cannot resume {} from negative gno {}",
                            sid, interval.from
                        ))
                    })?;
                    let to = interval.to as u64 + 1;
                    Ok(request_sid.with_interval(GnoInterval::new(from, to)))
                },
            )
        })
        .collect()
}

fn map_row(row: &BinlogRow) -> RowImage {
    let columns = row.columns_ref();
    (0..row.len())
        .map(|i| match row.as_ref(i) {
            Some(BinlogValue::Value(value)) => {
                map_column(value, columns.get(i).map(|c| c.column_type()))
            }
            Some(other) => FieldValue::Other(format!("{:?}", other)),
            None => FieldValue::Null,
        })
        .collect()
}

fn map_column(value: &Value, column_type: Option<ColumnType>) -> FieldValue {
    match column_type {
        Some(ColumnType::MYSQL_TYPE_TIMESTAMP | ColumnType::MYSQL_TYPE_TIMESTAMP2) => {
            map_timestamp(value)
        }
        _ => map_value(value),
    }
}

/// `TIMESTAMP` values are logged as seconds since the epoch, with an
/// optional fractional part when the column has sub-second precision.
fn map_timestamp(value: &Value) -> FieldValue {
    let parsed = match value {
        Value::Int(secs) => DateTime::from_timestamp(*secs, 0),
        Value::UInt(secs) => i64::try_from(*secs)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        Value::Bytes(bytes) => std::str::from_utf8(bytes)
            .ok()
            .and_then(parse_epoch_seconds),
        _ => return map_value(value),
    };
    parsed
        .map(|ts| FieldValue::DateTime(ts.naive_utc()))
        .unwrap_or_else(|| FieldValue::Other(format!("{:?}", value)))
}

fn parse_epoch_seconds(text: &str) -> Option<DateTime<chrono::Utc>> {
    let (secs, fraction) = match text.split_once('.') {
        Some((secs, fraction)) => (secs, fraction),
        None => (text, ""),
    };
    if fraction.len() > 9 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let nanos = if fraction.is_empty() {
        0
    } else {
        format!("{:0<9}", fraction).parse::<u32>().ok()?
    };
    DateTime::from_timestamp(secs.parse().ok()?, nanos)
}

fn map_value(value: &Value) -> FieldValue {
    match value {
        Value::NULL => FieldValue::Null,
        Value::Int(v) => FieldValue::Int(*v),
        Value::UInt(v) => FieldValue::UInt(*v),
        Value::Bytes(bytes) => FieldValue::Bytes(Bytes::copy_from_slice(bytes)),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            NaiveDate::from_ymd_opt(i32::from(*year), u32::from(*month), u32::from(*day))
                .and_then(|date| {
                    date.and_hms_micro_opt(
                        u32::from(*hour),
                        u32::from(*minute),
                        u32::from(*second),
                        *micros,
                    )
                })
                .map(FieldValue::DateTime)
                .unwrap_or_else(|| FieldValue::Other(format!("{:?}", value)))
        }
        other => FieldValue::Other(format!("{:?}", other)),
    }
}
