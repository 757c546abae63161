//! Test harness for relay integration tests
//!
//! - [`ScriptedStream`] replays a fixed list of replication events
//! - [`RecordingSink`] keeps every delivered batch for assertions
//! - event builders for the watched `bench.core_event` table

#![allow(dead_code)]

use async_trait::async_trait;
use binlog_relay::common::{
    CdcError, CommitBatch, FieldValue, PositionMarker, ReplicationEvent, ReplicationStream,
    Result, RowOp, RowSink, RowsChange, Sid,
};
use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Once};
use tokio::sync::oneshot;

static INIT: Once = Once::new();

/// Initialize test logging (idempotent)
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("binlog_relay=debug".parse().unwrap()),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub const SCHEMA: &str = "bench";
pub const TABLE: &str = "core_event";
pub const STREAM: &str = "core_event";

/// Source ids whose text forms sort as A < B.
pub const SOURCE_A: Sid = Sid::from_bytes([0x3f; 16]);
pub const SOURCE_B: Sid = Sid::from_bytes([0x9b; 16]);

/// What the stream does once the script is used up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterScript {
    /// Report end of stream
    End,
    /// Block forever, like a live server with no traffic
    Hang,
}

pub struct ScriptedStream {
    events: VecDeque<Result<ReplicationEvent>>,
    after: AfterScript,
    exhausted: Option<oneshot::Sender<()>>,
}

impl ScriptedStream {
    pub fn new(events: Vec<ReplicationEvent>) -> Self {
        Self {
            events: events.into_iter().map(Ok).collect(),
            after: AfterScript::End,
            exhausted: None,
        }
    }

    pub fn hanging(events: Vec<ReplicationEvent>) -> Self {
        Self {
            after: AfterScript::Hang,
            ..Self::new(events)
        }
    }

    /// Append a stream failure after the scripted events.
    pub fn then_fail(mut self, error: CdcError) -> Self {
        self.events.push_back(Err(error));
        self
    }

    /// Resolves once every scripted event has been handed out.
    pub fn exhausted_signal(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.exhausted = Some(tx);
        rx
    }
}

#[async_trait]
impl ReplicationStream for ScriptedStream {
    async fn next_event(&mut self) -> Result<Option<ReplicationEvent>> {
        if let Some(event) = self.events.pop_front() {
            return event.map(Some);
        }
        if let Some(tx) = self.exhausted.take() {
            let _ = tx.send(());
        }
        match self.after {
            AfterScript::End => Ok(None),
            AfterScript::Hang => std::future::pending().await,
        }
    }
}

/// Sink that records batches; optionally fails on a given GNO.
#[derive(Clone, Default)]
pub struct RecordingSink {
    batches: Arc<Mutex<Vec<CommitBatch>>>,
    fail_on: Option<i64>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(gno: i64) -> Self {
        Self {
            fail_on: Some(gno),
            ..Self::default()
        }
    }

    pub fn batches(&self) -> Vec<CommitBatch> {
        self.batches.lock().unwrap().clone()
    }

    pub fn delivered_gnos(&self) -> Vec<i64> {
        self.batches().iter().map(|b| b.position.gno).collect()
    }

    pub fn delivered_ids(&self) -> Vec<u64> {
        self.batches()
            .iter()
            .flat_map(|b| b.rows.iter().map(|r| r.id))
            .collect()
    }
}

#[async_trait]
impl RowSink for RecordingSink {
    async fn deliver(&mut self, batch: &CommitBatch) -> Result<()> {
        if self.fail_on == Some(batch.position.gno) {
            return Err(CdcError::sink(format!(
                "downstream rejected {}",
                batch.position
            )));
        }
        self.batches.lock().unwrap().push(batch.clone());
        Ok(())
    }
}

pub fn created_at() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 17)
        .unwrap()
        .and_hms_opt(8, 30, 0)
        .unwrap()
}

pub fn gtid(sid: Sid, gno: i64) -> ReplicationEvent {
    ReplicationEvent::Gtid(PositionMarker::new(sid, gno))
}

pub fn commit(xid: u64) -> ReplicationEvent {
    ReplicationEvent::Commit { xid: Some(xid) }
}

pub fn rows_in(schema: &str, table: &str, ids: &[u64]) -> ReplicationEvent {
    ReplicationEvent::Rows(RowsChange {
        schema: schema.to_string(),
        table: table.to_string(),
        op: RowOp::Insert,
        rows: ids
            .iter()
            .map(|id| {
                vec![
                    FieldValue::UInt(*id),
                    FieldValue::Bytes(Bytes::from(format!("{{\"id\":{}}}", id))),
                    FieldValue::DateTime(created_at()),
                ]
            })
            .collect(),
    })
}

pub fn rows(ids: &[u64]) -> ReplicationEvent {
    rows_in(SCHEMA, TABLE, ids)
}

/// `GTID, rows..., XID` for one transaction on the watched table.
pub fn transaction(sid: Sid, gno: i64, ids: &[u64]) -> Vec<ReplicationEvent> {
    let mut events = vec![gtid(sid, gno)];
    if !ids.is_empty() {
        events.push(rows(ids));
    }
    events.push(commit(gno as u64));
    events
}
