//! End-to-end pipeline behaviour over a scripted replication stream

mod harness;

use binlog_relay::common::{CdcError, MemoryPositionStore, PositionSet, PositionStore, Stage};
use binlog_relay::{Pipeline, PipelineConfig, StopReason, TableFilter};
use harness::*;
use std::sync::Arc;

fn pipeline() -> Pipeline {
    Pipeline::new(PipelineConfig::new(
        STREAM,
        TableFilter::new(TABLE).with_schema(SCHEMA),
    ))
    .unwrap()
}

async fn no_shutdown() {
    std::future::pending::<()>().await
}

#[tokio::test]
async fn test_committed_rows_are_delivered_and_checkpointed() {
    init_test_logging();

    let mut events = transaction(SOURCE_A, 1, &[10, 11]);
    events.extend(transaction(SOURCE_A, 2, &[12]));
    events.extend(transaction(SOURCE_A, 3, &[13, 14, 15]));

    let store = Arc::new(MemoryPositionStore::new());
    let sink = RecordingSink::new();

    let outcome = pipeline()
        .run(
            ScriptedStream::new(events),
            PositionSet::new(),
            store.clone(),
            sink.clone(),
            no_shutdown(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::StreamEnded);
    assert_eq!(sink.delivered_gnos(), vec![1, 2, 3]);
    assert_eq!(sink.delivered_ids(), vec![10, 11, 12, 13, 14, 15]);
    assert_eq!(
        store.position_text(STREAM).await.as_deref(),
        Some("3f3f3f3f-3f3f-3f3f-3f3f-3f3f3f3f3f3f:1-3")
    );
    assert_eq!(outcome.positions, store.load(STREAM).await.unwrap().unwrap());
    assert_eq!(outcome.stats.batches_committed, 3);
    assert_eq!(outcome.stats.rows_delivered, 6);
    assert_eq!(outcome.stats.checkpoints_written, 3);
}

#[tokio::test]
async fn test_heartbeat_batch_advances_and_persists_position() {
    init_test_logging();

    let mut events = transaction(SOURCE_A, 1, &[1]);
    // transaction touching only other tables
    events.push(gtid(SOURCE_A, 2));
    events.push(rows_in(SCHEMA, "audit_log", &[99]));
    events.push(commit(2));
    // DDL-style commit with no rows at all
    events.push(gtid(SOURCE_A, 3));
    events.push(binlog_relay::ReplicationEvent::Commit { xid: None });

    let store = Arc::new(MemoryPositionStore::new());
    let sink = RecordingSink::new();

    let outcome = pipeline()
        .run(
            ScriptedStream::new(events),
            PositionSet::new(),
            store.clone(),
            sink.clone(),
            no_shutdown(),
        )
        .await
        .unwrap();

    assert_eq!(sink.delivered_gnos(), vec![1]);
    assert!(outcome.positions.contains(&SOURCE_A, 3));
    assert_eq!(store.write_count(), 3);
    assert_eq!(
        store.position_text(STREAM).await.as_deref(),
        Some("3f3f3f3f-3f3f-3f3f-3f3f-3f3f3f3f3f3f:1-3")
    );
}

#[tokio::test]
async fn test_rows_of_other_schema_are_ignored() {
    let mut events = vec![gtid(SOURCE_A, 1), rows_in("staging", TABLE, &[1]), rows(&[2])];
    events.push(commit(1));

    let sink = RecordingSink::new();
    pipeline()
        .run(
            ScriptedStream::new(events),
            PositionSet::new(),
            MemoryPositionStore::new(),
            sink.clone(),
            no_shutdown(),
        )
        .await
        .unwrap();

    assert_eq!(sink.delivered_ids(), vec![2]);
}

#[tokio::test]
async fn test_replayed_transactions_are_not_redelivered() {
    init_test_logging();

    let mut resumed = PositionSet::new();
    resumed.add(SOURCE_A, 1);
    resumed.add(SOURCE_A, 2);

    let mut events = transaction(SOURCE_A, 2, &[20]);
    events.extend(transaction(SOURCE_A, 3, &[30]));

    let store = Arc::new(MemoryPositionStore::new());
    let sink = RecordingSink::new();

    let outcome = pipeline()
        .run(
            ScriptedStream::new(events),
            resumed,
            store.clone(),
            sink.clone(),
            no_shutdown(),
        )
        .await
        .unwrap();

    assert_eq!(sink.delivered_gnos(), vec![3]);
    assert_eq!(outcome.stats.duplicates_skipped, 1);
    assert_eq!(store.write_count(), 1);
    assert_eq!(
        outcome.positions.to_string(),
        "3f3f3f3f-3f3f-3f3f-3f3f-3f3f3f3f3f3f:1-3"
    );
}

#[tokio::test]
async fn test_multiple_sources_are_tracked_independently() {
    let mut events = transaction(SOURCE_B, 7, &[1]);
    events.extend(transaction(SOURCE_A, 1, &[2]));
    events.extend(transaction(SOURCE_B, 8, &[3]));

    let store = Arc::new(MemoryPositionStore::new());
    pipeline()
        .run(
            ScriptedStream::new(events),
            PositionSet::new(),
            store.clone(),
            RecordingSink::new(),
            no_shutdown(),
        )
        .await
        .unwrap();

    assert_eq!(
        store.position_text(STREAM).await.as_deref(),
        Some(
            "3f3f3f3f-3f3f-3f3f-3f3f-3f3f3f3f3f3f:1-1,\
             9b9b9b9b-9b9b-9b9b-9b9b-9b9b9b9b9b9b:7-8"
        )
    );
}

#[tokio::test]
async fn test_shutdown_drains_queue_and_drops_open_transaction() {
    init_test_logging();

    let mut events = transaction(SOURCE_A, 1, &[1]);
    events.extend(transaction(SOURCE_A, 2, &[2]));
    // still open when the signal arrives
    events.push(gtid(SOURCE_A, 3));
    events.push(rows(&[3]));

    let mut stream = ScriptedStream::hanging(events);
    let exhausted = stream.exhausted_signal();

    let store = Arc::new(MemoryPositionStore::new());
    let sink = RecordingSink::new();

    let outcome = pipeline()
        .run(stream, PositionSet::new(), store.clone(), sink.clone(), async move {
            let _ = exhausted.await;
        })
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Shutdown);
    assert_eq!(sink.delivered_gnos(), vec![1, 2]);
    assert!(!outcome.positions.contains(&SOURCE_A, 3));
    assert_eq!(
        store.position_text(STREAM).await.as_deref(),
        Some("3f3f3f3f-3f3f-3f3f-3f3f-3f3f3f3f3f3f:1-2")
    );
}

#[tokio::test]
async fn test_reader_failure_is_fatal_after_draining() {
    init_test_logging();

    let mut events = transaction(SOURCE_A, 1, &[1]);
    events.extend(transaction(SOURCE_A, 2, &[2]));
    // commit with no GTID
    events.push(commit(99));

    let store = Arc::new(MemoryPositionStore::new());
    let sink = RecordingSink::new();

    let err = pipeline()
        .run(
            ScriptedStream::new(events),
            PositionSet::new(),
            store.clone(),
            sink.clone(),
            no_shutdown(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::StreamReader));
    assert!(err.to_string().starts_with("stream reader failed"));
    assert_eq!(sink.delivered_gnos(), vec![1, 2]);
    assert_eq!(store.write_count(), 2);
}

#[tokio::test]
async fn test_stream_error_is_reported_by_reader_stage() {
    let stream = ScriptedStream::new(transaction(SOURCE_A, 1, &[1]))
        .then_fail(CdcError::replication("connection reset by peer"));

    let err = pipeline()
        .run(
            stream,
            PositionSet::new(),
            MemoryPositionStore::new(),
            RecordingSink::new(),
            no_shutdown(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::StreamReader));
    assert!(err.to_string().contains("connection reset by peer"));
}

#[tokio::test]
async fn test_committer_failure_stops_idle_reader() {
    init_test_logging();

    let mut events = transaction(SOURCE_A, 1, &[1]);
    events.extend(transaction(SOURCE_A, 2, &[2]));

    let store = Arc::new(MemoryPositionStore::new());

    // the stream goes quiet afterwards: only the closed channel can stop it
    let err = pipeline()
        .run(
            ScriptedStream::hanging(events),
            PositionSet::new(),
            store.clone(),
            RecordingSink::failing_on(2),
            no_shutdown(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::BatchCommitter));
    assert!(err.to_string().contains("downstream rejected"));
    assert_eq!(
        store.position_text(STREAM).await.as_deref(),
        Some("3f3f3f3f-3f3f-3f3f-3f3f-3f3f3f3f3f3f:1-1")
    );
}

#[tokio::test]
async fn test_small_channel_preserves_commit_order() {
    let mut events = Vec::new();
    for gno in 1..=50 {
        events.extend(transaction(SOURCE_A, gno, &[gno as u64]));
    }

    let sink = RecordingSink::new();
    let outcome = Pipeline::new(
        PipelineConfig::new(STREAM, TableFilter::new(TABLE)).with_channel_capacity(1),
    )
    .unwrap()
    .run(
        ScriptedStream::new(events),
        PositionSet::new(),
        MemoryPositionStore::new(),
        sink.clone(),
        no_shutdown(),
    )
    .await
    .unwrap();

    assert_eq!(sink.delivered_gnos(), (1..=50).collect::<Vec<_>>());
    assert_eq!(
        outcome.positions.intervals(&SOURCE_A),
        &[binlog_relay::common::Interval::new(1, 50).unwrap()]
    );
}

#[tokio::test]
async fn test_load_positions_missing_record_is_empty() {
    let store = MemoryPositionStore::new();
    let positions = pipeline().load_positions(&store).await.unwrap();
    assert!(positions.is_empty());
}
