//! Restart behaviour against a durable file checkpoint

mod harness;

use binlog_relay::common::FilePositionStore;
use binlog_relay::{Pipeline, PipelineConfig, TableFilter};
use harness::*;
use tempfile::tempdir;

fn pipeline() -> Pipeline {
    Pipeline::new(PipelineConfig::new(STREAM, TableFilter::new(TABLE))).unwrap()
}

#[tokio::test]
async fn test_restart_resumes_from_persisted_positions() {
    init_test_logging();
    let dir = tempdir().unwrap();

    // first run commits 1-3
    let mut events = Vec::new();
    for gno in 1..=3 {
        events.extend(transaction(SOURCE_A, gno, &[gno as u64]));
    }
    let store = FilePositionStore::new(dir.path()).await.unwrap();
    let positions = pipeline().load_positions(&store).await.unwrap();
    assert!(positions.is_empty());

    let first_sink = RecordingSink::new();
    pipeline()
        .run(
            ScriptedStream::new(events),
            positions,
            store,
            first_sink.clone(),
            std::future::pending::<()>(),
        )
        .await
        .unwrap();
    assert_eq!(first_sink.delivered_gnos(), vec![1, 2, 3]);

    // server replays from 2 after the restart
    let mut replay = Vec::new();
    for gno in 2..=5 {
        replay.extend(transaction(SOURCE_A, gno, &[gno as u64]));
    }
    let store = FilePositionStore::new(dir.path()).await.unwrap();
    let positions = pipeline().load_positions(&store).await.unwrap();
    assert_eq!(
        positions.to_string(),
        "3f3f3f3f-3f3f-3f3f-3f3f-3f3f3f3f3f3f:1-3"
    );

    let second_sink = RecordingSink::new();
    let outcome = pipeline()
        .run(
            ScriptedStream::new(replay),
            positions,
            store,
            second_sink.clone(),
            std::future::pending::<()>(),
        )
        .await
        .unwrap();

    assert_eq!(second_sink.delivered_gnos(), vec![4, 5]);
    assert_eq!(outcome.stats.duplicates_skipped, 2);

    let reopened = FilePositionStore::new(dir.path()).await.unwrap();
    assert_eq!(
        pipeline()
            .load_positions(&reopened)
            .await
            .unwrap()
            .to_string(),
        "3f3f3f3f-3f3f-3f3f-3f3f-3f3f3f3f3f3f:1-5"
    );
}

#[tokio::test]
async fn test_corrupt_checkpoint_fails_startup() {
    let dir = tempdir().unwrap();
    tokio::fs::write(
        dir.path().join(format!("{}.json", STREAM)),
        br#"{"stream_name":"core_event","position_text":"not-a-uuid:1-2","updated_at":0}"#,
    )
    .await
    .unwrap();

    let store = FilePositionStore::new(dir.path()).await.unwrap();
    let err = pipeline().load_positions(&store).await.unwrap_err();
    assert_eq!(err.stage(), Some(binlog_relay::Stage::Startup));
}
