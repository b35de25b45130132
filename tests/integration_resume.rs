//! Resume and lifecycle tests
//!
//! Drives scopes across several invocations including:
//! - Budget exhaustion with PAUSED → PAUSED → COMPLETE
//! - Crash between row write and checkpoint write
//! - Upstream growth picked up by discover
//! - Operator reset

mod common;

use std::sync::Arc;

use pagesync::database::Database;
use pagesync::models::{Row, ScopeState, StatusToken, SyncScope};
use pagesync::sync::{
    BatchOutcome, InvocationMode, Operation, PauseReason, ScopeOutcome, SkipReason,
};

use common::{create_dispatcher, create_test_config, create_test_database, record, FakeSource};

/// Test 1: One page per invocation, three invocations, no duplicates
#[tokio::test(start_paused = true)]
async fn test_budget_exhaustion_resumes() {
    let db = create_test_database().await;
    let source = Arc::new(FakeSource::new(300));
    let mut config = create_test_config();
    config.api.throttle_ms = 1_000;
    config.sync.budget_secs = 1;
    let dispatcher = create_dispatcher(
        db.clone(),
        source.clone(),
        vec![SyncScope::new("s2024", "games")],
        &config,
    );

    let mut outcomes = Vec::new();
    let mut cursors = Vec::new();
    for _ in 0..3 {
        let report = dispatcher
            .run(Operation::Continue, InvocationMode::Scheduled, None)
            .await
            .unwrap();
        match report.outcome("s2024") {
            Some(ScopeOutcome::Synced(r)) => {
                assert_eq!(r.pages_written, 1);
                outcomes.push(r.outcome);
            }
            other => panic!("Expected Synced, got {:?}", other),
        }
        let status = dispatcher.status(Some("s2024")).await.unwrap().remove(0);
        cursors.push(status.checkpoint.cursor);
    }

    assert_eq!(
        outcomes,
        vec![
            BatchOutcome::Paused(PauseReason::Budget),
            BatchOutcome::Paused(PauseReason::Budget),
            BatchOutcome::Complete,
        ]
    );
    assert_eq!(cursors, vec![0, 1, 2]);
    assert_eq!(source.fetched(), vec![0, 1, 2]);
    assert_eq!(db.count_rows("s2024").await.unwrap(), 300);

    let paused = db
        .logs_for_scope("s2024", 100)
        .await
        .unwrap()
        .iter()
        .filter(|e| e.status == StatusToken::Paused)
        .count();
    assert_eq!(paused, 2);
}

/// Test 2: Rows written by a crashed invocation are rewritten, not duplicated
#[tokio::test]
async fn test_crash_mid_batch() {
    let db = create_test_database().await;
    let source = Arc::new(FakeSource::new(250));
    let dispatcher = create_dispatcher(
        db.clone(),
        source.clone(),
        vec![SyncScope::new("s2024", "games")],
        &create_test_config(),
    );

    // The first invocation dies on page 1
    source.fail_page(1, 1);
    let report = dispatcher
        .run(Operation::Continue, InvocationMode::Scheduled, None)
        .await
        .unwrap();
    assert!(matches!(report.outcome("s2024"), Some(ScopeOutcome::Failed(_))));

    // ...after its rows for page 1 had reached the store
    let partial: Vec<Row> = (100..200)
        .map(|i| {
            let r = record(i);
            Row::new(
                i.to_string(),
                vec![i.to_string(), r["name"].as_str().unwrap().to_string()],
            )
        })
        .collect();
    db.upsert_rows("s2024", &partial).await.unwrap();
    assert_eq!(db.count_rows("s2024").await.unwrap(), 200);

    let status = dispatcher.status(Some("s2024")).await.unwrap().remove(0);
    assert_eq!(status.checkpoint.cursor, 0);

    let report = dispatcher
        .run(Operation::Continue, InvocationMode::Scheduled, None)
        .await
        .unwrap();
    assert!(matches!(report.outcome("s2024"), Some(ScopeOutcome::Synced(_))));

    assert_eq!(source.fetched(), vec![0, 1, 2]);
    assert_eq!(db.count_rows("s2024").await.unwrap(), 250);
}

/// Test 3: Growth is discovered, the tail page refetched and the rest appended
#[tokio::test]
async fn test_discover_then_continue() {
    let db = create_test_database().await;
    let source = Arc::new(FakeSource::new(250));
    let dispatcher = create_dispatcher(
        db.clone(),
        source.clone(),
        vec![SyncScope::new("c2024", "games")],
        &create_test_config(),
    );

    dispatcher
        .run(Operation::Continue, InvocationMode::Scheduled, None)
        .await
        .unwrap();
    source.set_total(420);

    let report = dispatcher
        .run(Operation::Discover, InvocationMode::Scheduled, None)
        .await
        .unwrap();
    match report.outcome("c2024") {
        Some(ScopeOutcome::Extended(ext)) => {
            assert!(ext.reopened);
            assert_eq!(ext.total_units, 5);
        }
        other => panic!("Expected Extended, got {:?}", other),
    }

    let status = dispatcher.status(Some("c2024")).await.unwrap().remove(0);
    assert_eq!(status.state, ScopeState::InProgress);
    assert_eq!(status.checkpoint.cursor, 2);

    dispatcher
        .run(Operation::Continue, InvocationMode::Scheduled, None)
        .await
        .unwrap();

    let status = dispatcher.status(Some("c2024")).await.unwrap().remove(0);
    assert_eq!(status.state, ScopeState::Complete);
    assert_eq!(status.checkpoint.cursor, 4);
    assert!(!status.checkpoint.tail_dirty);
    assert_eq!(db.count_rows("c2024").await.unwrap(), 420);

    // page 0 probe, then the old tail page 2 again
    assert_eq!(source.fetched(), vec![0, 1, 2, 0, 2, 3, 4]);
}

/// Test 4: Reset re-opens a frozen scope for a full re-read
#[tokio::test]
async fn test_reset_reopens_frozen_scope() {
    let db = create_test_database().await;
    let source = Arc::new(FakeSource::new(150));
    let dispatcher = create_dispatcher(
        db.clone(),
        source.clone(),
        vec![SyncScope::new("h2019", "games").historical(true)],
        &create_test_config(),
    );

    dispatcher
        .run(Operation::Continue, InvocationMode::Scheduled, None)
        .await
        .unwrap();
    let report = dispatcher
        .run(Operation::Discover, InvocationMode::Scheduled, None)
        .await
        .unwrap();
    assert_eq!(
        report.outcome("h2019"),
        Some(&ScopeOutcome::Skipped(SkipReason::Frozen))
    );

    assert!(dispatcher
        .reset("h2019", InvocationMode::Interactive)
        .await
        .unwrap());

    dispatcher
        .run(Operation::Continue, InvocationMode::Scheduled, None)
        .await
        .unwrap();

    assert_eq!(source.fetched(), vec![0, 1, 0, 1]);
    assert_eq!(db.count_rows("h2019").await.unwrap(), 150);
}
