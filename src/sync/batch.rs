//! Batch sync loop
//!
//! Drives one scope on one checkpoint track from its persisted cursor
//! towards completion, one page per iteration. The cursor is persisted right
//! after each page's rows are written, so a crash loses at most the page in
//! flight, and that page is rewritten without duplicates on the next run
//! because rows are keyed by record id.
//!
//! Callers must hold the scope's lock for the whole call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{EngineError, SyncError};
use crate::models::{keys, units_for, CheckpointTrack, Row, StatusToken, SyncScope};
use crate::sync::checkpoint::CheckpointStore;
use crate::sync::context::InvocationContext;
use crate::sync::oplog::OperationLog;
use crate::sync::source::PageSource;
use crate::sync::transform::RowTransformer;
use crate::sync::writer::RowWriter;

/// Why a run stopped before completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// Invocation wall-clock budget spent
    Budget,
    /// Per-invocation row cap for the scope reached
    BatchSize,
}

impl std::fmt::Display for PauseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PauseReason::Budget => write!(f, "budget exhausted"),
            PauseReason::BatchSize => write!(f, "batch size reached"),
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Last page written and `completed` persisted
    Complete,
    /// Stopped early; the next run resumes from the cursor
    Paused(PauseReason),
}

/// Result of one run of the loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// How the run ended
    pub outcome: BatchOutcome,
    /// Pages written in this run
    pub pages_written: u64,
    /// Rows written in this run
    pub rows_written: u64,
    /// Cursor after the run
    pub cursor: i64,
    /// Total units after the run
    pub total_units: i64,
}

/// Fetch → transform → write driver
#[derive(Clone)]
pub struct BatchSync {
    source: Arc<dyn PageSource>,
    transformer: Arc<dyn RowTransformer>,
    writer: RowWriter,
    checkpoints: CheckpointStore,
    oplog: OperationLog,
    page_size: u32,
    throttle: Duration,
}

impl BatchSync {
    /// Create a loop driver
    pub fn new(
        source: Arc<dyn PageSource>,
        transformer: Arc<dyn RowTransformer>,
        writer: RowWriter,
        checkpoints: CheckpointStore,
        oplog: OperationLog,
    ) -> Self {
        Self {
            source,
            transformer,
            writer,
            checkpoints,
            oplog,
            page_size: 100,
            throttle: Duration::from_millis(1000),
        }
    }

    /// Records requested per page
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Sleep between successive pages
    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    /// Page size in use
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Drive `scope` on `track` until complete or out of budget
    pub async fn run(
        &self,
        ctx: &mut InvocationContext,
        scope: &SyncScope,
        track: CheckpointTrack,
        operation: &str,
    ) -> Result<BatchReport, EngineError> {
        let scope_id = scope.id.as_str();
        self.checkpoints.initialize(ctx, scope_id, track).await?;
        let checkpoint = self.checkpoints.load(ctx, scope_id, track).await?;

        let mut report = BatchReport {
            outcome: BatchOutcome::Complete,
            pages_written: 0,
            rows_written: 0,
            cursor: checkpoint.cursor,
            total_units: checkpoint.total_units,
        };

        if checkpoint.completed {
            debug!(scope = scope_id, track = %track, "Already complete");
            return Ok(report);
        }

        let mut current = checkpoint.next_page();

        // Cursor persisted on the last page but the completion flag never was
        if checkpoint.total_known() && current >= checkpoint.total_units {
            self.mark_complete(ctx, scope_id, track).await?;
            self.oplog
                .record(
                    StatusToken::Complete,
                    operation,
                    Some(scope_id),
                    format!(
                        "{} track recovered at page {}/{}",
                        track,
                        checkpoint.cursor + 1,
                        checkpoint.total_units
                    ),
                )
                .await;
            return Ok(report);
        }

        self.oplog
            .record(
                StatusToken::Start,
                operation,
                Some(scope_id),
                format!("{} track from page {}", track, current),
            )
            .await;

        let mut tail_dirty = checkpoint.tail_dirty;

        loop {
            if ctx.budget_exhausted() {
                return self
                    .pause(scope_id, operation, track, report, PauseReason::Budget, current)
                    .await;
            }
            if report.rows_written >= scope.batch_size {
                return self
                    .pause(scope_id, operation, track, report, PauseReason::BatchSize, current)
                    .await;
            }

            let page = self
                .source
                .fetch_page(scope, current as u64, self.page_size)
                .await?;

            // Learned once from the first page; never recomputed afterwards
            if report.total_units < 0 {
                let total_records = page.total_count.ok_or_else(|| {
                    SyncError::InvalidData(format!(
                        "page {} of scope {} carries no total count",
                        current, scope_id
                    ))
                })?;
                report.total_units = units_for(total_records, self.page_size);
                self.checkpoints
                    .set(ctx, scope_id, &track.key(keys::TOTAL_UNITS), &report.total_units)
                    .await?;
                self.checkpoints
                    .set(
                        ctx,
                        scope_id,
                        &track.key(keys::TOTAL_RECORDS),
                        &(total_records as i64),
                    )
                    .await?;
                info!(
                    scope = scope_id,
                    track = %track,
                    total_records,
                    total_units = report.total_units,
                    "Learned scope size"
                );
            }

            let rows = self
                .build_rows(scope, operation, &page.records)
                .await?;
            let written = self.writer.write(scope_id, &rows).await?;

            self.checkpoints
                .set(ctx, scope_id, &track.key(keys::CURSOR), &current)
                .await?;
            self.checkpoints
                .set(ctx, scope_id, &track.key(keys::LAST_SYNC), &Utc::now())
                .await?;
            if tail_dirty {
                self.checkpoints
                    .set(ctx, scope_id, &track.key(keys::TAIL_DIRTY), &false)
                    .await?;
                tail_dirty = false;
            }

            report.cursor = current;
            report.pages_written += 1;
            report.rows_written += written;

            self.oplog
                .record(
                    StatusToken::Batch,
                    operation,
                    Some(scope_id),
                    format!(
                        "page {}/{}: {} rows",
                        current + 1,
                        report.total_units,
                        written
                    ),
                )
                .await;

            if current >= report.total_units - 1 {
                self.mark_complete(ctx, scope_id, track).await?;
                self.oplog
                    .record(
                        StatusToken::Complete,
                        operation,
                        Some(scope_id),
                        format!(
                            "{} track complete: {} pages, {} rows this run",
                            track, report.pages_written, report.rows_written
                        ),
                    )
                    .await;
                report.outcome = BatchOutcome::Complete;
                return Ok(report);
            }

            current += 1;
            tokio::time::sleep(self.throttle).await;
        }
    }

    /// Transform a page, merging supplementary data fetched for the same batch
    async fn build_rows(
        &self,
        scope: &SyncScope,
        operation: &str,
        records: &[Value],
    ) -> Result<Vec<Row>, EngineError> {
        let mut supplementary = HashMap::new();

        if scope.supplementary_endpoint.is_some() && !records.is_empty() {
            let ids: Vec<String> = records
                .iter()
                .filter_map(|r| self.transformer.record_id(r))
                .collect();

            match self.source.fetch_supplementary(scope, &ids).await {
                Ok(data) => supplementary = data,
                Err(e) => {
                    warn!(scope = %scope.id, error = %e, "Supplementary fetch failed, continuing without it");
                    self.oplog
                        .record(
                            StatusToken::Error,
                            operation,
                            Some(&scope.id),
                            format!("supplementary data unavailable, batch continues: {}", e),
                        )
                        .await;
                }
            }
        }

        let rows = records
            .iter()
            .map(|record| {
                let extra = self
                    .transformer
                    .record_id(record)
                    .and_then(|id| supplementary.get(&id));
                self.transformer.transform(record, extra)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    async fn mark_complete(
        &self,
        ctx: &mut InvocationContext,
        scope_id: &str,
        track: CheckpointTrack,
    ) -> Result<(), EngineError> {
        self.checkpoints
            .set(ctx, scope_id, &track.key(keys::COMPLETED), &true)
            .await?;
        Ok(())
    }

    async fn pause(
        &self,
        scope_id: &str,
        operation: &str,
        track: CheckpointTrack,
        mut report: BatchReport,
        reason: PauseReason,
        next_page: i64,
    ) -> Result<BatchReport, EngineError> {
        self.oplog
            .record(
                StatusToken::Paused,
                operation,
                Some(scope_id),
                format!(
                    "{} track paused ({}) before page {}/{}",
                    track,
                    reason,
                    next_page + 1,
                    report.total_units
                ),
            )
            .await;
        report.outcome = BatchOutcome::Paused(reason);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColumnConfig;
    use crate::database::{Database, SqliteDatabase};
    use crate::models::{ColumnSource, RowSchema};
    use crate::sync::context::InvocationMode;
    use crate::sync::source::{MockPageSource, Page};
    use crate::sync::transform::SchemaTransformer;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// In-memory upstream with `total` records
    struct FakeSource {
        total: u64,
        calls: Mutex<Vec<u64>>,
        fail_supplementary: bool,
    }

    impl FakeSource {
        fn new(total: u64) -> Self {
            Self {
                total,
                calls: Mutex::new(Vec::new()),
                fail_supplementary: false,
            }
        }

        fn calls(&self) -> Vec<u64> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageSource for FakeSource {
        async fn fetch_page(
            &self,
            _scope: &SyncScope,
            page: u64,
            page_size: u32,
        ) -> Result<Page, SyncError> {
            self.calls.lock().unwrap().push(page);
            let start = page * u64::from(page_size);
            let end = (start + u64::from(page_size)).min(self.total);
            Ok(Page {
                total_count: Some(self.total),
                records: (start..end)
                    .map(|i| json!({"id": i, "name": format!("rec-{}", i)}))
                    .collect(),
            })
        }

        async fn fetch_supplementary(
            &self,
            _scope: &SyncScope,
            ids: &[String],
        ) -> Result<HashMap<String, Value>, SyncError> {
            if self.fail_supplementary {
                return Err(SyncError::Status {
                    status: 500,
                    body: String::new(),
                });
            }
            Ok(ids
                .iter()
                .map(|id| (id.clone(), json!({"score": id.len()})))
                .collect())
        }
    }

    fn schema() -> RowSchema {
        RowSchema::new(
            "id",
            vec![
                ColumnConfig {
                    name: "Id".to_string(),
                    from: ColumnSource::Record,
                    field: "id".to_string(),
                },
                ColumnConfig {
                    name: "Name".to_string(),
                    from: ColumnSource::Record,
                    field: "name".to_string(),
                },
                ColumnConfig {
                    name: "Score".to_string(),
                    from: ColumnSource::Supplementary,
                    field: "score".to_string(),
                },
            ],
        )
    }

    fn engine(db: Arc<SqliteDatabase>, source: Arc<dyn PageSource>) -> BatchSync {
        BatchSync::new(
            source,
            Arc::new(SchemaTransformer::new(schema())),
            RowWriter::new(db.clone(), 3),
            CheckpointStore::new(db.clone()),
            OperationLog::new(db),
        )
        .with_page_size(100)
        .with_throttle(Duration::from_millis(1000))
    }

    fn ctx(budget: Duration) -> InvocationContext {
        InvocationContext::new(InvocationMode::Scheduled, budget)
    }

    // Test 1: 250 records at page size 100 completes in 3 pages
    #[tokio::test(start_paused = true)]
    async fn test_clean_completion() {
        let db = Arc::new(SqliteDatabase::in_memory().await.unwrap());
        let source = Arc::new(FakeSource::new(250));
        let sync = engine(db.clone(), source.clone());
        let scope = SyncScope::new("s1", "games");
        let mut ctx = ctx(Duration::from_secs(330));

        let report = sync
            .run(&mut ctx, &scope, CheckpointTrack::Primary, "continue")
            .await
            .unwrap();

        assert_eq!(report.outcome, BatchOutcome::Complete);
        assert_eq!(report.pages_written, 3);
        assert_eq!(report.rows_written, 250);
        assert_eq!(source.calls(), vec![0, 1, 2]);

        let cp = CheckpointStore::new(db.clone())
            .load(&mut ctx, "s1", CheckpointTrack::Primary)
            .await
            .unwrap();
        assert_eq!(cp.cursor, 2);
        assert_eq!(cp.total_units, 3);
        assert_eq!(cp.total_records, 250);
        assert!(cp.completed);
        assert!(cp.last_sync.is_some());
        assert_eq!(db.count_rows("s1").await.unwrap(), 250);
    }

    // Test 2: Budget for one page per invocation: PAUSED, PAUSED, COMPLETE
    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_resumes() {
        let db = Arc::new(SqliteDatabase::in_memory().await.unwrap());
        let source = Arc::new(FakeSource::new(300));
        let sync = engine(db.clone(), source.clone());
        let scope = SyncScope::new("s1", "games");

        let mut outcomes = Vec::new();
        for _ in 0..3 {
            // Throttle (1s) outlasts the budget, so each run writes one page
            let mut ctx = ctx(Duration::from_millis(500));
            let report = sync
                .run(&mut ctx, &scope, CheckpointTrack::Primary, "continue")
                .await
                .unwrap();
            assert_eq!(report.pages_written, 1);
            outcomes.push(report.outcome);
        }

        assert_eq!(
            outcomes,
            vec![
                BatchOutcome::Paused(PauseReason::Budget),
                BatchOutcome::Paused(PauseReason::Budget),
                BatchOutcome::Complete,
            ]
        );
        assert_eq!(source.calls(), vec![0, 1, 2]);
        assert_eq!(db.count_rows("s1").await.unwrap(), 300);

        let paused = db
            .logs_for_scope("s1", 100)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.status == StatusToken::Paused)
            .count();
        assert_eq!(paused, 2);
    }

    // Test 3: Crash after writing rows but before the cursor: page rewritten, no duplicates
    #[tokio::test(start_paused = true)]
    async fn test_crash_mid_batch_rewrites_page() {
        let db = Arc::new(SqliteDatabase::in_memory().await.unwrap());
        let source = Arc::new(FakeSource::new(250));
        let sync = engine(db.clone(), source.clone());
        let scope = SyncScope::new("s1", "games");

        // Simulate: page 0 fully persisted, page 1 rows written, cursor not advanced
        let mut setup = ctx(Duration::from_secs(330));
        let store = CheckpointStore::new(db.clone());
        store.set(&mut setup, "s1", keys::CURSOR, &0i64).await.unwrap();
        store.set(&mut setup, "s1", keys::TOTAL_UNITS, &3i64).await.unwrap();
        let page1 = source.fetch_page(&scope, 1, 100).await.unwrap();
        let rows = sync.build_rows(&scope, "continue", &page1.records).await.unwrap();
        RowWriter::new(db.clone(), 3).write("s1", &rows).await.unwrap();

        let mut ctx = ctx(Duration::from_secs(330));
        let report = sync
            .run(&mut ctx, &scope, CheckpointTrack::Primary, "continue")
            .await
            .unwrap();

        assert_eq!(report.outcome, BatchOutcome::Complete);
        assert_eq!(report.pages_written, 2);
        // Page 0 rows were never written in this simulation
        assert_eq!(db.count_rows("s1").await.unwrap(), 150);
    }

    // Test 4: Cursor at the last page without the flag is completed without fetching
    #[tokio::test]
    async fn test_recovers_missing_completion_flag() {
        let db = Arc::new(SqliteDatabase::in_memory().await.unwrap());
        let mut source = MockPageSource::new();
        source.expect_fetch_page().times(0);
        let sync = engine(db.clone(), Arc::new(source));
        let scope = SyncScope::new("s1", "games");

        let mut ctx = ctx(Duration::from_secs(330));
        let store = CheckpointStore::new(db.clone());
        store.set(&mut ctx, "s1", keys::CURSOR, &2i64).await.unwrap();
        store.set(&mut ctx, "s1", keys::TOTAL_UNITS, &3i64).await.unwrap();

        let report = sync
            .run(&mut ctx, &scope, CheckpointTrack::Primary, "continue")
            .await
            .unwrap();

        assert_eq!(report.outcome, BatchOutcome::Complete);
        assert_eq!(report.pages_written, 0);
        assert!(store.load(&mut ctx, "s1", CheckpointTrack::Primary).await.unwrap().completed);
    }

    // Test 5: Total units are never recomputed once persisted
    #[tokio::test(start_paused = true)]
    async fn test_total_units_stable() {
        let db = Arc::new(SqliteDatabase::in_memory().await.unwrap());
        // Upstream now reports 1000 records, but 3 pages were learned earlier
        let source = Arc::new(FakeSource::new(1000));
        let sync = engine(db.clone(), source.clone());
        let scope = SyncScope::new("s1", "games");

        let mut ctx = ctx(Duration::from_secs(330));
        let store = CheckpointStore::new(db.clone());
        store.set(&mut ctx, "s1", keys::CURSOR, &0i64).await.unwrap();
        store.set(&mut ctx, "s1", keys::TOTAL_UNITS, &3i64).await.unwrap();

        let report = sync
            .run(&mut ctx, &scope, CheckpointTrack::Primary, "continue")
            .await
            .unwrap();

        assert_eq!(report.outcome, BatchOutcome::Complete);
        assert_eq!(report.total_units, 3);
        assert_eq!(source.calls(), vec![1, 2]);
        let cp = store.load(&mut ctx, "s1", CheckpointTrack::Primary).await.unwrap();
        assert_eq!(cp.total_units, 3);
    }

    // Test 6: Client error aborts; checkpoint keeps the last good page
    #[tokio::test(start_paused = true)]
    async fn test_error_aborts_and_keeps_checkpoint() {
        let db = Arc::new(SqliteDatabase::in_memory().await.unwrap());
        let mut source = MockPageSource::new();
        source
            .expect_fetch_page()
            .withf(|_, page, _| *page == 0)
            .returning(|_, _, _| {
                Ok(Page {
                    total_count: Some(250),
                    records: vec![json!({"id": 1, "name": "a"})],
                })
            });
        source
            .expect_fetch_page()
            .withf(|_, page, _| *page == 1)
            .returning(|_, _, _| {
                Err(SyncError::RetriesExhausted {
                    attempts: 4,
                    last: Box::new(SyncError::RateLimited(0)),
                })
            });
        let sync = engine(db.clone(), Arc::new(source));
        let scope = SyncScope::new("s1", "games");
        let mut ctx = ctx(Duration::from_secs(330));

        let result = sync
            .run(&mut ctx, &scope, CheckpointTrack::Primary, "continue")
            .await;

        assert!(matches!(
            result,
            Err(EngineError::Sync(SyncError::RetriesExhausted { .. }))
        ));
        let cp = CheckpointStore::new(db)
            .load(&mut ctx, "s1", CheckpointTrack::Primary)
            .await
            .unwrap();
        assert_eq!(cp.cursor, 0);
        assert!(!cp.completed);
    }

    // Test 7: Missing total on the first page is invalid data
    #[tokio::test]
    async fn test_missing_total_is_invalid() {
        let db = Arc::new(SqliteDatabase::in_memory().await.unwrap());
        let mut source = MockPageSource::new();
        source
            .expect_fetch_page()
            .returning(|_, _, _| Ok(Page::default()));
        let sync = engine(db.clone(), Arc::new(source));
        let scope = SyncScope::new("s1", "games");
        let mut ctx = ctx(Duration::from_secs(330));

        let result = sync
            .run(&mut ctx, &scope, CheckpointTrack::Primary, "continue")
            .await;

        assert!(matches!(
            result,
            Err(EngineError::Sync(SyncError::InvalidData(_)))
        ));
    }

    // Test 8: Width mismatch is fatal and writes nothing
    #[tokio::test]
    async fn test_width_mismatch_is_structural() {
        let db = Arc::new(SqliteDatabase::in_memory().await.unwrap());
        let source = Arc::new(FakeSource::new(10));
        // Writer declares 4 columns, the transformer produces 3
        let sync = BatchSync::new(
            source,
            Arc::new(SchemaTransformer::new(schema())),
            RowWriter::new(db.clone(), 4),
            CheckpointStore::new(db.clone()),
            OperationLog::new(db.clone()),
        );
        let scope = SyncScope::new("s1", "games");
        let mut ctx = ctx(Duration::from_secs(330));

        let err = sync
            .run(&mut ctx, &scope, CheckpointTrack::Primary, "continue")
            .await
            .unwrap_err();

        assert!(err.is_structural());
        assert_eq!(db.count_rows("s1").await.unwrap(), 0);
        let cp = CheckpointStore::new(db)
            .load(&mut ctx, "s1", CheckpointTrack::Primary)
            .await
            .unwrap();
        assert_eq!(cp.cursor, -1);
    }

    // Test 9: Supplementary failure is recovered locally
    #[tokio::test]
    async fn test_supplementary_failure_recovered() {
        let db = Arc::new(SqliteDatabase::in_memory().await.unwrap());
        let mut fake = FakeSource::new(5);
        fake.fail_supplementary = true;
        let sync = engine(db.clone(), Arc::new(fake));
        let scope = SyncScope::new("s1", "games").with_supplementary("games/extra");
        let mut ctx = ctx(Duration::from_secs(330));

        let report = sync
            .run(&mut ctx, &scope, CheckpointTrack::Primary, "continue")
            .await
            .unwrap();

        assert_eq!(report.outcome, BatchOutcome::Complete);
        let rows = db.list_rows("s1").await.unwrap();
        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|r| r.cells[2].is_empty()));

        let logs = db.logs_for_scope("s1", 20).await.unwrap();
        assert!(logs.iter().any(|e| e.status == StatusToken::Error));
    }

    // Test 10: Supplementary data is merged by record id
    #[tokio::test]
    async fn test_supplementary_merged() {
        let db = Arc::new(SqliteDatabase::in_memory().await.unwrap());
        let sync = engine(db.clone(), Arc::new(FakeSource::new(12)));
        let scope = SyncScope::new("s1", "games").with_supplementary("games/extra");
        let mut ctx = ctx(Duration::from_secs(330));

        sync.run(&mut ctx, &scope, CheckpointTrack::Primary, "continue")
            .await
            .unwrap();

        let rows = db.list_rows("s1").await.unwrap();
        assert_eq!(rows[0].cells, vec!["0", "rec-0", "1"]);
        assert_eq!(rows[11].cells, vec!["11", "rec-11", "2"]);
    }

    // Test 11: batch_size caps rows per invocation
    #[tokio::test(start_paused = true)]
    async fn test_batch_size_pauses() {
        let db = Arc::new(SqliteDatabase::in_memory().await.unwrap());
        let source = Arc::new(FakeSource::new(500));
        let sync = engine(db.clone(), source.clone());
        let scope = SyncScope::new("s1", "games").with_batch_size(200);
        let mut ctx = ctx(Duration::from_secs(330));

        let report = sync
            .run(&mut ctx, &scope, CheckpointTrack::Primary, "continue")
            .await
            .unwrap();

        assert_eq!(report.outcome, BatchOutcome::Paused(PauseReason::BatchSize));
        assert_eq!(report.rows_written, 200);
        assert_eq!(report.cursor, 1);
    }

    // Test 12: Empty scope has one page and completes
    #[tokio::test]
    async fn test_empty_scope_completes() {
        let db = Arc::new(SqliteDatabase::in_memory().await.unwrap());
        let sync = engine(db.clone(), Arc::new(FakeSource::new(0)));
        let scope = SyncScope::new("s1", "games");
        let mut ctx = ctx(Duration::from_secs(330));

        let report = sync
            .run(&mut ctx, &scope, CheckpointTrack::Primary, "continue")
            .await
            .unwrap();

        assert_eq!(report.outcome, BatchOutcome::Complete);
        assert_eq!(report.total_units, 1);
        assert_eq!(report.cursor, 0);
    }

    // Test 13: tail_dirty re-fetches the cursor page and never moves the cursor back
    #[tokio::test(start_paused = true)]
    async fn test_tail_dirty_refetches_cursor_page() {
        let db = Arc::new(SqliteDatabase::in_memory().await.unwrap());
        let source = Arc::new(FakeSource::new(450));
        let sync = engine(db.clone(), source.clone());
        let scope = SyncScope::new("s1", "games");

        let mut ctx = ctx(Duration::from_secs(330));
        let store = CheckpointStore::new(db.clone());
        store.set(&mut ctx, "s1", keys::CURSOR, &2i64).await.unwrap();
        store.set(&mut ctx, "s1", keys::TOTAL_UNITS, &5i64).await.unwrap();
        store.set(&mut ctx, "s1", keys::TAIL_DIRTY, &true).await.unwrap();

        sync.run(&mut ctx, &scope, CheckpointTrack::Primary, "continue")
            .await
            .unwrap();

        assert_eq!(source.calls(), vec![2, 3, 4]);
        let cp = store.load(&mut ctx, "s1", CheckpointTrack::Primary).await.unwrap();
        assert!(!cp.tail_dirty);
        assert!(cp.completed);
        assert_eq!(cp.cursor, 4);
    }

    // Test 14: Reconcile track leaves the primary cursor alone
    #[tokio::test(start_paused = true)]
    async fn test_reconcile_track_is_independent() {
        let db = Arc::new(SqliteDatabase::in_memory().await.unwrap());
        let sync = engine(db.clone(), Arc::new(FakeSource::new(250)));
        let scope = SyncScope::new("s1", "games");
        let mut ctx = ctx(Duration::from_secs(330));

        sync.run(&mut ctx, &scope, CheckpointTrack::Reconcile, "reconcile")
            .await
            .unwrap();

        let store = CheckpointStore::new(db.clone());
        let primary = store.load(&mut ctx, "s1", CheckpointTrack::Primary).await.unwrap();
        let reconcile = store
            .load(&mut ctx, "s1", CheckpointTrack::Reconcile)
            .await
            .unwrap();
        assert_eq!(primary.cursor, -1);
        assert!(reconcile.completed);
        assert_eq!(reconcile.cursor, 2);
    }
}
