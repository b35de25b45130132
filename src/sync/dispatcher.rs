//! Operation dispatcher
//!
//! Maps a named operation onto the registered scopes. Each scope is
//! classified from its checkpoint first; scopes the operation cannot affect
//! are skipped before any lock or network call. Eligible scopes are worked
//! on under the scope lock, one at a time, all sharing the invocation's
//! wall-clock budget.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{Config, StalenessConfig, SyncConfig};
use crate::database::Database;
use crate::error::{AppError, EngineError, SyncError};
use crate::models::{
    keys, units_for, Checkpoint, CheckpointTrack, ScopeKind, ScopeRegistry, ScopeState, Snapshot,
    StatusToken, SyncScope,
};
use crate::sync::batch::{BatchReport, BatchSync};
use crate::sync::checkpoint::CheckpointStore;
use crate::sync::context::{InvocationContext, InvocationMode};
use crate::sync::lock::LockManager;
use crate::sync::oplog::OperationLog;
use crate::sync::source::PageSource;
use crate::sync::transform::RowTransformer;
use crate::sync::writer::RowWriter;

/// Named operations that run the engine over a set of scopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Resume any non-complete scope
    Continue,
    /// Current scopes: discover, then continue
    Refresh,
    /// Probe for new records and reopen grown scopes
    Discover,
    /// Record row count and checkpoint
    Snapshot,
    /// Re-read the whole scope on the reconcile track
    Reconcile,
}

impl Operation {
    /// Name used in the ops log and on the command line
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Continue => "continue",
            Operation::Refresh => "refresh",
            Operation::Discover => "discover",
            Operation::Snapshot => "snapshot",
            Operation::Reconcile => "reconcile",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "continue" => Ok(Operation::Continue),
            "refresh" => Ok(Operation::Refresh),
            "discover" => Ok(Operation::Discover),
            "snapshot" => Ok(Operation::Snapshot),
            "reconcile" => Ok(Operation::Reconcile),
            _ => Err(format!("Unknown operation: {}", s)),
        }
    }
}

/// Why a scope was not worked on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Historical, finalized and complete
    Frozen,
    /// Operation applies to current scopes only
    NotCurrent,
    /// Nothing written yet; the first page fetch learns the total
    NotStarted,
    /// Primary track complete and no reconcile pending
    AlreadyComplete,
    /// Lock held by another invocation
    Busy,
    /// Invocation budget spent on earlier scopes
    Budget,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::Frozen => "frozen",
            SkipReason::NotCurrent => "not a current scope",
            SkipReason::NotStarted => "not started",
            SkipReason::AlreadyComplete => "complete",
            SkipReason::Busy => "busy",
            SkipReason::Budget => "budget exhausted",
        };
        f.write_str(s)
    }
}

/// A scope grown upstream since its size was recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extension {
    /// Recorded total before the probe (-1 when unknown)
    pub previous_records: i64,
    /// Total reported by the probe
    pub total_records: u64,
    /// Recorded units before the probe
    pub previous_units: i64,
    /// Units after the extension
    pub total_units: i64,
    /// The scope was COMPLETE and is IN_PROGRESS again
    pub reopened: bool,
}

/// What happened to one scope
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeOutcome {
    /// Batch loop ran
    Synced(BatchReport),
    /// Discover found new records
    Extended(Extension),
    /// Discover found nothing new
    Unchanged,
    /// Refresh ran discover then the batch loop
    Refreshed {
        /// Set when discover grew the scope
        extension: Option<Extension>,
        /// Result of the continuation
        report: BatchReport,
    },
    /// Snapshot captured
    Captured(Snapshot),
    /// Skipped without doing any work
    Skipped(SkipReason),
    /// Failed; logged and left for the next tick
    Failed(String),
}

/// Per-scope line of a dispatch report
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeResult {
    /// Scope id
    pub scope_id: String,
    /// Outcome
    pub outcome: ScopeOutcome,
}

/// Result of one invocation
#[derive(Debug, Clone)]
pub struct DispatchReport {
    /// Operation run
    pub operation: Operation,
    /// Invocation mode
    pub mode: InvocationMode,
    /// One entry per selected scope, in registry order
    pub results: Vec<ScopeResult>,
}

impl DispatchReport {
    /// Outcome for a scope, if it was selected
    pub fn outcome(&self, scope_id: &str) -> Option<&ScopeOutcome> {
        self.results
            .iter()
            .find(|r| r.scope_id == scope_id)
            .map(|r| &r.outcome)
    }

    /// Number of scopes that failed
    pub fn failures(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, ScopeOutcome::Failed(_)))
            .count()
    }
}

/// Read-only view of a scope for `status`
#[derive(Debug, Clone, Serialize)]
pub struct ScopeStatus {
    /// Scope id
    pub scope_id: String,
    /// Historical or current
    pub kind: ScopeKind,
    /// Upstream units all final
    pub finalized: bool,
    /// State of the primary track
    pub state: ScopeState,
    /// Skipped by discover, snapshot and reconcile
    pub frozen: bool,
    /// Primary track
    pub checkpoint: Checkpoint,
    /// Reconcile track
    pub reconcile: Checkpoint,
    /// Rows in the row store
    pub row_count: u64,
    /// Last sync older than the staleness threshold
    pub stale: bool,
    /// Current lock holder, if locked
    pub locked_by: Option<String>,
}

/// Runs operations over the scope registry
pub struct Dispatcher {
    registry: ScopeRegistry,
    db: Arc<dyn Database>,
    source: Arc<dyn PageSource>,
    checkpoints: CheckpointStore,
    locks: LockManager,
    batch: BatchSync,
    oplog: OperationLog,
    sync: SyncConfig,
    staleness: StalenessConfig,
    holder: String,
}

impl Dispatcher {
    /// Wire the engine from configuration
    pub fn new(
        registry: ScopeRegistry,
        db: Arc<dyn Database>,
        source: Arc<dyn PageSource>,
        transformer: Arc<dyn RowTransformer>,
        config: &Config,
    ) -> Self {
        let checkpoints = CheckpointStore::new(db.clone());
        let oplog = OperationLog::new(db.clone());
        let writer = RowWriter::new(db.clone(), transformer.width());
        let batch = BatchSync::new(
            source.clone(),
            transformer,
            writer,
            checkpoints.clone(),
            oplog.clone(),
        )
        .with_page_size(config.api.page_size)
        .with_throttle(config.api.throttle());

        Self {
            registry,
            locks: LockManager::new(db.clone(), config.sync.ceiling()),
            db,
            source,
            checkpoints,
            batch,
            oplog,
            sync: config.sync.clone(),
            staleness: config.staleness.clone(),
            holder: format!("pagesync-{}", std::process::id()),
        }
    }

    /// Override the lock holder label written to `sync_locks`
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    /// Run `operation` over one scope or over all of them
    pub async fn run(
        &self,
        operation: Operation,
        mode: InvocationMode,
        scope_id: Option<&str>,
    ) -> Result<DispatchReport, AppError> {
        let scopes = self.select(scope_id)?;
        let mut ctx = InvocationContext::new(mode, self.sync.budget());
        let mut results = Vec::with_capacity(scopes.len());

        info!(operation = %operation, mode = %mode, scopes = scopes.len(), "Dispatching");

        for scope in scopes {
            let outcome = match self.run_scope(&mut ctx, operation, scope).await {
                Ok(ScopeOutcome::Skipped(SkipReason::Busy))
                    if mode == InvocationMode::Interactive =>
                {
                    return Err(AppError::Busy(scope.lock_name()));
                }
                Ok(outcome) => outcome,
                Err(e) => {
                    self.oplog
                        .record(
                            StatusToken::Error,
                            operation.name(),
                            Some(&scope.id),
                            e.to_string(),
                        )
                        .await;
                    if mode == InvocationMode::Interactive {
                        return Err(e.into());
                    }
                    if e.is_structural() {
                        warn!(scope = %scope.id, error = %e, "Structural failure, scope needs attention");
                    }
                    ScopeOutcome::Failed(e.to_string())
                }
            };

            debug!(
                scope = %scope.id,
                remaining_ms = ctx.remaining().as_millis() as u64,
                "Scope finished"
            );
            results.push(ScopeResult {
                scope_id: scope.id.clone(),
                outcome,
            });
        }

        info!(
            operation = %operation,
            elapsed_ms = ctx.elapsed().as_millis() as u64,
            settings_scans = ctx.settings_scans(),
            "Dispatch finished"
        );

        Ok(DispatchReport {
            operation,
            mode,
            results,
        })
    }

    /// Clear a scope's primary track back to NOT_STARTED under its lock
    ///
    /// Rows already written are kept; the next sync overwrites them by id.
    pub async fn reset(&self, scope_id: &str, mode: InvocationMode) -> Result<bool, AppError> {
        let scope = self
            .registry
            .get(scope_id)
            .ok_or_else(|| AppError::UnknownScope(scope_id.to_string()))?;
        let mut ctx = InvocationContext::new(mode, self.sync.budget());

        let Some(token) = self
            .locks
            .acquire(&scope.lock_name(), &self.holder, mode.lock_wait(&self.sync))
            .await?
        else {
            self.skip(scope, "reset", SkipReason::Busy).await;
            return match mode {
                InvocationMode::Interactive => Err(AppError::Busy(scope.lock_name())),
                InvocationMode::Scheduled => Ok(false),
            };
        };

        let result = self
            .checkpoints
            .reset(&mut ctx, &scope.id, CheckpointTrack::Primary)
            .await;
        self.release(&token).await;
        result?;

        self.oplog
            .record(
                StatusToken::Complete,
                "reset",
                Some(&scope.id),
                "primary track reset to NOT_STARTED",
            )
            .await;
        Ok(true)
    }

    /// Classification and checkpoint of one scope or all of them
    pub async fn status(&self, scope_id: Option<&str>) -> Result<Vec<ScopeStatus>, AppError> {
        let scopes = self.select(scope_id)?;
        let mut ctx = InvocationContext::new(InvocationMode::Interactive, self.sync.budget());
        let now = Utc::now();
        let mut statuses = Vec::with_capacity(scopes.len());

        for scope in scopes {
            let checkpoint = self
                .checkpoints
                .load(&mut ctx, &scope.id, CheckpointTrack::Primary)
                .await?;
            let reconcile = self
                .checkpoints
                .load(&mut ctx, &scope.id, CheckpointTrack::Reconcile)
                .await?;
            let state = checkpoint.state();
            let frozen = scope.is_frozen(state);

            let threshold = match scope.kind {
                ScopeKind::Current => self.staleness.current_secs,
                ScopeKind::Historical => self.staleness.historical_secs,
            };
            let stale = !frozen
                && checkpoint
                    .last_sync
                    .map(|at| (now - at).num_seconds() > threshold as i64)
                    .unwrap_or(true);

            let locked_by = self
                .locks
                .current_holder(&scope.lock_name())
                .await?
                .map(|lease| lease.holder);

            statuses.push(ScopeStatus {
                scope_id: scope.id.clone(),
                kind: scope.kind,
                finalized: scope.finalized,
                state,
                frozen,
                row_count: self.db.count_rows(&scope.id).await?,
                checkpoint,
                reconcile,
                stale,
                locked_by,
            });
        }

        Ok(statuses)
    }

    fn select(&self, scope_id: Option<&str>) -> Result<Vec<&SyncScope>, AppError> {
        match scope_id {
            Some(id) => self
                .registry
                .get(id)
                .map(|scope| vec![scope])
                .ok_or_else(|| AppError::UnknownScope(id.to_string())),
            None => Ok(self.registry.iter().collect()),
        }
    }

    async fn run_scope(
        &self,
        ctx: &mut InvocationContext,
        operation: Operation,
        scope: &SyncScope,
    ) -> Result<ScopeOutcome, EngineError> {
        let primary = self
            .checkpoints
            .load(ctx, &scope.id, CheckpointTrack::Primary)
            .await?;
        let state = primary.state();

        let reconcile_pending = if operation == Operation::Continue && primary.completed {
            let reconcile = self
                .checkpoints
                .load(ctx, &scope.id, CheckpointTrack::Reconcile)
                .await?;
            reconcile.state() == ScopeState::InProgress
        } else {
            false
        };

        if let Some(reason) = skip_reason(operation, scope, state, reconcile_pending) {
            self.skip(scope, operation.name(), reason).await;
            return Ok(ScopeOutcome::Skipped(reason));
        }

        if operation == Operation::Snapshot {
            return self.capture_snapshot(ctx, scope).await;
        }

        if ctx.budget_exhausted() {
            self.oplog
                .record(
                    StatusToken::Paused,
                    operation.name(),
                    Some(&scope.id),
                    "budget exhausted before start",
                )
                .await;
            return Ok(ScopeOutcome::Skipped(SkipReason::Budget));
        }

        let Some(token) = self
            .locks
            .acquire(
                &scope.lock_name(),
                &self.holder,
                ctx.mode().lock_wait(&self.sync),
            )
            .await?
        else {
            self.skip(scope, operation.name(), SkipReason::Busy).await;
            return Ok(ScopeOutcome::Skipped(SkipReason::Busy));
        };

        let result = self.run_locked(ctx, operation, scope).await;
        self.release(&token).await;
        result
    }

    async fn run_locked(
        &self,
        ctx: &mut InvocationContext,
        operation: Operation,
        scope: &SyncScope,
    ) -> Result<ScopeOutcome, EngineError> {
        let name = operation.name();

        match operation {
            Operation::Continue => {
                // Re-read under the lock; another invocation may have finished the scope
                let primary = self
                    .checkpoints
                    .load(ctx, &scope.id, CheckpointTrack::Primary)
                    .await?;
                let track = if !primary.completed {
                    CheckpointTrack::Primary
                } else {
                    let reconcile = self
                        .checkpoints
                        .load(ctx, &scope.id, CheckpointTrack::Reconcile)
                        .await?;
                    if reconcile.state() != ScopeState::InProgress {
                        self.skip(scope, name, SkipReason::AlreadyComplete).await;
                        return Ok(ScopeOutcome::Skipped(SkipReason::AlreadyComplete));
                    }
                    CheckpointTrack::Reconcile
                };
                let report = self.batch.run(ctx, scope, track, name).await?;
                Ok(ScopeOutcome::Synced(report))
            }
            Operation::Refresh => {
                let extension = self.extend(ctx, scope, name).await?;
                let report = self
                    .batch
                    .run(ctx, scope, CheckpointTrack::Primary, name)
                    .await?;
                Ok(ScopeOutcome::Refreshed { extension, report })
            }
            Operation::Discover => Ok(match self.extend(ctx, scope, name).await? {
                Some(extension) => ScopeOutcome::Extended(extension),
                None => ScopeOutcome::Unchanged,
            }),
            Operation::Reconcile => {
                let reconcile = self
                    .checkpoints
                    .load(ctx, &scope.id, CheckpointTrack::Reconcile)
                    .await?;
                if reconcile.completed {
                    debug!(scope = %scope.id, "Restarting completed reconcile track");
                    self.checkpoints
                        .reset(ctx, &scope.id, CheckpointTrack::Reconcile)
                        .await?;
                }
                let report = self
                    .batch
                    .run(ctx, scope, CheckpointTrack::Reconcile, name)
                    .await?;
                Ok(ScopeOutcome::Synced(report))
            }
            Operation::Snapshot => self.capture_snapshot(ctx, scope).await,
        }
    }

    /// Probe page 0 and grow the recorded size if upstream has more records
    async fn extend(
        &self,
        ctx: &mut InvocationContext,
        scope: &SyncScope,
        operation: &str,
    ) -> Result<Option<Extension>, EngineError> {
        let track = CheckpointTrack::Primary;
        let checkpoint = self.checkpoints.load(ctx, &scope.id, track).await?;
        if checkpoint.state() == ScopeState::NotStarted {
            debug!(scope = %scope.id, "Not started, nothing to extend");
            return Ok(None);
        }

        let page_size = self.batch.page_size();
        let probe = self.source.fetch_page(scope, 0, page_size).await?;
        let total_records = probe.total_count.ok_or_else(|| {
            SyncError::InvalidData(format!("probe of scope {} carries no total count", scope.id))
        })?;
        let probed_units = units_for(total_records, page_size);

        let grew = if checkpoint.total_records >= 0 {
            total_records as i64 > checkpoint.total_records
        } else {
            probed_units > checkpoint.total_units
        };
        if !grew {
            debug!(scope = %scope.id, total_records, "No new records");
            return Ok(None);
        }

        let extension = Extension {
            previous_records: checkpoint.total_records,
            total_records,
            previous_units: checkpoint.total_units,
            total_units: probed_units.max(checkpoint.total_units),
            reopened: checkpoint.completed,
        };

        // The last written page may have been partial; make the loop fetch it again
        if checkpoint.cursor >= checkpoint.total_units - 1 {
            self.checkpoints
                .set(ctx, &scope.id, &track.key(keys::TAIL_DIRTY), &true)
                .await?;
        }
        self.checkpoints
            .set(ctx, &scope.id, &track.key(keys::COMPLETED), &false)
            .await?;
        self.checkpoints
            .set(ctx, &scope.id, &track.key(keys::TOTAL_UNITS), &extension.total_units)
            .await?;
        // Written last: a crash before this point is rediscovered on the next probe
        self.checkpoints
            .set(
                ctx,
                &scope.id,
                &track.key(keys::TOTAL_RECORDS),
                &(total_records as i64),
            )
            .await?;

        let transition = if extension.reopened {
            " (COMPLETE→IN_PROGRESS)"
        } else {
            ""
        };
        self.oplog
            .record(
                StatusToken::Start,
                operation,
                Some(&scope.id),
                format!(
                    "extended from {} to {} records, {} to {} pages{}",
                    extension.previous_records,
                    extension.total_records,
                    extension.previous_units,
                    extension.total_units,
                    transition
                ),
            )
            .await;

        Ok(Some(extension))
    }

    async fn capture_snapshot(
        &self,
        ctx: &mut InvocationContext,
        scope: &SyncScope,
    ) -> Result<ScopeOutcome, EngineError> {
        let checkpoint = self
            .checkpoints
            .load(ctx, &scope.id, CheckpointTrack::Primary)
            .await?;
        let snapshot = Snapshot {
            scope_id: scope.id.clone(),
            captured_at: Utc::now(),
            row_count: self.db.count_rows(&scope.id).await?,
            cursor: checkpoint.cursor,
            total_units: checkpoint.total_units,
            completed: checkpoint.completed,
        };
        self.db.insert_snapshot(&snapshot).await?;

        self.oplog
            .record(
                StatusToken::Complete,
                Operation::Snapshot.name(),
                Some(&scope.id),
                format!(
                    "snapshot: {} rows at page {}/{}",
                    snapshot.row_count,
                    snapshot.cursor + 1,
                    snapshot.total_units
                ),
            )
            .await;
        Ok(ScopeOutcome::Captured(snapshot))
    }

    async fn skip(&self, scope: &SyncScope, operation: &str, reason: SkipReason) {
        self.oplog
            .record(StatusToken::Skip, operation, Some(&scope.id), reason.to_string())
            .await;
    }

    async fn release(&self, token: &crate::sync::lock::LockToken) {
        if let Err(e) = self.locks.release(token).await {
            warn!(lock = %token.name(), error = %e, "Failed to release lock; it lapses at its TTL");
        }
    }
}

/// Skip policy: decided from the checkpoint alone, before any lock or request
fn skip_reason(
    operation: Operation,
    scope: &SyncScope,
    state: ScopeState,
    reconcile_pending: bool,
) -> Option<SkipReason> {
    match operation {
        Operation::Continue => {
            (state == ScopeState::Complete && !reconcile_pending).then_some(SkipReason::AlreadyComplete)
        }
        Operation::Refresh => (scope.kind != ScopeKind::Current).then_some(SkipReason::NotCurrent),
        Operation::Discover => {
            if scope.is_frozen(state) {
                Some(SkipReason::Frozen)
            } else if state == ScopeState::NotStarted {
                Some(SkipReason::NotStarted)
            } else {
                None
            }
        }
        Operation::Snapshot | Operation::Reconcile => {
            scope.is_frozen(state).then_some(SkipReason::Frozen)
        }
    }
}
