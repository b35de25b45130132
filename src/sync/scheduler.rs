//! Cadence scheduler for daemon mode
//!
//! Each named operation fires on its own interval with random jitter so
//! that co-scheduled operations do not hit the API at the same instant.
//! Every tick is a scheduled-mode invocation wrapped in a hard timeout equal
//! to the execution ceiling; a tick that overruns it is abandoned and its
//! scope lock lapses at its TTL.

use crate::config::Config;
use crate::error::AppError;
use crate::sync::context::InvocationMode;
use crate::sync::dispatcher::{DispatchReport, Dispatcher, Operation, ScopeOutcome};
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Initial delay before the first tick (seconds)
    pub initial_delay_secs: u64,
    /// Jitter range (seconds) added to every tick
    pub jitter_secs: u64,
    /// Hard limit on one tick (seconds)
    pub run_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 5,
            jitter_secs: 30,
            run_timeout_secs: 360,
        }
    }
}

impl SchedulerConfig {
    /// Take delays from `schedule` and the timeout from the sync ceiling
    pub fn from_config(config: &Config) -> Self {
        Self {
            initial_delay_secs: config.schedule.initial_delay_secs,
            jitter_secs: config.schedule.jitter_secs,
            run_timeout_secs: config.sync.ceiling_secs,
        }
    }
}

/// An operation and how often it fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cadence {
    /// Operation to run
    pub operation: Operation,
    /// Interval between ticks
    pub interval: Duration,
    /// Fire once immediately after the initial delay
    pub run_on_start: bool,
}

impl Cadence {
    /// Reference cadences from the schedule section
    pub fn from_config(config: &Config) -> Vec<Cadence> {
        let s = &config.schedule;
        vec![
            Cadence {
                operation: Operation::Continue,
                interval: Duration::from_secs(s.continue_secs),
                run_on_start: true,
            },
            Cadence {
                operation: Operation::Refresh,
                interval: Duration::from_secs(s.refresh_secs),
                run_on_start: false,
            },
            Cadence {
                operation: Operation::Discover,
                interval: Duration::from_secs(s.discover_secs),
                run_on_start: false,
            },
            Cadence {
                operation: Operation::Snapshot,
                interval: Duration::from_secs(s.snapshot_secs),
                run_on_start: false,
            },
            Cadence {
                operation: Operation::Reconcile,
                interval: Duration::from_secs(s.reconcile_secs),
                run_on_start: false,
            },
        ]
    }
}

/// Summary of one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickResult {
    /// Scopes selected
    pub scopes: usize,
    /// Scopes worked on
    pub worked: usize,
    /// Scopes skipped by policy, contention or budget
    pub skipped: usize,
    /// Scopes that failed
    pub failed: usize,
}

impl From<&DispatchReport> for TickResult {
    fn from(report: &DispatchReport) -> Self {
        let mut result = TickResult {
            scopes: report.results.len(),
            ..Default::default()
        };
        for r in &report.results {
            match r.outcome {
                ScopeOutcome::Skipped(_) => result.skipped += 1,
                ScopeOutcome::Failed(_) => result.failed += 1,
                _ => result.worked += 1,
            }
        }
        result
    }
}

/// Status of one cadence
#[derive(Debug, Clone, Default)]
pub struct TickStatus {
    /// Last tick end time
    pub last_run: Option<std::time::SystemTime>,
    /// Last tick result
    pub last_result: Option<Result<TickResult, String>>,
    /// Next tick estimate
    pub next_run: Option<std::time::SystemTime>,
    /// Whether a tick is running
    pub in_progress: bool,
    /// Ticks run so far
    pub runs: u64,
}

/// Something that can run a named operation as a scheduled invocation
#[async_trait]
pub trait OperationRunner: Send + Sync {
    /// Run `operation` over all scopes
    async fn run_operation(&self, operation: Operation) -> Result<TickResult, AppError>;
}

#[async_trait]
impl OperationRunner for Dispatcher {
    async fn run_operation(&self, operation: Operation) -> Result<TickResult, AppError> {
        let report = self.run(operation, InvocationMode::Scheduled, None).await?;
        Ok(TickResult::from(&report))
    }
}

/// Manual trigger request
struct ManualTriggerRequest {
    operation: Operation,
    response: mpsc::Sender<Result<TickResult, AppError>>,
}

/// Cadence scheduler
///
/// One task per cadence; all of them stop on the shutdown broadcast.
pub struct SyncScheduler {
    config: SchedulerConfig,
    runner: Arc<dyn OperationRunner>,
    cadences: Vec<Cadence>,
    status: Arc<RwLock<HashMap<Operation, TickStatus>>>,
    shutdown_rx: broadcast::Receiver<()>,
    manual_rx: mpsc::Receiver<ManualTriggerRequest>,
    manual_tx: mpsc::Sender<ManualTriggerRequest>,
}

impl SyncScheduler {
    /// Create a scheduler
    ///
    /// # Arguments
    ///
    /// * `config` - Delays and timeout
    /// * `runner` - Runs each operation
    /// * `cadences` - Operations and their intervals
    /// * `shutdown_rx` - Broadcast receiver for the shutdown signal
    pub fn new(
        config: SchedulerConfig,
        runner: Arc<dyn OperationRunner>,
        cadences: Vec<Cadence>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let (manual_tx, manual_rx) = mpsc::channel(32);

        let status = cadences
            .iter()
            .map(|c| (c.operation, TickStatus::default()))
            .collect();

        Self {
            config,
            runner,
            cadences,
            status: Arc::new(RwLock::new(status)),
            shutdown_rx,
            manual_rx,
            manual_tx,
        }
    }

    /// Get a handle for triggering operations out of cadence
    pub fn manual_trigger_handle(&self) -> ManualTriggerHandle {
        ManualTriggerHandle {
            tx: self.manual_tx.clone(),
        }
    }

    /// Current status per cadence
    pub async fn get_status(&self) -> HashMap<Operation, TickStatus> {
        self.status.read().await.clone()
    }

    /// Run until the shutdown signal
    pub async fn run(mut self) {
        info!(cadences = self.cadences.len(), "Starting scheduler");

        if self.config.initial_delay_secs > 0 {
            debug!(
                delay_secs = self.config.initial_delay_secs,
                "Waiting for initial delay"
            );
            tokio::time::sleep(Duration::from_secs(self.config.initial_delay_secs)).await;
        }

        let mut handles = Vec::new();
        let (task_shutdown_tx, _) = broadcast::channel::<()>(1);

        for cadence in &self.cadences {
            let cadence = cadence.clone();
            let runner = self.runner.clone();
            let status = self.status.clone();
            let config = self.config.clone();
            let task_shutdown_rx = task_shutdown_tx.subscribe();

            let handle = tokio::spawn(async move {
                Self::run_cadence(cadence, runner, status, config, task_shutdown_rx).await;
            });
            handles.push(handle);
        }

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping scheduler");
                    let _ = task_shutdown_tx.send(());
                    break;
                }
                Some(request) = self.manual_rx.recv() => {
                    self.handle_manual_trigger(request).await;
                }
            }
        }

        for handle in handles {
            let _ = handle.await;
        }

        info!("Scheduler stopped");
    }

    async fn run_cadence(
        cadence: Cadence,
        runner: Arc<dyn OperationRunner>,
        status: Arc<RwLock<HashMap<Operation, TickStatus>>>,
        config: SchedulerConfig,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let operation = cadence.operation;

        if cadence.run_on_start {
            info!(operation = %operation, "Running initial tick");
            Self::perform_tick(operation, &runner, &status, &config, cadence.interval).await;
        }

        let first_jitter = jitter(config.jitter_secs);
        let first = Instant::now() + cadence.interval + first_jitter;
        debug!(
            operation = %operation,
            interval_secs = cadence.interval.as_secs(),
            jitter_secs = first_jitter.as_secs(),
            "Scheduled next tick"
        );

        let mut timer = interval_at(first, cadence.interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!(operation = %operation, "Cadence task shutting down");
                    break;
                }
                _ = timer.tick() => {
                    let delay = jitter(config.jitter_secs);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }

                    info!(operation = %operation, "Running scheduled tick");
                    Self::perform_tick(operation, &runner, &status, &config, cadence.interval).await;
                }
            }
        }
    }

    async fn perform_tick(
        operation: Operation,
        runner: &Arc<dyn OperationRunner>,
        status: &Arc<RwLock<HashMap<Operation, TickStatus>>>,
        config: &SchedulerConfig,
        interval: Duration,
    ) {
        {
            let mut status_map = status.write().await;
            if let Some(s) = status_map.get_mut(&operation) {
                s.in_progress = true;
            }
        }

        let result = tokio::time::timeout(
            Duration::from_secs(config.run_timeout_secs),
            runner.run_operation(operation),
        )
        .await;

        let mut status_map = status.write().await;
        let s = status_map.entry(operation).or_default();
        s.in_progress = false;
        s.runs += 1;
        s.last_run = Some(std::time::SystemTime::now());

        match result {
            Ok(Ok(tick)) => {
                info!(
                    operation = %operation,
                    scopes = tick.scopes,
                    worked = tick.worked,
                    skipped = tick.skipped,
                    failed = tick.failed,
                    "Tick completed"
                );
                s.last_result = Some(Ok(tick));
            }
            Ok(Err(err)) => {
                warn!(operation = %operation, error = %err, "Tick failed");
                s.last_result = Some(Err(err.to_string()));
            }
            Err(_) => {
                error!(
                    operation = %operation,
                    timeout_secs = config.run_timeout_secs,
                    "Tick timed out"
                );
                s.last_result = Some(Err("Tick timed out".to_string()));
            }
        }

        s.next_run = Some(std::time::SystemTime::now() + interval);
    }

    async fn handle_manual_trigger(&self, request: ManualTriggerRequest) {
        let Some(cadence) = self
            .cadences
            .iter()
            .find(|c| c.operation == request.operation)
        else {
            warn!(operation = %request.operation, "Manual trigger for unscheduled operation");
            let _ = request
                .response
                .send(Err(AppError::Internal(format!(
                    "{} is not scheduled",
                    request.operation
                ))))
                .await;
            return;
        };

        info!(operation = %cadence.operation, "Manual tick triggered");
        Self::perform_tick(
            cadence.operation,
            &self.runner,
            &self.status,
            &self.config,
            cadence.interval,
        )
        .await;

        let status_map = self.status.read().await;
        let result = match status_map.get(&cadence.operation).and_then(|s| s.last_result.clone()) {
            Some(Ok(tick)) => Ok(tick),
            Some(Err(e)) => Err(AppError::Internal(e)),
            None => Err(AppError::Internal("No result available".to_string())),
        };
        let _ = request.response.send(result).await;
    }
}

fn jitter(jitter_secs: u64) -> Duration {
    if jitter_secs > 0 {
        Duration::from_secs(rand::thread_rng().gen_range(0..jitter_secs))
    } else {
        Duration::ZERO
    }
}

/// Handle for running an operation out of cadence
#[derive(Clone)]
pub struct ManualTriggerHandle {
    tx: mpsc::Sender<ManualTriggerRequest>,
}

impl ManualTriggerHandle {
    /// Run `operation` now and wait for its result
    pub async fn trigger(&self, operation: Operation) -> Result<TickResult, AppError> {
        let (response_tx, mut response_rx) = mpsc::channel(1);

        self.tx
            .send(ManualTriggerRequest {
                operation,
                response: response_tx,
            })
            .await
            .map_err(|_| AppError::Internal("Scheduler not running".to_string()))?;

        response_rx
            .recv()
            .await
            .ok_or_else(|| AppError::Internal("No response from scheduler".to_string()))?
    }
}
