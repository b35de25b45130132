//! Per-invocation state
//!
//! One [`InvocationContext`] is created per entry-point call (CLI command or
//! daemon tick) and passed by `&mut` to everything that runs inside it. It
//! owns the wall-clock budget shared by all scopes of the invocation and the
//! checkpoint position cache.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::SyncConfig;
use crate::sync::checkpoint::PositionCache;

/// How an invocation was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationMode {
    /// Operator on demand: waits longer for locks and surfaces failures
    Interactive,
    /// Cadence tick: short lock wait, failures are logged only
    Scheduled,
}

impl InvocationMode {
    /// How long to wait for a scope lock
    pub fn lock_wait(&self, config: &SyncConfig) -> Duration {
        match self {
            InvocationMode::Interactive => Duration::from_millis(config.interactive_lock_wait_ms),
            InvocationMode::Scheduled => Duration::from_millis(config.scheduled_lock_wait_ms),
        }
    }
}

impl std::fmt::Display for InvocationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvocationMode::Interactive => write!(f, "interactive"),
            InvocationMode::Scheduled => write!(f, "scheduled"),
        }
    }
}

/// State scoped to one invocation
#[derive(Debug)]
pub struct InvocationContext {
    mode: InvocationMode,
    started: Instant,
    budget: Duration,
    pub(crate) positions: PositionCache,
}

impl InvocationContext {
    /// Start an invocation now
    pub fn new(mode: InvocationMode, budget: Duration) -> Self {
        Self {
            mode,
            started: Instant::now(),
            budget,
            positions: PositionCache::default(),
        }
    }

    /// Invocation mode
    pub fn mode(&self) -> InvocationMode {
        self.mode
    }

    /// Time since the invocation started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Budget left, zero once exhausted
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    /// Whether the shared budget is spent
    pub fn budget_exhausted(&self) -> bool {
        self.elapsed() >= self.budget
    }

    /// Number of full settings scans performed so far
    pub fn settings_scans(&self) -> u32 {
        self.positions.scans()
    }
}
