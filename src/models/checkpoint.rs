//! Checkpoint model
//!
//! A checkpoint is the persisted progress marker of one scope on one track.
//! Values live in the settings area as strings; the typed view here is
//! produced by the checkpoint store's accessors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ScopeState;

/// Setting keys, relative to the track prefix
pub mod keys {
    /// Last written page, -1 when not started
    pub const CURSOR: &str = "cursor";
    /// Total pages, -1 when unknown
    pub const TOTAL_UNITS: &str = "total_units";
    /// Total records reported alongside total units
    pub const TOTAL_RECORDS: &str = "total_records";
    /// Completion flag
    pub const COMPLETED: &str = "completed";
    /// RFC 3339 timestamp of the last successful batch
    pub const LAST_SYNC: &str = "last_sync";
    /// Re-fetch the page at `cursor` before moving on
    pub const TAIL_DIRTY: &str = "tail_dirty";
}

/// Independent progress tracks kept for a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointTrack {
    /// Initial/incremental sync
    Primary,
    /// Weekly full reconciliation pass
    Reconcile,
}

impl CheckpointTrack {
    /// Fully-qualified setting key for this track
    pub fn key(&self, key: &str) -> String {
        match self {
            CheckpointTrack::Primary => key.to_string(),
            CheckpointTrack::Reconcile => format!("reconcile.{}", key),
        }
    }
}

impl std::fmt::Display for CheckpointTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointTrack::Primary => write!(f, "primary"),
            CheckpointTrack::Reconcile => write!(f, "reconcile"),
        }
    }
}

/// Per-scope progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Last persisted page (0-indexed), -1 = not started
    pub cursor: i64,
    /// Total pages, -1 = unknown
    pub total_units: i64,
    /// Total records, -1 = unknown
    pub total_records: i64,
    /// Completion flag
    pub completed: bool,
    /// Re-fetch the tail page on the next pass
    pub tail_dirty: bool,
    /// Last successful batch
    pub last_sync: Option<DateTime<Utc>>,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            cursor: -1,
            total_units: -1,
            total_records: -1,
            completed: false,
            tail_dirty: false,
            last_sync: None,
        }
    }
}

impl Checkpoint {
    /// State machine position
    pub fn state(&self) -> ScopeState {
        if self.completed {
            ScopeState::Complete
        } else if self.cursor < 0 {
            ScopeState::NotStarted
        } else {
            ScopeState::InProgress
        }
    }

    /// Whether the total has been learned
    pub fn total_known(&self) -> bool {
        self.total_units >= 0
    }

    /// First page the next pass should fetch
    pub fn next_page(&self) -> i64 {
        if self.tail_dirty && self.cursor >= 0 {
            self.cursor
        } else {
            self.cursor + 1
        }
    }

    /// completed ⇒ total known ∧ cursor = total - 1
    pub fn is_consistent(&self) -> bool {
        !self.completed || (self.total_known() && self.cursor == self.total_units - 1)
    }
}

/// One physical row of the settings area
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingEntry {
    /// Physical row id; stable for the lifetime of the row
    pub id: i64,
    /// Owning scope
    pub scope_id: String,
    /// Fully-qualified key
    pub key: String,
    /// Raw string value
    pub value: String,
}

/// Number of pages needed for `records` at `page_size`; an empty scope still has one page
pub fn units_for(records: u64, page_size: u32) -> i64 {
    let page_size = u64::from(page_size.max(1));
    records.div_ceil(page_size).max(1) as i64
}
