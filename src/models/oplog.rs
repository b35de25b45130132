//! Operational log and snapshot models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status tokens recognised by consumers of the operational log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusToken {
    /// Operation started for a scope
    Start,
    /// One page written
    Batch,
    /// Scope reached completion
    Complete,
    /// Budget exhausted before completion
    Paused,
    /// Scope skipped (policy or contention)
    Skip,
    /// Operation failed
    Error,
    /// HTTP request retried
    Retry,
}

impl std::fmt::Display for StatusToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StatusToken::Start => "START",
            StatusToken::Batch => "BATCH",
            StatusToken::Complete => "COMPLETE",
            StatusToken::Paused => "PAUSED",
            StatusToken::Skip => "SKIP",
            StatusToken::Error => "ERROR",
            StatusToken::Retry => "RETRY",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for StatusToken {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "START" => Ok(StatusToken::Start),
            "BATCH" => Ok(StatusToken::Batch),
            "COMPLETE" => Ok(StatusToken::Complete),
            "PAUSED" => Ok(StatusToken::Paused),
            "SKIP" => Ok(StatusToken::Skip),
            "ERROR" => Ok(StatusToken::Error),
            "RETRY" => Ok(StatusToken::Retry),
            _ => Err(format!("Invalid status token: {}", s)),
        }
    }
}

/// One row of the operational log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpLogEntry {
    /// Database id
    pub id: Option<i64>,
    /// When the event happened
    pub timestamp: DateTime<Utc>,
    /// Status token
    pub status: StatusToken,
    /// Operation name (continue, discover, ...)
    pub operation: String,
    /// Scope id, if the event concerns one
    pub scope_id: Option<String>,
    /// Free-form detail
    pub message: String,
}

impl OpLogEntry {
    /// Create an entry stamped now
    pub fn new(
        status: StatusToken,
        operation: impl Into<String>,
        scope_id: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            timestamp: Utc::now(),
            status,
            operation: operation.into(),
            scope_id: scope_id.map(String::from),
            message: message.into(),
        }
    }
}

/// Daily capture of a scope's row count and checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Scope id
    pub scope_id: String,
    /// Capture time
    pub captured_at: DateTime<Utc>,
    /// Rows in the row store for this scope
    pub row_count: u64,
    /// Primary cursor at capture time
    pub cursor: i64,
    /// Primary total units at capture time
    pub total_units: i64,
    /// Primary completion flag at capture time
    pub completed: bool,
}
