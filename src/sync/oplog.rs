//! Operational log
//!
//! Every status-token event goes to two places: the `ops_log` table, which is
//! what operators read, and a `tracing` event carrying the same fields.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::database::Database;
use crate::models::{OpLogEntry, StatusToken};

/// Writer for status-token events
#[derive(Clone)]
pub struct OperationLog {
    db: Arc<dyn Database>,
}

impl OperationLog {
    /// Create a log on top of the store
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Record one event
    ///
    /// A failing store write is reported through tracing only; logging never
    /// aborts the operation being logged.
    pub async fn record(
        &self,
        status: StatusToken,
        operation: &str,
        scope_id: Option<&str>,
        message: impl Into<String>,
    ) {
        let entry = OpLogEntry::new(status, operation, scope_id, message);
        let scope = entry.scope_id.as_deref().unwrap_or("-");

        match status {
            StatusToken::Error => {
                error!(status = %status, operation, scope, message = %entry.message, "ops")
            }
            StatusToken::Retry | StatusToken::Paused => {
                warn!(status = %status, operation, scope, message = %entry.message, "ops")
            }
            _ => info!(status = %status, operation, scope, message = %entry.message, "ops"),
        }

        if let Err(e) = self.db.append_log(&entry).await {
            warn!(error = %e, status = %status, operation, "Failed to append to ops log");
        }
    }

    /// Underlying store
    pub fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }
}

impl std::fmt::Debug for OperationLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationLog").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MockDatabase, SqliteDatabase};
    use crate::error::DbError;

    // Test 1: Events land in the ops_log table
    #[tokio::test]
    async fn test_record_appends_to_store() {
        let db = Arc::new(SqliteDatabase::in_memory().await.unwrap());
        let log = OperationLog::new(db.clone());

        log.record(StatusToken::Start, "continue", Some("s1"), "page 0")
            .await;
        log.record(StatusToken::Skip, "discover", None, "nothing to do")
            .await;

        let entries = db.recent_logs(10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, StatusToken::Skip);
        assert!(entries[0].scope_id.is_none());
        assert_eq!(entries[1].message, "page 0");
    }

    // Test 2: Store failures are swallowed
    #[tokio::test]
    async fn test_record_survives_store_failure() {
        let mut mock = MockDatabase::new();
        mock.expect_append_log()
            .times(1)
            .returning(|_| Err(DbError::Migration("read-only".to_string())));

        let log = OperationLog::new(Arc::new(mock));
        log.record(StatusToken::Error, "continue", Some("s1"), "boom")
            .await;
    }
}
