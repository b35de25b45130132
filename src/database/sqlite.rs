//! SQLite implementation of the Database trait
//!
//! This module provides a SQLite-based implementation of the Database trait
//! using rusqlite and tokio-rusqlite for async operations.
//!
//! Several invocations may open the same file at once; every connection is
//! given a busy timeout so that short write transactions queue instead of
//! failing with `SQLITE_BUSY`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, TransactionBehavior};
use tokio_rusqlite::Connection;

use super::migrations::{migration_version, CREATE_SCHEMA};
use super::Database;
use crate::error::DbError;
use crate::models::{LockLease, OpLogEntry, Row, SettingEntry, Snapshot, StatusToken};

/// How long a connection waits on another connection's write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite database implementation
pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    /// Create a new SQLite database connection
    ///
    /// Use `:memory:` for in-memory database or a file path for persistent storage.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let conn = Connection::open(path).await?;

        let version: i32 = conn
            .call(|conn| {
                conn.busy_timeout(BUSY_TIMEOUT)?;
                let version = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
                Ok(version)
            })
            .await?;
        if version > migration_version() {
            return Err(DbError::Migration(format!(
                "schema version {} is newer than supported version {}",
                version,
                migration_version()
            )));
        }

        // Run migrations
        conn.call(|conn| {
            conn.execute_batch(CREATE_SCHEMA)?;
            conn.pragma_update(None, "user_version", migration_version())?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Create a new in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self, DbError> {
        Self::new(":memory:").await
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    // =========================================================================
    // Settings operations
    // =========================================================================

    async fn scan_settings(&self) -> Result<Vec<SettingEntry>, DbError> {
        self.conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, scope_id, key, value FROM settings ORDER BY id")?;

                let entries = stmt
                    .query_map([], |row| {
                        Ok(SettingEntry {
                            id: row.get(0)?,
                            scope_id: row.get(1)?,
                            key: row.get(2)?,
                            value: row.get(3)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(entries)
            })
            .await
            .map_err(Into::into)
    }

    async fn find_setting(
        &self,
        scope_id: &str,
        key: &str,
    ) -> Result<Option<SettingEntry>, DbError> {
        let scope_id = scope_id.to_string();
        let key = key.to_string();

        self.conn
            .call(move |conn| {
                let entry = conn
                    .query_row(
                        "SELECT id, scope_id, key, value FROM settings WHERE scope_id = ?1 AND key = ?2",
                        [&scope_id, &key],
                        |row| {
                            Ok(SettingEntry {
                                id: row.get(0)?,
                                scope_id: row.get(1)?,
                                key: row.get(2)?,
                                value: row.get(3)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(entry)
            })
            .await
            .map_err(Into::into)
    }

    async fn read_setting_at(&self, id: i64) -> Result<Option<String>, DbError> {
        self.conn
            .call(move |conn| {
                let value = conn
                    .query_row("SELECT value FROM settings WHERE id = ?1", [id], |row| {
                        row.get::<_, String>(0)
                    })
                    .optional()?;
                Ok(value)
            })
            .await
            .map_err(Into::into)
    }

    async fn write_setting_at(&self, id: i64, value: &str) -> Result<bool, DbError> {
        let value = value.to_string();
        let updated_at = Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE settings SET value = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![value, updated_at, id],
                )?;
                Ok(changed == 1)
            })
            .await
            .map_err(Into::into)
    }

    async fn upsert_setting(
        &self,
        scope_id: &str,
        key: &str,
        value: &str,
    ) -> Result<i64, DbError> {
        let scope_id = scope_id.to_string();
        let key = key.to_string();
        let value = value.to_string();
        let updated_at = Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO settings (scope_id, key, value, updated_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(scope_id, key) DO UPDATE SET
                        value = excluded.value,
                        updated_at = excluded.updated_at
                    "#,
                    rusqlite::params![scope_id, key, value, updated_at],
                )?;

                let id = conn.query_row(
                    "SELECT id FROM settings WHERE scope_id = ?1 AND key = ?2",
                    rusqlite::params![scope_id, key],
                    |row| row.get(0),
                )?;
                Ok(id)
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Row store operations
    // =========================================================================

    async fn upsert_rows(&self, scope_id: &str, rows: &[Row]) -> Result<u64, DbError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let scope_id = scope_id.to_string();
        let written_at = Utc::now().to_rfc3339();
        let encoded = rows
            .iter()
            .map(|r| {
                serde_json::to_string(&r.cells)
                    .map(|cells| (r.record_id.clone(), r.width() as i64, cells))
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DbError::Serialization(e.to_string()))?;

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut count = 0u64;
                {
                    let mut stmt = tx.prepare(
                        r#"
                        INSERT INTO sync_rows (scope_id, record_id, width, cells, written_at)
                        VALUES (?1, ?2, ?3, ?4, ?5)
                        ON CONFLICT(scope_id, record_id) DO UPDATE SET
                            width = excluded.width,
                            cells = excluded.cells,
                            written_at = excluded.written_at
                        "#,
                    )?;
                    for (record_id, width, cells) in &encoded {
                        count += stmt.execute(rusqlite::params![
                            scope_id, record_id, width, cells, written_at
                        ])? as u64;
                    }
                }
                tx.commit()?;
                Ok(count)
            })
            .await
            .map_err(Into::into)
    }

    async fn list_rows(&self, scope_id: &str) -> Result<Vec<Row>, DbError> {
        let scope_id = scope_id.to_string();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT record_id, cells FROM sync_rows WHERE scope_id = ?1 ORDER BY rowid",
                )?;

                let rows = stmt
                    .query_map([&scope_id], |row| {
                        let record_id: String = row.get(0)?;
                        let cells: String = row.get(1)?;
                        let cells: Vec<String> = serde_json::from_str(&cells).map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(
                                1,
                                rusqlite::types::Type::Text,
                                Box::new(e),
                            )
                        })?;
                        Ok(Row::new(record_id, cells))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(rows)
            })
            .await
            .map_err(Into::into)
    }

    async fn count_rows(&self, scope_id: &str) -> Result<u64, DbError> {
        let scope_id = scope_id.to_string();

        self.conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM sync_rows WHERE scope_id = ?1",
                    [&scope_id],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Lock operations
    // =========================================================================

    async fn try_acquire_lock(&self, lease: &LockLease) -> Result<bool, DbError> {
        let name = lease.name.clone();
        let token = lease.token.clone();
        let holder = lease.holder.clone();
        let acquired_at = lease.acquired_at.timestamp_millis();
        let expires_at = lease.expires_at.timestamp_millis();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                // A lapsed lease is dropped in the same transaction that takes over
                tx.execute(
                    "DELETE FROM sync_locks WHERE name = ?1 AND expires_at <= ?2",
                    rusqlite::params![name, acquired_at],
                )?;
                let inserted = tx.execute(
                    r#"
                    INSERT OR IGNORE INTO sync_locks (name, token, holder, acquired_at, expires_at)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                    rusqlite::params![name, token, holder, acquired_at, expires_at],
                )?;

                tx.commit()?;
                Ok(inserted == 1)
            })
            .await
            .map_err(Into::into)
    }

    async fn release_lock(&self, name: &str, token: &str) -> Result<bool, DbError> {
        let name = name.to_string();
        let token = token.to_string();

        self.conn
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM sync_locks WHERE name = ?1 AND token = ?2",
                    [&name, &token],
                )?;
                Ok(deleted == 1)
            })
            .await
            .map_err(Into::into)
    }

    async fn get_lock(&self, name: &str) -> Result<Option<LockLease>, DbError> {
        let name = name.to_string();

        self.conn
            .call(move |conn| {
                let lease = conn
                    .query_row(
                        r#"
                        SELECT name, token, holder, acquired_at, expires_at
                        FROM sync_locks WHERE name = ?1
                        "#,
                        [&name],
                        |row| {
                            Ok(LockLease {
                                name: row.get(0)?,
                                token: row.get(1)?,
                                holder: row.get(2)?,
                                acquired_at: from_millis(row.get(3)?),
                                expires_at: from_millis(row.get(4)?),
                            })
                        },
                    )
                    .optional()?;
                Ok(lease)
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Operational log
    // =========================================================================

    async fn append_log(&self, entry: &OpLogEntry) -> Result<i64, DbError> {
        let timestamp = entry.timestamp.to_rfc3339();
        let status = entry.status.to_string();
        let operation = entry.operation.clone();
        let scope_id = entry.scope_id.clone();
        let message = entry.message.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO ops_log (timestamp, status, operation, scope_id, message)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                    rusqlite::params![timestamp, status, operation, scope_id, message],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(Into::into)
    }

    async fn recent_logs(&self, limit: u32) -> Result<Vec<OpLogEntry>, DbError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, timestamp, status, operation, scope_id, message
                    FROM ops_log
                    ORDER BY id DESC
                    LIMIT ?1
                    "#,
                )?;

                let entries = stmt
                    .query_map([limit], map_log_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(entries)
            })
            .await
            .map_err(Into::into)
    }

    async fn logs_for_scope(
        &self,
        scope_id: &str,
        limit: u32,
    ) -> Result<Vec<OpLogEntry>, DbError> {
        let scope_id = scope_id.to_string();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, timestamp, status, operation, scope_id, message
                    FROM ops_log
                    WHERE scope_id = ?1
                    ORDER BY id DESC
                    LIMIT ?2
                    "#,
                )?;

                let entries = stmt
                    .query_map(rusqlite::params![scope_id, limit], map_log_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(entries)
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<(), DbError> {
        let scope_id = snapshot.scope_id.clone();
        let captured_at = snapshot.captured_at.to_rfc3339();
        let row_count = snapshot.row_count as i64;
        let cursor = snapshot.cursor;
        let total_units = snapshot.total_units;
        let completed = snapshot.completed;

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO snapshots
                    (scope_id, captured_at, row_count, cursor, total_units, completed)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                    rusqlite::params![
                        scope_id,
                        captured_at,
                        row_count,
                        cursor,
                        total_units,
                        completed
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    async fn list_snapshots(&self, scope_id: &str) -> Result<Vec<Snapshot>, DbError> {
        let scope_id = scope_id.to_string();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT scope_id, captured_at, row_count, cursor, total_units, completed
                    FROM snapshots
                    WHERE scope_id = ?1
                    ORDER BY id
                    "#,
                )?;

                let snapshots = stmt
                    .query_map([&scope_id], |row| {
                        Ok(Snapshot {
                            scope_id: row.get(0)?,
                            captured_at: parse_datetime(row.get::<_, Option<String>>(1)?)
                                .unwrap_or_else(Utc::now),
                            row_count: row.get::<_, i64>(2)? as u64,
                            cursor: row.get(3)?,
                            total_units: row.get(4)?,
                            completed: row.get(5)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(snapshots)
            })
            .await
            .map_err(Into::into)
    }
}

/// Map an `ops_log` row
fn map_log_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OpLogEntry> {
    Ok(OpLogEntry {
        id: Some(row.get(0)?),
        timestamp: parse_datetime(row.get::<_, Option<String>>(1)?).unwrap_or_else(Utc::now),
        status: row
            .get::<_, String>(2)?
            .parse()
            .unwrap_or(StatusToken::Error),
        operation: row.get(3)?,
        scope_id: row.get(4)?,
        message: row.get(5)?,
    })
}

/// Helper function to parse datetime strings from SQLite
fn parse_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| {
                // Try parsing SQLite's datetime format
                chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|dt| dt.and_utc())
            })
    })
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
