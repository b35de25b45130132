//! Database layer for pagesync
//!
//! This module defines the control-plane store trait and its SQLite implementation.

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteDatabase;

use async_trait::async_trait;

use crate::error::DbError;
use crate::models::{LockLease, OpLogEntry, Row, SettingEntry, Snapshot};

/// Database trait for the shared control-plane store
///
/// This trait defines all store operations needed by the engine.
/// It uses `async_trait` for async methods and `mockall::automock` for testing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Database: Send + Sync {
    // =========================================================================
    // Settings operations
    // =========================================================================

    /// Scan the whole settings area in physical order
    async fn scan_settings(&self) -> Result<Vec<SettingEntry>, DbError>;

    /// Find a setting by key
    async fn find_setting(&self, scope_id: &str, key: &str)
        -> Result<Option<SettingEntry>, DbError>;

    /// Read the value at a physical row
    ///
    /// Returns None if the row no longer exists
    async fn read_setting_at(&self, id: i64) -> Result<Option<String>, DbError>;

    /// Overwrite the value at a physical row
    ///
    /// Returns false if the row no longer exists
    async fn write_setting_at(&self, id: i64, value: &str) -> Result<bool, DbError>;

    /// Insert (or overwrite) a setting by key
    ///
    /// Returns the physical row id
    async fn upsert_setting(&self, scope_id: &str, key: &str, value: &str)
        -> Result<i64, DbError>;

    // =========================================================================
    // Row store operations
    // =========================================================================

    /// Write a batch of rows in one transaction, keyed by record id
    ///
    /// Returns the number of rows written
    async fn upsert_rows(&self, scope_id: &str, rows: &[Row]) -> Result<u64, DbError>;

    /// List rows of a scope in first-insertion order
    async fn list_rows(&self, scope_id: &str) -> Result<Vec<Row>, DbError>;

    /// Count rows of a scope
    async fn count_rows(&self, scope_id: &str) -> Result<u64, DbError>;

    // =========================================================================
    // Lock operations
    // =========================================================================

    /// Take a lock if it is free or its previous lease expired
    async fn try_acquire_lock(&self, lease: &LockLease) -> Result<bool, DbError>;

    /// Release a lock held under `token`
    ///
    /// Returns false if the lock was not held under this token
    async fn release_lock(&self, name: &str, token: &str) -> Result<bool, DbError>;

    /// Get the current lease for a name, expired or not
    async fn get_lock(&self, name: &str) -> Result<Option<LockLease>, DbError>;

    // =========================================================================
    // Operational log
    // =========================================================================

    /// Append an entry
    ///
    /// Returns the ID of the inserted entry
    async fn append_log(&self, entry: &OpLogEntry) -> Result<i64, DbError>;

    /// Most recent entries, newest first
    async fn recent_logs(&self, limit: u32) -> Result<Vec<OpLogEntry>, DbError>;

    /// Most recent entries for a scope, newest first
    async fn logs_for_scope(&self, scope_id: &str, limit: u32)
        -> Result<Vec<OpLogEntry>, DbError>;

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Record a snapshot
    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<(), DbError>;

    /// List snapshots of a scope, oldest first
    async fn list_snapshots(&self, scope_id: &str) -> Result<Vec<Snapshot>, DbError>;
}
