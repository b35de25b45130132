//! Database migrations for pagesync
//!
//! This module contains SQL migrations for the SQLite database schema.
//! Every value that belongs to the human-editable control plane is TEXT.

/// SQL statement to create the initial database schema
pub const CREATE_SCHEMA: &str = r#"
-- Key/value settings area; doubles as the checkpoint store
CREATE TABLE IF NOT EXISTS settings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scope_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL DEFAULT '',
    updated_at TEXT,
    UNIQUE(scope_id, key)
);

-- Row store; one row per (scope, record)
CREATE TABLE IF NOT EXISTS sync_rows (
    scope_id TEXT NOT NULL,
    record_id TEXT NOT NULL,
    width INTEGER NOT NULL,
    cells TEXT NOT NULL,
    written_at TEXT NOT NULL,
    PRIMARY KEY (scope_id, record_id)
);

-- Advisory locks with TTL (unix millis)
CREATE TABLE IF NOT EXISTS sync_locks (
    name TEXT PRIMARY KEY,
    token TEXT NOT NULL,
    holder TEXT NOT NULL DEFAULT '',
    acquired_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

-- Append-only operational log
CREATE TABLE IF NOT EXISTS ops_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    status TEXT NOT NULL,
    operation TEXT NOT NULL,
    scope_id TEXT,
    message TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_ops_log_scope ON ops_log(scope_id, id);

-- Daily snapshots
CREATE TABLE IF NOT EXISTS snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scope_id TEXT NOT NULL,
    captured_at TEXT NOT NULL,
    row_count INTEGER NOT NULL,
    cursor INTEGER NOT NULL,
    total_units INTEGER NOT NULL,
    completed INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_snapshots_scope ON snapshots(scope_id, captured_at);
"#;

/// Get the migration version
pub fn migration_version() -> i32 {
    1
}
