//! Domain models for pagesync
//!
//! This module contains the core domain models used throughout the application.

pub mod checkpoint;
pub mod lock;
pub mod oplog;
pub mod row;
pub mod scope;

// Re-export commonly used types
pub use checkpoint::{keys, units_for, Checkpoint, CheckpointTrack, SettingEntry};
pub use lock::LockLease;
pub use oplog::{OpLogEntry, Snapshot, StatusToken};
pub use row::{ColumnSource, Row, RowSchema};
pub use scope::{ScopeKind, ScopeRegistry, ScopeState, SyncScope};
