//! Application error types for pagesync
//!
//! This module defines common error types used throughout the application.
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Remote API errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// Network timeout
    #[error("Network timeout")]
    NetworkTimeout,

    /// Connection refused
    #[error("Connection refused")]
    ConnectionRefused,

    /// Rate limited by upstream
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Upstream temporarily unavailable (502/503/504)
    #[error("Service unavailable: HTTP {0}")]
    ServiceUnavailable(u16),

    /// Any other non-2xx status
    #[error("HTTP {status}: {body}")]
    Status {
        /// Status code
        status: u16,
        /// Response body, possibly truncated
        body: String,
    },

    /// Invalid data received
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Generic network error
    #[error("Network error: {0}")]
    Network(String),

    /// Retry budget exhausted; carries the last failure
    #[error("Giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Total number of attempts made
        attempts: u32,
        /// The failure observed on the final attempt
        last: Box<SyncError>,
    },
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Error from the async connection wrapper
    #[error("Database connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    /// Schema newer than this build understands
    #[error("Migration error: {0}")]
    Migration(String),

    /// Stored value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors raised while driving a scope through the batch loop
#[derive(Debug, Error)]
pub enum EngineError {
    /// Remote API failure (already retried by the client where applicable)
    #[error("Remote error: {0}")]
    Sync(#[from] SyncError),

    /// Store failure
    #[error("Store error: {0}")]
    Database(#[from] DbError),

    /// A transformed row does not match the declared row width
    #[error(
        "Row width mismatch in scope {scope} (record {record_id}): expected {expected} cells, got {actual}"
    )]
    RowWidthMismatch {
        /// Scope being synced
        scope: String,
        /// Offending record
        record_id: String,
        /// Declared width
        expected: usize,
        /// Width actually produced
        actual: usize,
    },
}

impl EngineError {
    /// Structural errors indicate a transform defect and must never be retried
    pub fn is_structural(&self) -> bool {
        matches!(self, EngineError::RowWidthMismatch { .. })
    }
}

/// Application-level error type
///
/// This is the main error type used throughout the application.
/// It aggregates all domain-specific error types.
#[derive(Debug, Error)]
pub enum AppError {
    /// Sync error
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Scope id not present in the registry
    #[error("Unknown scope: {0}")]
    UnknownScope(String),

    /// Lock held by another invocation (interactive callers only)
    #[error("Busy: {0} is locked by another invocation")]
    Busy(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Trait for determining if an error is retryable
pub trait RetryableError {
    /// Returns true if the error is retryable
    fn is_retryable(&self) -> bool;

    /// Convert the last failure into the terminal error reported once the
    /// retry budget is spent
    fn exhausted(self, _attempts: u32) -> Self
    where
        Self: Sized,
    {
        self
    }
}

impl RetryableError for SyncError {
    fn is_retryable(&self) -> bool {
        match self {
            // Retryable errors
            SyncError::NetworkTimeout => true,
            SyncError::ConnectionRefused => true,
            SyncError::RateLimited(_) => true,
            SyncError::ServiceUnavailable(_) => true,
            SyncError::Network(_) => true,

            // Non-retryable errors
            SyncError::Status { .. } => false,
            SyncError::InvalidData(_) => false,
            SyncError::RetriesExhausted { .. } => false,
        }
    }

    fn exhausted(self, attempts: u32) -> Self {
        SyncError::RetriesExhausted {
            attempts,
            last: Box::new(self),
        }
    }
}
