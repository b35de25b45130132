//! pagesync - resumable paginated API sync into a shared tabular store
//!
//! This crate moves a large paginated remote dataset into a row store in
//! bounded, restartable batches, under a per-invocation time budget and
//! per-scope advisory locks.

pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod sync;
pub mod telemetry;
