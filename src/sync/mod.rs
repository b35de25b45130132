//! Sync engine
//!
//! Moves a paginated remote dataset into the row store, one scope at a time,
//! resuming from persisted checkpoints across short-lived invocations.
//!
//! # Components
//!
//! - [`retry`]: Retry manager with exponential backoff for transient failures
//! - [`http_client`]: API client wrapping every request in the retry manager
//! - [`source`]: The page source seam between the loop and the API
//! - [`transform`] / [`writer`]: Record → row conversion and bulk row writes
//! - [`checkpoint`]: Typed access to per-scope checkpoint settings
//! - [`lock`]: TTL-bounded advisory locks, one per scope
//! - [`oplog`]: Status-token operational log
//! - [`batch`]: The resumable fetch → transform → write loop
//! - [`dispatcher`]: Named operations, skip policy and lock handling
//! - [`scheduler`]: Cadence scheduler for daemon mode
//!
//! # Example
//!
//! ```ignore
//! use pagesync::sync::{Dispatcher, InvocationMode, Operation};
//!
//! let dispatcher = Dispatcher::new(registry, db, source, transformer, &config);
//! let report = dispatcher
//!     .run(Operation::Continue, InvocationMode::Scheduled, None)
//!     .await?;
//! ```

pub mod batch;
pub mod checkpoint;
pub mod context;
pub mod dispatcher;
pub mod http_client;
pub mod lock;
pub mod oplog;
pub mod retry;
pub mod scheduler;
pub mod source;
pub mod transform;
pub mod writer;

// Re-export main types for convenience
pub use batch::{BatchOutcome, BatchReport, BatchSync, PauseReason};
pub use checkpoint::CheckpointStore;
pub use context::{InvocationContext, InvocationMode};
pub use dispatcher::{
    DispatchReport, Dispatcher, Extension, Operation, ScopeOutcome, ScopeResult, ScopeStatus,
    SkipReason,
};
pub use http_client::ApiClient;
pub use lock::{LockManager, LockToken};
pub use oplog::OperationLog;
pub use retry::RetryManager;
pub use scheduler::{
    Cadence, ManualTriggerHandle, OperationRunner, SchedulerConfig, SyncScheduler, TickResult,
    TickStatus,
};
pub use source::{ApiSource, Page, PageSource};
pub use transform::{RowTransformer, SchemaTransformer};
pub use writer::RowWriter;
