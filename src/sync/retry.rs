//! Retry manager for handling transient failures with exponential backoff
//!
//! This module provides a retry mechanism with configurable backoff strategy,
//! jitter, and maximum retry limits for handling temporary failures gracefully.
//! Backoff waits are `tokio::time::sleep`, so a paused test clock observes the
//! exact schedule.

use crate::config::RetryConfig;
use crate::error::RetryableError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Details of a retry about to happen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryEvent {
    /// Retry number, starting at 1
    pub attempt: u32,
    /// Configured retry limit
    pub max_retries: u32,
    /// How long the manager will sleep before the retry
    pub backoff: Duration,
    /// Rendered failure that triggered the retry
    pub error: String,
}

/// Retry manager with exponential backoff support
#[derive(Debug, Clone)]
pub struct RetryManager {
    config: RetryConfig,
}

impl RetryManager {
    /// Create a new RetryManager with the given configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create a RetryManager with default configuration
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Execute an async operation with retry logic
    ///
    /// The operation will be retried up to `max_retries` times if it returns
    /// a retryable error. Each retry will wait for an exponentially increasing
    /// backoff period with optional jitter.
    ///
    /// # Returns
    ///
    /// The result of the operation. A retryable error that outlives the retry
    /// budget is passed through [`RetryableError::exhausted`]; a non-retryable
    /// error is returned as is.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + std::fmt::Display,
    {
        self.execute_observed(operation, |_| async {}).await
    }

    /// Same as [`execute`](Self::execute), calling `on_retry` before each backoff sleep
    pub async fn execute_observed<F, Fut, T, E, O, OFut>(
        &self,
        operation: F,
        mut on_retry: O,
    ) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + std::fmt::Display,
        O: FnMut(RetryEvent) -> OFut,
        OFut: Future<Output = ()>,
    {
        let mut attempt = 0u32;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    if !err.is_retryable() {
                        return Err(err);
                    }

                    if attempt >= self.config.max_retries {
                        warn!(
                            attempts = attempt + 1,
                            max_retries = self.config.max_retries,
                            error = %err,
                            "Max retries exhausted"
                        );
                        return Err(err.exhausted(attempt + 1));
                    }

                    let backoff = self.calculate_backoff(attempt);
                    debug!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Retrying after transient error"
                    );

                    on_retry(RetryEvent {
                        attempt: attempt + 1,
                        max_retries: self.config.max_retries,
                        backoff,
                        error: err.to_string(),
                    })
                    .await;

                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Calculate backoff duration for a given attempt number
    ///
    /// Uses exponential backoff: initial_backoff * multiplier^attempt
    /// Capped at max_backoff_ms with optional jitter
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base = self.config.initial_backoff_ms as f64
            * self.config.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.config.max_backoff_ms as f64);

        let delay = if self.config.jitter {
            // Add jitter: 50-100% of the calculated backoff
            let jitter = rand::thread_rng().gen_range(0.5..1.0);
            capped * jitter
        } else {
            capped
        };

        Duration::from_millis(delay as u64)
    }

    /// Get the retry configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}
