//! Advisory, TTL-bounded locks
//!
//! A lock is a row in `sync_locks`. Taking it is a single transaction in the
//! store, so two invocations racing for the same name cannot both win. The
//! TTL equals the host's hard execution ceiling: a holder killed by the host
//! leaves a row that any later invocation may take over once it lapses.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::error::DbError;
use crate::models::LockLease;

/// Interval between acquisition attempts while waiting
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Proof of holding a lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    name: String,
    token: String,
}

impl LockToken {
    /// Lock name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Random token identifying this holder
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Acquires and releases named locks
#[derive(Clone)]
pub struct LockManager {
    db: Arc<dyn Database>,
    ttl: Duration,
    poll_interval: Duration,
}

impl LockManager {
    /// Create a manager whose leases last `ttl`
    pub fn new(db: Arc<dyn Database>, ttl: Duration) -> Self {
        Self {
            db,
            ttl,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the polling interval
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Lease duration
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Try to take `name`, polling for up to `wait`
    ///
    /// Returns None if the lock is still held by someone else when the wait
    /// runs out. A zero wait makes exactly one attempt.
    pub async fn acquire(
        &self,
        name: &str,
        holder: &str,
        wait: Duration,
    ) -> Result<Option<LockToken>, DbError> {
        let deadline = Instant::now() + wait;
        let token = new_token();
        let ttl = chrono::Duration::from_std(self.ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)));
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let lease = LockLease::new(name, token.clone(), holder, ttl);

            if self.db.try_acquire_lock(&lease).await? {
                info!(lock = name, holder, attempts, "Lock acquired");
                return Ok(Some(LockToken {
                    name: name.to_string(),
                    token,
                }));
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(lock = name, holder, attempts, "Lock busy, giving up");
                return Ok(None);
            }

            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Release a held lock
    ///
    /// Idempotent: releasing twice, or after the lease lapsed and was taken
    /// over, is not an error.
    pub async fn release(&self, token: &LockToken) -> Result<(), DbError> {
        if self.db.release_lock(&token.name, &token.token).await? {
            info!(lock = %token.name, "Lock released");
        } else {
            warn!(lock = %token.name, "Lock was no longer held at release");
        }
        Ok(())
    }

    /// Current lease on a name, if any and not expired
    pub async fn current_holder(&self, name: &str) -> Result<Option<LockLease>, DbError> {
        let now = chrono::Utc::now();
        Ok(self
            .db
            .get_lock(name)
            .await?
            .filter(|lease| !lease.is_expired_at(now)))
    }
}

fn new_token() -> String {
    format!("{:032x}", rand::thread_rng().gen::<u128>())
}
