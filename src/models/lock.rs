//! Advisory lock lease model

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A held advisory lock
///
/// The lease is only meaningful while `expires_at` is in the future; after
/// that any invocation may take the name over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockLease {
    /// Lock name, e.g. `scope:s2024`
    pub name: String,
    /// Random token identifying this holder
    pub token: String,
    /// Free-form holder description (operation + mode)
    pub holder: String,
    /// When the lease was taken
    pub acquired_at: DateTime<Utc>,
    /// When the lease self-expires
    pub expires_at: DateTime<Utc>,
}

impl LockLease {
    /// Create a lease starting now with the given TTL
    pub fn new(
        name: impl Into<String>,
        token: impl Into<String>,
        holder: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        let acquired_at = Utc::now();
        Self {
            name: name.into(),
            token: token.into(),
            holder: holder.into(),
            acquired_at,
            expires_at: acquired_at + ttl,
        }
    }

    /// Whether the lease has lapsed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
