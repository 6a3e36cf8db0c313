//! Advisory lock on the tracked state file.
//!
//! Two runs against the same state would race on the remote objects as well
//! as on the file, so mutating commands hold the lock for their duration.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lock expiry in seconds.
///
/// A teardown can poll for a while, so this is longer than a single run of
/// the default teardown schedule.
pub const LOCK_EXPIRY_SECS: i64 = 900;

/// Information about a held lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// Command that took the lock.
    #[serde(default)]
    pub operation: Option<String>,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a lock for the given holder.
    #[must_use]
    pub fn new(holder: &str) -> Self {
        Self::acquired_at(holder, Utc::now())
    }

    /// Creates a lock acquired at a given instant.
    #[must_use]
    pub fn acquired_at(holder: &str, at: DateTime<Utc>) -> Self {
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            operation: None,
            acquired_at: at,
            expires_at: at + Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Records the command holding the lock.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Remaining time until expiry, in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}

/// Generates a holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());
    let pid = std::process::id();
    let suffix = &Uuid::new_v4().simple().to_string()[..8];

    format!("{hostname}-{pid}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_lock_is_live() {
        let lock = LockInfo::new("ci").with_operation("apply");
        assert!(!lock.is_expired());
        assert!(lock.remaining_secs() > 0);
        assert_eq!(lock.operation.as_deref(), Some("apply"));
    }

    #[test]
    fn test_old_lock_is_expired() {
        let lock = LockInfo::acquired_at("ci", Utc::now() - Duration::seconds(LOCK_EXPIRY_SECS + 1));
        assert!(lock.is_expired());
        assert_eq!(lock.remaining_secs(), 0);
    }

    #[test]
    fn test_holder_ids_are_unique() {
        let id1 = generate_holder_id();
        let id2 = generate_holder_id();

        assert_ne!(id1, id2);
        assert!(id1.contains(&std::process::id().to_string()));
    }
}
