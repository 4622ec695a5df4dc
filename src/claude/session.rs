//! Per-user session locks
//!
//! Guarantees at most one agent run per user at a time. Each user ID maps to
//! one mutex, created on first use and kept for the registry's lifetime.
//! Acquisition never waits: a busy user gets `None` back immediately.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of per-user locks.
///
/// Cheap to clone; clones share the same lock map. Construct one per process
/// and hand it to every caller that starts runs.
#[derive(Debug, Clone, Default)]
pub struct SessionLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the lock for `user_id` without waiting.
    ///
    /// Returns `None` if a run for this user is already in progress. The lock
    /// is released when the returned guard is dropped.
    #[must_use]
    pub fn try_acquire(&self, user_id: &str) -> Option<SessionGuard> {
        let lock = Arc::clone(&self.locks.entry(user_id.to_string()).or_default());

        match lock.try_lock_owned() {
            Ok(guard) => {
                tracing::debug!(user_id, "session lock acquired");
                Some(SessionGuard {
                    user_id: user_id.to_string(),
                    _guard: guard,
                })
            }
            Err(_) => {
                tracing::debug!(user_id, "session lock busy");
                None
            }
        }
    }

    /// Whether a run currently holds the lock for `user_id`
    #[must_use]
    pub fn is_busy(&self, user_id: &str) -> bool {
        self.locks
            .get(user_id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Number of distinct users seen so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no user has been seen yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive hold on one user's session. Dropping it releases the lock.
#[derive(Debug)]
pub struct SessionGuard {
    user_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl SessionGuard {
    /// The user this guard locks
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Release the lock explicitly
    pub fn release(self) {
        tracing::debug!(user_id = %self.user_id, "session lock released");
    }
}
