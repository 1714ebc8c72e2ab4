//! # sheetstore lock
//!
//! Named shared/exclusive locks. Many holders may share a resource, or one
//! holder may own it exclusively. Requests are served fairly: a shared
//! request that arrives while an exclusive request is waiting queues behind it.
//!
//! Two interchangeable managers implement [`LockManager`]:
//!
//! - [`LocalLockManager`] coordinates threads inside one process.
//! - [`DistributedLockManager`] coordinates processes through a
//!   [`Coordinator`] (Redis, or in-memory for tests).
//!
//! ```
//! use sheetstore_lock::{Acquisition, LocalLockManager, LockManager};
//! use std::time::Duration;
//!
//! let locks = LocalLockManager::new();
//! let reader = locks.acquire_shared("report.xlsx").unwrap();
//! // A writer cannot get in while the reader holds the lock.
//! assert!(matches!(
//!     locks.try_acquire_exclusive("report.xlsx", Duration::from_millis(10)),
//!     Acquisition::TimedOut
//! ));
//! reader.release();
//! assert!(locks.try_acquire_exclusive("report.xlsx", Duration::ZERO).is_acquired());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

mod distributed;
mod local;
mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use distributed::{Coordinator, DistributedLockManager};
pub use local::LocalLockManager;
pub use memory::MemoryCoordinator;
#[cfg(feature = "redis")]
pub use redis::RedisCoordinator;

/// How a resource is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LockMode::Shared => "shared",
            LockMode::Exclusive => "exclusive",
        })
    }
}

/// Which manager implementation is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Local,
    Distributed,
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LockKind::Local => "local",
            LockKind::Distributed => "distributed",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Lock coordination failed: {0}")]
    Coordination(String),
    #[error("Invalid lock configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, LockError>;

/// Outcome of a timed acquisition.
#[must_use = "dropping an acquired guard releases the lock immediately"]
#[derive(Debug)]
pub enum Acquisition {
    Acquired(LockGuard),
    /// Nothing is held.
    TimedOut,
}

impl Acquisition {
    pub fn is_acquired(&self) -> bool {
        matches!(self, Acquisition::Acquired(_))
    }

    /// The guard, or `None` on timeout.
    pub fn into_guard(self) -> Option<LockGuard> {
        match self {
            Acquisition::Acquired(guard) => Some(guard),
            Acquisition::TimedOut => None,
        }
    }
}

/// A lock manager for named resources.
///
/// Resources need no registration; the first request for a name creates it.
pub trait LockManager: Send + Sync {
    fn kind(&self) -> LockKind;

    /// Block until the lock is held.
    fn acquire(&self, resource: &str, mode: LockMode) -> Result<LockGuard>;

    /// Wait at most `timeout` for the lock.
    fn try_acquire(&self, resource: &str, mode: LockMode, timeout: Duration) -> Acquisition;

    fn acquire_shared(&self, resource: &str) -> Result<LockGuard> {
        self.acquire(resource, LockMode::Shared)
    }

    fn acquire_exclusive(&self, resource: &str) -> Result<LockGuard> {
        self.acquire(resource, LockMode::Exclusive)
    }

    fn try_acquire_shared(&self, resource: &str, timeout: Duration) -> Acquisition {
        self.try_acquire(resource, LockMode::Shared, timeout)
    }

    fn try_acquire_exclusive(&self, resource: &str, timeout: Duration) -> Acquisition {
        self.try_acquire(resource, LockMode::Exclusive, timeout)
    }
}

/// What keeps the lock held; dropping it gives the lock back.
pub(crate) enum Hold {
    LocalShared { _guard: local::SharedGuard },
    LocalExclusive { _guard: local::ExclusiveGuard },
    Remote { _hold: distributed::RemoteHold },
}

/// Proof that the caller holds `resource` in `mode`.
///
/// The lock is released exactly once: by [`LockGuard::release`] or when the
/// guard is dropped.
pub struct LockGuard {
    resource: String,
    mode: LockMode,
    acquired_at: Instant,
    _hold: Hold,
}

impl LockGuard {
    pub(crate) fn new(resource: &str, mode: LockMode, hold: Hold) -> Self {
        tracing::debug!(resource, %mode, "lock acquired");
        Self {
            resource: resource.to_string(),
            mode,
            acquired_at: Instant::now(),
            _hold: hold,
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Time since the lock was granted.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Release the lock now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        tracing::debug!(
            resource = %self.resource,
            mode = %self.mode,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "lock released"
        );
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("resource", &self.resource)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
