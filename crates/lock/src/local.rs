use crate::{Acquisition, Hold, LockGuard, LockKind, LockManager, LockMode, Result};
use lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub(crate) type SharedGuard = ArcRwLockReadGuard<RawRwLock, ()>;
pub(crate) type ExclusiveGuard = ArcRwLockWriteGuard<RawRwLock, ()>;

/// Locks shared by the threads of one process.
///
/// Each resource maps to a `parking_lot` reader-writer lock, whose task-fair
/// policy keeps new readers out while a writer is waiting. Entries are
/// created on first use and kept for the life of the manager.
#[derive(Default)]
pub struct LocalLockManager {
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl LocalLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct resources seen so far.
    pub fn resource_count(&self) -> usize {
        self.locks.lock().len()
    }

    fn lock_for(&self, resource: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock();
        match locks.get(resource) {
            Some(lock) => Arc::clone(lock),
            None => {
                let lock = Arc::new(RwLock::new(()));
                locks.insert(resource.to_string(), Arc::clone(&lock));
                lock
            }
        }
    }
}

impl LockManager for LocalLockManager {
    fn kind(&self) -> LockKind {
        LockKind::Local
    }

    fn acquire(&self, resource: &str, mode: LockMode) -> Result<LockGuard> {
        let lock = self.lock_for(resource);
        let hold = match mode {
            LockMode::Shared => Hold::LocalShared {
                _guard: lock.read_arc(),
            },
            LockMode::Exclusive => Hold::LocalExclusive {
                _guard: lock.write_arc(),
            },
        };
        Ok(LockGuard::new(resource, mode, hold))
    }

    fn try_acquire(&self, resource: &str, mode: LockMode, timeout: Duration) -> Acquisition {
        let lock = self.lock_for(resource);
        let hold = match mode {
            LockMode::Shared => lock
                .try_read_arc_for(timeout)
                .map(|guard| Hold::LocalShared { _guard: guard }),
            LockMode::Exclusive => lock
                .try_write_arc_for(timeout)
                .map(|guard| Hold::LocalExclusive { _guard: guard }),
        };
        match hold {
            Some(hold) => Acquisition::Acquired(LockGuard::new(resource, mode, hold)),
            None => {
                tracing::debug!(resource, %mode, ?timeout, "lock wait timed out");
                Acquisition::TimedOut
            }
        }
    }
}
