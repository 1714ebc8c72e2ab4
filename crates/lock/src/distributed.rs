use crate::{Acquisition, Hold, LockError, LockGuard, LockKind, LockManager, LockMode, Result};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Shared queue state for distributed locks.
///
/// Each call must be atomic with respect to every other participant. Per
/// resource, a coordinator keeps a FIFO queue of waiters (ordered by the
/// ticket they got on their first `try_grant`) and a set of holders.
///
/// - A shared request is granted when nobody holds the resource
///   exclusively and no exclusive request is queued ahead of it.
/// - An exclusive request is granted when nobody holds the resource and it
///   is at the head of the queue.
///
/// Every grant carries a lease; a holder that never releases loses the lock
/// when the lease runs out. Waiters refresh their place on every call and
/// are dropped from the queue once they have been silent for a full lease.
pub trait Coordinator: Send + Sync {
    /// Enqueue `waiter` if needed and report whether it now holds the lock.
    fn try_grant(&self, resource: &str, waiter: &str, mode: LockMode, lease: Duration)
        -> Result<bool>;

    /// Withdraw a waiter, including a grant the waiter never learned about.
    fn abandon(&self, resource: &str, waiter: &str, mode: LockMode) -> Result<()>;

    fn release(&self, resource: &str, holder: &str, mode: LockMode) -> Result<()>;
}

/// Locks coordinated across processes through a [`Coordinator`].
///
/// Waiting is done by polling. A coordinator failure during a timed wait is
/// reported as a timeout, so a caller never proceeds without the lock.
pub struct DistributedLockManager {
    coordinator: Arc<dyn Coordinator>,
    lease: Duration,
    poll_interval: Duration,
}

impl DistributedLockManager {
    pub fn new(coordinator: Arc<dyn Coordinator>, lease: Duration, poll_interval: Duration) -> Self {
        Self {
            coordinator,
            lease,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    fn guard(&self, resource: &str, waiter: String, mode: LockMode) -> LockGuard {
        let hold = RemoteHold {
            coordinator: Arc::clone(&self.coordinator),
            resource: resource.to_string(),
            holder: waiter,
            mode,
        };
        LockGuard::new(resource, mode, Hold::Remote { _hold: hold })
    }

    fn abandon(&self, resource: &str, waiter: &str, mode: LockMode) {
        if let Err(err) = self.coordinator.abandon(resource, waiter, mode) {
            tracing::warn!(resource, waiter, error = %err, "failed to withdraw lock request");
        }
    }

    /// Poll until granted, the deadline passes, or the coordinator fails.
    fn wait(&self, resource: &str, mode: LockMode, deadline: Option<Instant>) -> Result<Option<LockGuard>> {
        let waiter = Uuid::new_v4().to_string();
        loop {
            match self.coordinator.try_grant(resource, &waiter, mode, self.lease) {
                Ok(true) => return Ok(Some(self.guard(resource, waiter, mode))),
                Ok(false) => {}
                Err(err) => {
                    self.abandon(resource, &waiter, mode);
                    return Err(err);
                }
            }

            let pause = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        self.abandon(resource, &waiter, mode);
                        return Ok(None);
                    }
                    remaining.min(self.poll_interval)
                }
                None => self.poll_interval,
            };
            thread::sleep(pause);
        }
    }
}

impl LockManager for DistributedLockManager {
    fn kind(&self) -> LockKind {
        LockKind::Distributed
    }

    fn acquire(&self, resource: &str, mode: LockMode) -> Result<LockGuard> {
        match self.wait(resource, mode, None) {
            Ok(Some(guard)) => Ok(guard),
            Ok(None) => Err(LockError::Coordination(format!(
                "lock on '{resource}' was not granted"
            ))),
            Err(err) => {
                tracing::warn!(resource, %mode, error = %err, "lock coordination failed");
                Err(err)
            }
        }
    }

    fn try_acquire(&self, resource: &str, mode: LockMode, timeout: Duration) -> Acquisition {
        let deadline = Instant::now() + timeout;
        match self.wait(resource, mode, Some(deadline)) {
            Ok(Some(guard)) => Acquisition::Acquired(guard),
            Ok(None) => {
                tracing::debug!(resource, %mode, ?timeout, "lock wait timed out");
                Acquisition::TimedOut
            }
            Err(err) => {
                tracing::warn!(
                    resource,
                    %mode,
                    error = %err,
                    "lock coordination failed, treating as timeout"
                );
                Acquisition::TimedOut
            }
        }
    }
}

/// A granted distributed lock; released through the coordinator on drop.
pub(crate) struct RemoteHold {
    coordinator: Arc<dyn Coordinator>,
    resource: String,
    holder: String,
    mode: LockMode,
}

impl Drop for RemoteHold {
    fn drop(&mut self) {
        if let Err(err) = self
            .coordinator
            .release(&self.resource, &self.holder, self.mode)
        {
            // The lease will expire the grant.
            tracing::warn!(resource = %self.resource, error = %err, "failed to release lock");
        }
    }
}
