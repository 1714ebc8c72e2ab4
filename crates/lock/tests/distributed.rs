use sheetstore_lock::{
    Acquisition, Coordinator, DistributedLockManager, LockError, LockKind, LockManager, LockMode,
    MemoryCoordinator,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const LEASE: Duration = Duration::from_secs(30);
const POLL: Duration = Duration::from_millis(5);
const SHORT: Duration = Duration::from_millis(60);

/// Two managers sharing one coordinator behave like two nodes of a cluster.
fn two_nodes(lease: Duration) -> (Arc<MemoryCoordinator>, DistributedLockManager, DistributedLockManager) {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let a = DistributedLockManager::new(coordinator.clone(), lease, POLL);
    let b = DistributedLockManager::new(coordinator.clone(), lease, POLL);
    (coordinator, a, b)
}

#[test]
fn test_exclusive_across_nodes() {
    let (coordinator, a, b) = two_nodes(LEASE);
    assert_eq!(a.kind(), LockKind::Distributed);

    let guard = a.acquire_exclusive("doc").unwrap();
    assert!(matches!(
        b.try_acquire_exclusive("doc", SHORT),
        Acquisition::TimedOut
    ));
    assert!(!b.try_acquire_shared("doc", SHORT).is_acquired());
    // The timed-out waiters withdrew from the queue.
    assert_eq!(coordinator.queued("doc"), 0);

    guard.release();
    assert_eq!(coordinator.holder_count("doc"), 0);
    assert!(b.try_acquire_exclusive("doc", SHORT).is_acquired());
}

#[test]
fn test_shared_across_nodes() {
    let (coordinator, a, b) = two_nodes(LEASE);
    let ra = a.acquire_shared("doc").unwrap();
    let rb = b.try_acquire_shared("doc", SHORT).into_guard().unwrap();
    assert_eq!(coordinator.holder_count("doc"), 2);
    drop((ra, rb));
    assert_eq!(coordinator.holder_count("doc"), 0);
}

#[test]
fn test_mutual_exclusion_under_contention() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let inside = Arc::new(AtomicUsize::new(0));
    let max_inside = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let node = DistributedLockManager::new(coordinator.clone(), LEASE, POLL);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            thread::spawn(move || {
                for _ in 0..10 {
                    let guard = node.acquire_exclusive("doc").unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(1));
                    inside.fetch_sub(1, Ordering::SeqCst);
                    drop(guard);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(max_inside.load(Ordering::SeqCst), 1);
}

#[test]
fn test_reader_does_not_overtake_waiting_writer() {
    let (_coordinator, a, b) = two_nodes(LEASE);
    let b = Arc::new(b);
    let reader = a.acquire_shared("doc").unwrap();

    let writer = {
        let b = Arc::clone(&b);
        thread::spawn(move || b.acquire_exclusive("doc").map(|guard| guard.mode()))
    };
    thread::sleep(Duration::from_millis(50));

    // A new reader arriving now queues behind the writer.
    assert!(!a.try_acquire_shared("doc", SHORT).is_acquired());

    reader.release();
    assert_eq!(writer.join().unwrap().unwrap(), LockMode::Exclusive);
    assert!(a.try_acquire_shared("doc", SHORT).is_acquired());
}

#[test]
fn test_lease_expiry_frees_lock_of_crashed_holder() {
    let lease = Duration::from_millis(100);
    let (_coordinator, a, b) = two_nodes(lease);

    let guard = a.acquire_exclusive("doc").unwrap();
    // Simulate a node that dies without releasing.
    std::mem::forget(guard);

    let started = Instant::now();
    assert!(b
        .try_acquire_exclusive("doc", Duration::from_secs(5))
        .is_acquired());
    assert!(started.elapsed() < Duration::from_secs(5));
}

/// Coordinator that is unreachable.
struct Unreachable;

impl Coordinator for Unreachable {
    fn try_grant(&self, _: &str, _: &str, _: LockMode, _: Duration) -> Result<bool, LockError> {
        Err(LockError::Coordination("connection refused".to_string()))
    }

    fn abandon(&self, _: &str, _: &str, _: LockMode) -> Result<(), LockError> {
        Err(LockError::Coordination("connection refused".to_string()))
    }

    fn release(&self, _: &str, _: &str, _: LockMode) -> Result<(), LockError> {
        Err(LockError::Coordination("connection refused".to_string()))
    }
}

/// Coordinator that works for a few calls and then drops off the network.
struct Flaky {
    inner: MemoryCoordinator,
    calls_left: AtomicUsize,
    abandoned: AtomicUsize,
}

impl Coordinator for Flaky {
    fn try_grant(
        &self,
        resource: &str,
        waiter: &str,
        mode: LockMode,
        lease: Duration,
    ) -> Result<bool, LockError> {
        if self.calls_left.fetch_sub(1, Ordering::SeqCst) == 0 {
            return Err(LockError::Coordination("connection reset".to_string()));
        }
        self.inner.try_grant(resource, waiter, mode, lease)
    }

    fn abandon(&self, resource: &str, waiter: &str, mode: LockMode) -> Result<(), LockError> {
        self.abandoned.fetch_add(1, Ordering::SeqCst);
        self.inner.abandon(resource, waiter, mode)
    }

    fn release(&self, resource: &str, holder: &str, mode: LockMode) -> Result<(), LockError> {
        self.inner.release(resource, holder, mode)
    }
}

#[test]
fn test_connectivity_loss_is_a_timeout() {
    let node = DistributedLockManager::new(Arc::new(Unreachable), LEASE, POLL);
    assert!(matches!(
        node.try_acquire_exclusive("doc", SHORT),
        Acquisition::TimedOut
    ));
    assert!(matches!(
        node.try_acquire_shared("doc", SHORT),
        Acquisition::TimedOut
    ));
}

#[test]
fn test_connectivity_loss_fails_blocking_acquire() {
    let node = DistributedLockManager::new(Arc::new(Unreachable), LEASE, POLL);
    assert!(matches!(
        node.acquire_exclusive("doc"),
        Err(LockError::Coordination(_))
    ));
}

#[test]
fn test_connection_lost_while_waiting() {
    let flaky = Arc::new(Flaky {
        inner: MemoryCoordinator::new(),
        calls_left: AtomicUsize::new(3),
        abandoned: AtomicUsize::new(0),
    });
    let node = DistributedLockManager::new(flaky.clone(), LEASE, POLL);

    let holder = node.acquire_exclusive("doc").unwrap();
    // Two more polls succeed, then the coordinator fails mid-wait.
    assert!(matches!(
        node.try_acquire_exclusive("doc", Duration::from_secs(5)),
        Acquisition::TimedOut
    ));
    assert_eq!(flaky.abandoned.load(Ordering::SeqCst), 1);
    assert_eq!(flaky.inner.queued("doc"), 0);
    drop(holder);
}

#[cfg(feature = "redis")]
#[test]
fn test_unreachable_redis_is_a_timeout() {
    use sheetstore_lock::RedisCoordinator;

    let redis = RedisCoordinator::new(
        "redis://127.0.0.1:1/",
        "sheetstore:test",
        Duration::from_millis(200),
    )
    .unwrap();
    let node = DistributedLockManager::new(Arc::new(redis), LEASE, POLL);
    assert!(matches!(
        node.try_acquire_exclusive("doc", Duration::from_millis(300)),
        Acquisition::TimedOut
    ));
    assert!(node.acquire_shared("doc").is_err());
}
