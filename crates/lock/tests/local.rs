use sheetstore_lock::{Acquisition, LocalLockManager, LockManager, LockMode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const SHORT: Duration = Duration::from_millis(50);

#[test]
fn test_exclusive_holders_never_overlap() {
    let locks = Arc::new(LocalLockManager::new());
    let inside = Arc::new(AtomicUsize::new(0));
    let max_inside = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            thread::spawn(move || {
                for _ in 0..20 {
                    let guard = locks.acquire_exclusive("doc").unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    thread::yield_now();
                    inside.fetch_sub(1, Ordering::SeqCst);
                    guard.release();
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
fn test_shared_holders_coexist() {
    let locks = Arc::new(LocalLockManager::new());
    let barrier = Arc::new(Barrier::new(3));

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let locks = Arc::clone(&locks);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let guard = locks
                    .try_acquire_shared("doc", Duration::from_secs(5))
                    .into_guard()
                    .expect("shared lock");
                // Every reader reaches the barrier while holding its lock.
                barrier.wait();
                drop(guard);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_writer_waits_for_reader() {
    let locks = LocalLockManager::new();
    let reader = locks.acquire_shared("doc").unwrap();

    assert!(matches!(
        locks.try_acquire_exclusive("doc", SHORT),
        Acquisition::TimedOut
    ));
    reader.release();
    assert!(locks.try_acquire_exclusive("doc", SHORT).is_acquired());
}

#[test]
fn test_reader_waits_for_writer() {
    let locks = LocalLockManager::new();
    let writer = locks.acquire_exclusive("doc").unwrap();

    assert!(!locks.try_acquire_shared("doc", SHORT).is_acquired());
    assert!(!locks
        .try_acquire("doc", LockMode::Exclusive, SHORT)
        .is_acquired());
    drop(writer);
    assert!(locks.try_acquire_shared("doc", SHORT).is_acquired());
}

#[test]
fn test_new_reader_queues_behind_waiting_writer() {
    let locks = Arc::new(LocalLockManager::new());
    let first_reader = locks.acquire_shared("doc").unwrap();

    let writer = {
        let locks = Arc::clone(&locks);
        thread::spawn(move || {
            let guard = locks.acquire_exclusive("doc").unwrap();
            guard.held_for()
        })
    };
    // Give the writer time to start waiting.
    thread::sleep(Duration::from_millis(100));

    assert!(matches!(
        locks.try_acquire_shared("doc", SHORT),
        Acquisition::TimedOut
    ));

    first_reader.release();
    writer.join().unwrap();
    assert!(locks.try_acquire_shared("doc", SHORT).is_acquired());
}

#[test]
fn test_timed_out_attempt_holds_nothing() {
    let locks = LocalLockManager::new();
    let writer = locks.acquire_exclusive("doc").unwrap();
    for _ in 0..3 {
        assert!(!locks.try_acquire_exclusive("doc", Duration::ZERO).is_acquired());
    }
    drop(writer);
    // Failed attempts left no residue behind.
    assert!(locks.try_acquire_exclusive("doc", Duration::ZERO).is_acquired());
}

#[test]
fn test_lock_released_when_holder_panics() {
    let locks = Arc::new(LocalLockManager::new());
    let result = {
        let locks = Arc::clone(&locks);
        thread::spawn(move || {
            let _guard = locks.acquire_exclusive("doc").unwrap();
            panic!("holder crashed");
        })
        .join()
    };
    assert!(result.is_err());
    assert!(locks.try_acquire_exclusive("doc", SHORT).is_acquired());
}
