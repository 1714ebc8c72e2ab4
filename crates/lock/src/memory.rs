use crate::{Coordinator, LockMode, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

struct Waiter {
    id: String,
    mode: LockMode,
    last_seen: Instant,
}

struct Holder {
    mode: LockMode,
    expires: Instant,
}

#[derive(Default)]
struct ResourceState {
    next_ticket: u64,
    /// ticket -> waiter, oldest first
    queue: BTreeMap<u64, Waiter>,
    tickets: HashMap<String, u64>,
    holders: HashMap<String, Holder>,
}

impl ResourceState {
    fn expire(&mut self, now: Instant, lease: Duration, current: &str) {
        self.holders.retain(|_, holder| holder.expires > now);
        let stale: Vec<u64> = self
            .queue
            .iter()
            .filter(|(_, w)| w.id != current && now.duration_since(w.last_seen) >= lease)
            .map(|(ticket, _)| *ticket)
            .collect();
        for ticket in stale {
            if let Some(waiter) = self.queue.remove(&ticket) {
                tracing::debug!(waiter = %waiter.id, "evicting stale lock waiter");
                self.tickets.remove(&waiter.id);
            }
        }
    }

    fn remove_waiter(&mut self, id: &str) {
        if let Some(ticket) = self.tickets.remove(id) {
            self.queue.remove(&ticket);
        }
    }

    fn grantable(&self, ticket: u64, mode: LockMode) -> bool {
        match mode {
            LockMode::Exclusive => {
                self.holders.is_empty() && self.queue.keys().next() == Some(&ticket)
            }
            LockMode::Shared => {
                let exclusive_holder = self
                    .holders
                    .values()
                    .any(|h| h.mode == LockMode::Exclusive);
                let exclusive_ahead = self
                    .queue
                    .range(..ticket)
                    .any(|(_, w)| w.mode == LockMode::Exclusive);
                !exclusive_holder && !exclusive_ahead
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.holders.is_empty()
    }
}

/// An in-process [`Coordinator`].
///
/// Runs the same queue algorithm as the Redis coordinator under a mutex.
/// Several [`crate::DistributedLockManager`]s sharing one instance behave like
/// nodes sharing a Redis server.
#[derive(Default)]
pub struct MemoryCoordinator {
    resources: Mutex<HashMap<String, ResourceState>>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current holders of a resource.
    pub fn holder_count(&self, resource: &str) -> usize {
        let now = Instant::now();
        self.resources
            .lock()
            .get(resource)
            .map_or(0, |state| state.holders.values().filter(|h| h.expires > now).count())
    }

    /// Waiters currently queued for a resource.
    pub fn queued(&self, resource: &str) -> usize {
        self.resources
            .lock()
            .get(resource)
            .map_or(0, |state| state.queue.len())
    }
}

impl Coordinator for MemoryCoordinator {
    fn try_grant(
        &self,
        resource: &str,
        waiter: &str,
        mode: LockMode,
        lease: Duration,
    ) -> Result<bool> {
        let now = Instant::now();
        let mut resources = self.resources.lock();
        let state = resources.entry(resource.to_string()).or_default();
        state.expire(now, lease, waiter);

        if let Some(holder) = state.holders.get_mut(waiter) {
            holder.expires = now + lease;
            return Ok(true);
        }

        let ticket = match state.tickets.get(waiter) {
            Some(ticket) => *ticket,
            None => {
                let ticket = state.next_ticket;
                state.next_ticket += 1;
                state.tickets.insert(waiter.to_string(), ticket);
                state.queue.insert(
                    ticket,
                    Waiter {
                        id: waiter.to_string(),
                        mode,
                        last_seen: now,
                    },
                );
                ticket
            }
        };
        if let Some(entry) = state.queue.get_mut(&ticket) {
            entry.last_seen = now;
        }

        if !state.grantable(ticket, mode) {
            return Ok(false);
        }
        state.remove_waiter(waiter);
        state.holders.insert(
            waiter.to_string(),
            Holder {
                mode,
                expires: now + lease,
            },
        );
        Ok(true)
    }

    fn abandon(&self, resource: &str, waiter: &str, _mode: LockMode) -> Result<()> {
        let mut resources = self.resources.lock();
        if let Some(state) = resources.get_mut(resource) {
            state.remove_waiter(waiter);
            state.holders.remove(waiter);
            if state.is_idle() {
                resources.remove(resource);
            }
        }
        Ok(())
    }

    fn release(&self, resource: &str, holder: &str, _mode: LockMode) -> Result<()> {
        let mut resources = self.resources.lock();
        if let Some(state) = resources.get_mut(resource) {
            state.holders.remove(holder);
            if state.is_idle() {
                resources.remove(resource);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE: Duration = Duration::from_secs(30);

    #[test]
    fn test_shared_requests_coexist() {
        let c = MemoryCoordinator::new();
        assert!(c.try_grant("r", "a", LockMode::Shared, LEASE).unwrap());
        assert!(c.try_grant("r", "b", LockMode::Shared, LEASE).unwrap());
        assert_eq!(c.holder_count("r"), 2);
    }

    #[test]
    fn test_exclusive_waits_for_holders() {
        let c = MemoryCoordinator::new();
        assert!(c.try_grant("r", "reader", LockMode::Shared, LEASE).unwrap());
        assert!(!c.try_grant("r", "writer", LockMode::Exclusive, LEASE).unwrap());
        assert_eq!(c.queued("r"), 1);
        c.release("r", "reader", LockMode::Shared).unwrap();
        assert!(c.try_grant("r", "writer", LockMode::Exclusive, LEASE).unwrap());
        assert_eq!(c.queued("r"), 0);
    }

    #[test]
    fn test_reader_queues_behind_waiting_writer() {
        let c = MemoryCoordinator::new();
        assert!(c.try_grant("r", "r1", LockMode::Shared, LEASE).unwrap());
        assert!(!c.try_grant("r", "w", LockMode::Exclusive, LEASE).unwrap());
        // r2 arrives after the writer and must not overtake it.
        assert!(!c.try_grant("r", "r2", LockMode::Shared, LEASE).unwrap());

        c.release("r", "r1", LockMode::Shared).unwrap();
        assert!(!c.try_grant("r", "r2", LockMode::Shared, LEASE).unwrap());
        assert!(c.try_grant("r", "w", LockMode::Exclusive, LEASE).unwrap());
        c.release("r", "w", LockMode::Exclusive).unwrap();
        assert!(c.try_grant("r", "r2", LockMode::Shared, LEASE).unwrap());
    }

    #[test]
    fn test_expired_lease_frees_the_resource() {
        let c = MemoryCoordinator::new();
        let short = Duration::from_millis(20);
        assert!(c.try_grant("r", "crashed", LockMode::Exclusive, short).unwrap());
        assert!(!c.try_grant("r", "next", LockMode::Exclusive, short).unwrap());
        std::thread::sleep(Duration::from_millis(40));
        assert!(c.try_grant("r", "next", LockMode::Exclusive, short).unwrap());
    }

    #[test]
    fn test_silent_waiter_is_evicted() {
        let c = MemoryCoordinator::new();
        let short = Duration::from_millis(20);
        assert!(c.try_grant("r", "reader", LockMode::Shared, LEASE).unwrap());
        // A writer queues and then vanishes without abandoning.
        assert!(!c.try_grant("r", "ghost", LockMode::Exclusive, short).unwrap());
        assert!(!c.try_grant("r", "late", LockMode::Shared, short).unwrap());
        std::thread::sleep(Duration::from_millis(40));
        assert!(c.try_grant("r", "late", LockMode::Shared, short).unwrap());
        assert_eq!(c.queued("r"), 0);
    }

    #[test]
    fn test_abandon_withdraws_grant_and_cleans_up() {
        let c = MemoryCoordinator::new();
        assert!(c.try_grant("r", "a", LockMode::Exclusive, LEASE).unwrap());
        c.abandon("r", "a", LockMode::Exclusive).unwrap();
        assert_eq!(c.holder_count("r"), 0);
        assert!(c.resources.lock().is_empty());
    }
}
