//! Optional per-target serialisation of rclone runs.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Async mutexes keyed by `:<remote>:<path>`.
///
/// Entries are created on demand and dropped again once nobody holds or waits
/// for them, so the map only grows with the number of targets in flight.
#[derive(Debug, Default)]
pub struct TargetLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other caller holds `target`.
    pub async fn acquire(&self, target: String) -> TargetGuard<'_> {
        let lock = self.locks.entry(target.clone()).or_default().clone();
        let guard = lock.lock_owned().await;
        TargetGuard {
            locks: &self.locks,
            target,
            guard: Some(guard),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.locks.len()
    }
}

/// Held for the duration of one rclone run.
pub struct TargetGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    target: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TargetGuard<'_> {
    fn drop(&mut self) {
        // Release first so the strong count only reflects the map and waiters.
        self.guard.take();
        self.locks
            .remove_if(&self.target, |_, lock| Arc::strong_count(lock) == 1);
    }
}
