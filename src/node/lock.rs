use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Named async locks, created on first use and dropped once nobody holds or
/// waits on them.
#[derive(Debug, Default)]
pub struct LockService {
    locks: LockMap,
}

/// Holds a set of named locks until dropped.
#[derive(Debug)]
pub struct LockGuard {
    guards: Vec<OwnedMutexGuard<()>>,
    names: Vec<String>,
    locks: LockMap,
}

impl LockService {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutexes(&self, names: &mut Vec<String>) -> Vec<Arc<AsyncMutex<()>>> {
        names.sort();
        names.dedup();
        let mut locks = self.locks.lock();
        names
            .iter()
            .map(|name| locks.entry(name.clone()).or_default().clone())
            .collect()
    }

    /// Acquire all `names`. Names are taken in sorted order so that two
    /// callers asking for overlapping sets cannot deadlock.
    pub async fn acquire(&self, mut names: Vec<String>) -> LockGuard {
        let mutexes = self.mutexes(&mut names);
        let mut guard = LockGuard {
            guards: Vec::with_capacity(mutexes.len()),
            names,
            locks: self.locks.clone(),
        };
        for mutex in mutexes {
            guard.guards.push(mutex.lock_owned().await);
        }
        guard
    }

    /// Acquire all `names` only if none of them is currently held.
    pub fn try_acquire(&self, mut names: Vec<String>) -> Option<LockGuard> {
        let mutexes = self.mutexes(&mut names);
        let mut guard = LockGuard {
            guards: Vec::with_capacity(mutexes.len()),
            names,
            locks: self.locks.clone(),
        };
        for mutex in mutexes {
            // Dropping the partial guard releases what was taken so far.
            guard.guards.push(mutex.try_lock_owned().ok()?);
        }
        Some(guard)
    }

    /// Number of names currently tracked.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.guards.clear();
        let mut locks = self.locks.lock();
        for name in &self.names {
            // Waiters clone the mutex under the map lock, so a count of one
            // means the map holds the only reference.
            if locks
                .get(name)
                .map_or(false, |mutex| Arc::strong_count(mutex) == 1)
            {
                locks.remove(name);
            }
        }
    }
}
