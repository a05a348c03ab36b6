//! Exclusive, time-bounded path locks.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

#[derive(Debug, Clone)]
struct PathLock {
    user_id: String,
    acquired_at: Instant,
    ttl: Duration,
}

impl PathLock {
    fn new(user_id: &str, ttl: Duration) -> Self {
        Self {
            user_id: user_id.to_owned(),
            acquired_at: Instant::now(),
            ttl,
        }
    }

    fn live(&self) -> bool {
        self.acquired_at.elapsed() < self.ttl
    }
}

/// Outcome of a lock acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    /// The caller now holds the lock.
    Acquired,
    /// A live lock is held by this other user.
    Held(String),
}

/// Path → (owner, expiry) registry. Expiry is lazy: an expired lock is
/// simply treated as absent on the next access.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: DashMap<String, PathLock>,
}

impl LockTable {
    /// Acquire the exclusive lock on `path`. A repeat acquire by the holder
    /// renews the lock with a fresh TTL.
    pub fn acquire(&self, path: &str, user_id: &str, ttl: Duration) -> LockAttempt {
        match self.locks.entry(path.to_owned()) {
            Entry::Occupied(mut held) => {
                let lock = held.get();
                if lock.live() && lock.user_id != user_id {
                    return LockAttempt::Held(lock.user_id.clone());
                }
                held.insert(PathLock::new(user_id, ttl));
                LockAttempt::Acquired
            }
            Entry::Vacant(slot) => {
                slot.insert(PathLock::new(user_id, ttl));
                LockAttempt::Acquired
            }
        }
    }

    /// Release `path` if held by `user_id`; returns whether a live lock was
    /// actually released.
    pub fn release(&self, path: &str, user_id: &str) -> bool {
        self.locks
            .remove_if(path, |_, lock| lock.live() && lock.user_id == user_id)
            .is_some()
    }

    /// Current live owner of `path`, if any.
    pub fn holder(&self, path: &str) -> Option<String> {
        self.locks
            .get(path)
            .and_then(|lock| lock.live().then(|| lock.user_id.clone()))
    }
}
