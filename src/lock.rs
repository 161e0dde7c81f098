// src/lock.rs

//! Advisory update lock
//!
//! Only one update run may be in flight per installation. The lock is a flag
//! plus an acquisition timestamp kept in the option store, so it survives the
//! process that took it. A lock older than [`LOCK_TTL_SECS`] is treated as
//! abandoned by a crashed run and cleared the next time anyone looks at it.
//!
//! The lock never reports errors: store failures are logged and the lock
//! behaves as if it were free.

use crate::store::OptionStore;
use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info, warn};

/// Seconds after which a held lock is considered abandoned
pub const LOCK_TTL_SECS: i64 = 600;

const LOCK_OPTION: &str = "update_lock";
const LOCK_TIME_OPTION: &str = "update_lock_time";

/// Mutual exclusion between update runs
pub trait UpdateLock {
    /// Take the lock; no-op if it is already held
    fn lock(&self);

    /// Whether the lock is held, clearing it first if it has expired
    fn is_locked(&self) -> bool;

    /// Release the lock unconditionally; safe to call when not held
    fn unlock(&self);

    /// Clear the lock if it has expired; returns true if it was cleared
    fn release_if_expired(&self) -> bool;
}

/// [`UpdateLock`] stored as two options
pub struct OptionLock<'a> {
    store: &'a dyn OptionStore,
    ttl_secs: i64,
}

impl<'a> OptionLock<'a> {
    pub fn new(store: &'a dyn OptionStore) -> Self {
        Self {
            store,
            ttl_secs: LOCK_TTL_SECS,
        }
    }

    /// When the current holder took the lock, if anyone holds it
    pub fn acquired_at(&self) -> Option<DateTime<Utc>> {
        self.acquired_timestamp()
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
    }

    fn acquired_timestamp(&self) -> Option<i64> {
        match self.store.get_option(LOCK_TIME_OPTION) {
            Ok(value) => value.and_then(|v| v.parse().ok()),
            Err(e) => {
                warn!("Failed to read lock timestamp: {}", e);
                None
            }
        }
    }

    fn flag_set(&self) -> bool {
        match self.store.get_option(LOCK_OPTION) {
            Ok(value) => value.as_deref() == Some("1"),
            Err(e) => {
                warn!("Failed to read lock flag: {}", e);
                false
            }
        }
    }
}

impl UpdateLock for OptionLock<'_> {
    fn lock(&self) {
        if self.is_locked() {
            debug!("Update lock already held");
            return;
        }

        let now = Utc::now().timestamp();
        // Time first: a flag without a time is treated as abandoned
        if let Err(e) = self
            .store
            .set_option(LOCK_TIME_OPTION, &now.to_string())
            .and_then(|_| self.store.set_option(LOCK_OPTION, "1"))
        {
            warn!("Failed to persist update lock: {}", e);
            return;
        }
        debug!("Update lock acquired at {}", now);
    }

    fn is_locked(&self) -> bool {
        if self.release_if_expired() {
            return false;
        }
        self.flag_set()
    }

    fn unlock(&self) {
        for name in [LOCK_OPTION, LOCK_TIME_OPTION] {
            if let Err(e) = self.store.delete_option(name) {
                warn!("Failed to clear {}: {}", name, e);
            }
        }
        debug!("Update lock released");
    }

    fn release_if_expired(&self) -> bool {
        let Some(acquired) = self.acquired_timestamp() else {
            if self.flag_set() {
                warn!("Clearing update lock with no valid acquisition time");
                self.unlock();
                return true;
            }
            return false;
        };

        let age = Utc::now().timestamp() - acquired;
        if age > self.ttl_secs {
            info!("Clearing abandoned update lock ({}s old)", age);
            self.unlock();
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn held_since(store: &MemoryStore, seconds_ago: i64) {
        store.set_option(LOCK_OPTION, "1").unwrap();
        store
            .set_option(
                LOCK_TIME_OPTION,
                &(Utc::now().timestamp() - seconds_ago).to_string(),
            )
            .unwrap();
    }

    #[test]
    fn test_lock_and_unlock() {
        let store = MemoryStore::new();
        let lock = OptionLock::new(&store);

        assert!(!lock.is_locked());
        lock.lock();
        assert!(lock.is_locked());
        assert!(lock.acquired_at().is_some());

        lock.unlock();
        assert!(!lock.is_locked());
        assert!(store.get_option(LOCK_TIME_OPTION).unwrap().is_none());
    }

    #[test]
    fn test_repeated_lock_keeps_first_timestamp() {
        let store = MemoryStore::new();
        held_since(&store, 100);
        let first = store.get_option(LOCK_TIME_OPTION).unwrap();

        let lock = OptionLock::new(&store);
        lock.lock();
        lock.lock();

        assert_eq!(store.get_option(LOCK_TIME_OPTION).unwrap(), first);
        assert!(lock.is_locked());
    }

    #[test]
    fn test_lock_just_under_ttl_is_held() {
        let store = MemoryStore::new();
        held_since(&store, 599);

        let lock = OptionLock::new(&store);
        assert!(lock.is_locked());
        assert_eq!(store.get_option(LOCK_OPTION).unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_lock_just_over_ttl_is_cleared() {
        let store = MemoryStore::new();
        held_since(&store, 601);

        let lock = OptionLock::new(&store);
        assert!(!lock.is_locked());
        assert!(store.get_option(LOCK_OPTION).unwrap().is_none());
        assert!(store.get_option(LOCK_TIME_OPTION).unwrap().is_none());
    }

    #[test]
    fn test_expired_lock_can_be_retaken() {
        let store = MemoryStore::new();
        held_since(&store, 3600);

        let lock = OptionLock::new(&store);
        lock.lock();

        assert!(lock.is_locked());
        let age = Utc::now().timestamp() - lock.acquired_at().unwrap().timestamp();
        assert!(age < 5);
    }

    #[test]
    fn test_release_if_expired_leaves_fresh_lock() {
        let store = MemoryStore::new();
        let lock = OptionLock::new(&store);

        assert!(!lock.release_if_expired());

        lock.lock();
        assert!(!lock.release_if_expired());
        assert!(lock.is_locked());

        held_since(&store, 700);
        assert!(lock.release_if_expired());
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_flag_without_time_is_abandoned() {
        let store = MemoryStore::new();
        store.set_option(LOCK_OPTION, "1").unwrap();

        let lock = OptionLock::new(&store);
        assert!(lock.release_if_expired());
        assert!(!lock.is_locked());
        assert!(store.get_option(LOCK_OPTION).unwrap().is_none());
    }

    #[test]
    fn test_flag_with_unparseable_time_is_abandoned() {
        let store = MemoryStore::new();
        store.set_option(LOCK_OPTION, "1").unwrap();
        store.set_option(LOCK_TIME_OPTION, "garbage").unwrap();

        let lock = OptionLock::new(&store);
        assert!(!lock.is_locked());
        assert!(store.get_option(LOCK_TIME_OPTION).unwrap().is_none());

        lock.lock();
        assert!(lock.is_locked());
    }

    #[test]
    fn test_time_without_flag_is_unlocked() {
        let store = MemoryStore::new();
        store
            .set_option(LOCK_TIME_OPTION, &Utc::now().timestamp().to_string())
            .unwrap();

        let lock = OptionLock::new(&store);
        assert!(!lock.release_if_expired());
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_unlock_is_idempotent() {
        let store = MemoryStore::new();
        let lock = OptionLock::new(&store);
        lock.unlock();
        lock.unlock();
        assert!(!lock.is_locked());
    }
}
