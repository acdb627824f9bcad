//! Distributed mutex over the shared cache.
//!
//! A lock is a cache entry holding a random owner token with a TTL, so a
//! crashed holder can never wedge other nodes. Release only deletes the
//! entry if the token still matches.

use crate::cache::KvCache;
use crate::ApiwardenError;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Interval between acquisition attempts while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Cache-backed mutex with bounded acquisition wait.
#[derive(Clone)]
pub struct CacheMutex {
    cache: Arc<dyn KvCache>,
    ttl: Duration,
}

impl CacheMutex {
    /// Create a mutex whose locks expire after `ttl`.
    pub fn new(cache: Arc<dyn KvCache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// Try once to take the lock at `key`.
    pub fn try_acquire(&self, key: &str) -> Result<Option<LockGuard>, ApiwardenError> {
        let owner = hex::encode(rand::random::<[u8; 16]>());
        if self.cache.set_if_absent(key, &owner, self.ttl)? {
            Ok(Some(LockGuard {
                cache: Arc::clone(&self.cache),
                key: key.to_string(),
                owner,
                released: false,
            }))
        } else {
            Ok(None)
        }
    }

    /// Take the lock, waiting at most `wait`. Returns `None` on timeout.
    pub fn acquire(&self, key: &str, wait: Duration) -> Result<Option<LockGuard>, ApiwardenError> {
        match self.acquire_unless(key, wait, || None::<()>)? {
            Acquired::Locked(guard) => Ok(Some(guard)),
            Acquired::Ready(()) | Acquired::TimedOut => Ok(None),
        }
    }

    /// Take the lock, waiting at most `wait`, unless `ready` produces a
    /// value first. `ready` is polled between attempts, so a waiter can pick
    /// up work the current holder finished.
    pub fn acquire_unless<T>(
        &self,
        key: &str,
        wait: Duration,
        mut ready: impl FnMut() -> Option<T>,
    ) -> Result<Acquired<T>, ApiwardenError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(guard) = self.try_acquire(key)? {
                return Ok(Acquired::Locked(guard));
            }
            if Instant::now() >= deadline {
                return Ok(Acquired::TimedOut);
            }
            std::thread::sleep(POLL_INTERVAL);
            if let Some(value) = ready() {
                return Ok(Acquired::Ready(value));
            }
        }
    }
}

/// Outcome of [`CacheMutex::acquire_unless`].
pub enum Acquired<T> {
    /// The lock is ours.
    Locked(LockGuard),
    /// Someone else produced the value while we waited.
    Ready(T),
    /// The wait ran out.
    TimedOut,
}

/// Held lock. Released on drop if not released explicitly.
pub struct LockGuard {
    cache: Arc<dyn KvCache>,
    key: String,
    owner: String,
    released: bool,
}

impl LockGuard {
    /// Release the lock. Returns false if it had already expired or changed hands.
    pub fn release(mut self) -> Result<bool, ApiwardenError> {
        self.released = true;
        self.cache.delete_if_equals(&self.key, &self.owner)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.cache.delete_if_equals(&self.key, &self.owner) {
            tracing::warn!(key = %self.key, error = %e, "failed to release cache lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryCache;
    use crate::clock::MockClock;

    fn setup() -> (Arc<MockClock>, Arc<MemoryCache>, CacheMutex) {
        let clock = Arc::new(MockClock::at_unix(1_704_067_200));
        let cache = Arc::new(MemoryCache::new(clock.clone()));
        let mutex = CacheMutex::new(cache.clone(), Duration::from_secs(10));
        (clock, cache, mutex)
    }

    #[test]
    fn test_exclusive_until_released() {
        let (_clock, _cache, mutex) = setup();
        let guard = mutex.try_acquire("lock").unwrap().unwrap();
        assert!(mutex.try_acquire("lock").unwrap().is_none());
        assert!(guard.release().unwrap());
        assert!(mutex.try_acquire("lock").unwrap().is_some());
    }

    #[test]
    fn test_drop_releases() {
        let (_clock, _cache, mutex) = setup();
        {
            let _guard = mutex.try_acquire("lock").unwrap().unwrap();
        }
        assert!(mutex.try_acquire("lock").unwrap().is_some());
    }

    #[test]
    fn test_bounded_wait_times_out() {
        let (_clock, _cache, mutex) = setup();
        let _held = mutex.try_acquire("lock").unwrap().unwrap();
        let started = Instant::now();
        let second = mutex.acquire("lock", Duration::from_millis(50)).unwrap();
        assert!(second.is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_expired_lock_is_not_released_by_old_owner() {
        let (clock, _cache, mutex) = setup();
        let stale = mutex.try_acquire("lock").unwrap().unwrap();
        clock.advance_secs(11);
        let fresh = mutex.try_acquire("lock").unwrap().unwrap();

        // The stale holder must not free the new owner's lock
        assert!(!stale.release().unwrap());
        assert!(mutex.try_acquire("lock").unwrap().is_none());
        drop(fresh);
    }

    #[test]
    fn test_waiter_takes_ready_value_instead_of_lock() {
        let (_clock, _cache, mutex) = setup();
        let _held = mutex.try_acquire("lock").unwrap().unwrap();
        let mut polls = 0;
        let outcome = mutex
            .acquire_unless("lock", Duration::from_secs(2), || {
                polls += 1;
                (polls == 3).then_some("filled")
            })
            .unwrap();
        assert!(matches!(outcome, Acquired::Ready("filled")));
    }

    #[test]
    fn test_unreachable_cache_is_an_error() {
        let (_clock, cache, mutex) = setup();
        cache.set_offline(true);
        assert!(matches!(
            mutex.try_acquire("lock"),
            Err(ApiwardenError::CacheUnavailable(_))
        ));
    }
}
