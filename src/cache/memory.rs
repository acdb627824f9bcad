//! In-process cache backend.
//!
//! Suitable for single-node deployments and tests. Expiry follows the
//! injected clock; expired entries are dropped lazily on access and in bulk
//! by [`MemoryCache::purge_expired`].

use crate::cache::KvCache;
use crate::clock::Clock;
use crate::ApiwardenError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Mutex-guarded in-memory [`KvCache`].
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    offline: AtomicBool,
}

impl MemoryCache {
    /// Create an empty cache driven by the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            offline: AtomicBool::new(false),
        }
    }

    /// Simulate the backend becoming unreachable.
    #[cfg(any(test, feature = "test-seams"))]
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Drop every expired entry. Returns the count removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_utc();
        let mut entries = self.lock_entries();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    /// Number of stored entries, including not-yet-purged expired ones.
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_online(&self) -> Result<(), ApiwardenError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ApiwardenError::CacheUnavailable(
                "memory cache is offline".to_string(),
            ));
        }
        Ok(())
    }

    fn expiry(&self, ttl: Duration) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        self.clock.now_utc() + ttl
    }

    /// Live entry for `key`, removing it if expired.
    fn live<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<&'a mut Entry> {
        let expired = entries.get(key).is_some_and(|e| e.expires_at <= now);
        if expired {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

impl KvCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>, ApiwardenError> {
        self.ensure_online()?;
        let now = self.clock.now_utc();
        let mut entries = self.lock_entries();
        Ok(Self::live(&mut entries, key, now).map(|e| e.value.clone()))
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), ApiwardenError> {
        self.ensure_online()?;
        let expires_at = self.expiry(ttl);
        self.lock_entries().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, ApiwardenError> {
        self.ensure_online()?;
        let now = self.clock.now_utc();
        let expires_at = self.expiry(ttl);
        let mut entries = self.lock_entries();
        if Self::live(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(true)
    }

    fn delete(&self, key: &str) -> Result<bool, ApiwardenError> {
        self.ensure_online()?;
        let now = self.clock.now_utc();
        let mut entries = self.lock_entries();
        Ok(entries.remove(key).is_some_and(|e| e.expires_at > now))
    }

    fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, ApiwardenError> {
        self.ensure_online()?;
        let now = self.clock.now_utc();
        let mut entries = self.lock_entries();
        let matches = Self::live(&mut entries, key, now).is_some_and(|e| e.value == expected);
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    fn increment(&self, key: &str, ttl: Duration) -> Result<u64, ApiwardenError> {
        self.ensure_online()?;
        let now = self.clock.now_utc();
        let expires_at = self.expiry(ttl);
        let mut entries = self.lock_entries();

        let current = Self::live(&mut entries, key, now)
            .map(|e| e.value.parse::<u64>())
            .transpose()
            .map_err(|e| ApiwardenError::Serialization(format!("Counter {} is not numeric: {}", key, e)))?
            .unwrap_or(0);
        let next = current.saturating_add(1);

        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    fn delete_prefix(&self, prefix: &str) -> Result<usize, ApiwardenError> {
        self.ensure_online()?;
        let mut entries = self.lock_entries();
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn cache() -> (Arc<MockClock>, MemoryCache) {
        let clock = Arc::new(MockClock::at_unix(1_704_067_200));
        let cache = MemoryCache::new(clock.clone());
        (clock, cache)
    }

    #[test]
    fn test_set_get_and_expiry() {
        let (clock, cache) = cache();
        cache.set("k", "v", Duration::from_secs(10)).unwrap();
        assert_eq!(cache.get("k").unwrap().as_deref(), Some("v"));

        clock.advance_secs(10);
        assert_eq!(cache.get("k").unwrap(), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_set_if_absent_is_exclusive() {
        let (clock, cache) = cache();
        assert!(cache.set_if_absent("k", "a", Duration::from_secs(5)).unwrap());
        assert!(!cache.set_if_absent("k", "b", Duration::from_secs(5)).unwrap());
        assert_eq!(cache.get("k").unwrap().as_deref(), Some("a"));

        clock.advance_secs(6);
        assert!(cache.set_if_absent("k", "b", Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn test_increment_refreshes_ttl() {
        let (clock, cache) = cache();
        assert_eq!(cache.increment("c", Duration::from_secs(60)).unwrap(), 1);
        clock.advance_secs(50);
        assert_eq!(cache.increment("c", Duration::from_secs(60)).unwrap(), 2);
        clock.advance_secs(50);
        // Still alive because the second increment refreshed the TTL
        assert_eq!(cache.get("c").unwrap().as_deref(), Some("2"));
        clock.advance_secs(11);
        assert_eq!(cache.increment("c", Duration::from_secs(60)).unwrap(), 1);
    }

    #[test]
    fn test_delete_if_equals() {
        let (_clock, cache) = cache();
        cache.set("lock", "owner-a", Duration::from_secs(5)).unwrap();
        assert!(!cache.delete_if_equals("lock", "owner-b").unwrap());
        assert!(cache.exists("lock").unwrap());
        assert!(cache.delete_if_equals("lock", "owner-a").unwrap());
        assert!(!cache.exists("lock").unwrap());
    }

    #[test]
    fn test_delete_prefix() {
        let (_clock, cache) = cache();
        cache.set("a:1", "x", Duration::from_secs(5)).unwrap();
        cache.set("a:2", "x", Duration::from_secs(5)).unwrap();
        cache.set("b:1", "x", Duration::from_secs(5)).unwrap();
        assert_eq!(cache.delete_prefix("a:").unwrap(), 2);
        assert!(cache.exists("b:1").unwrap());
    }

    #[test]
    fn test_purge_expired() {
        let (clock, cache) = cache();
        cache.set("short", "x", Duration::from_secs(1)).unwrap();
        cache.set("long", "x", Duration::from_secs(100)).unwrap();
        clock.advance_secs(2);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_offline_fails_every_operation() {
        let (_clock, cache) = cache();
        cache.set_offline(true);
        assert!(matches!(
            cache.get("k"),
            Err(ApiwardenError::CacheUnavailable(_))
        ));
        assert!(cache.set_if_absent("k", "v", Duration::from_secs(1)).is_err());
        assert!(cache.increment("k", Duration::from_secs(1)).is_err());
        cache.set_offline(false);
        assert!(cache.get("k").unwrap().is_none());
    }
}
