//! Credential lookup and mutation with positive/negative caching.
//!
//! Lookups go cache first. Unknown client ids leave a short-lived negative
//! marker so repeated guesses do not reach the repository. Refilling the
//! usable-credential entry is single-flight: concurrent misses for one
//! client id collapse into one repository read behind a [`CacheMutex`],
//! and a waiter that runs out of patience reads the repository directly.

use crate::cache::lock::{Acquired, CacheMutex};
use crate::cache::{CacheKeys, KvCache, Namespace};
use crate::clock::Clock;
use crate::config::ApiwardenConfig;
use crate::crypto::secret::SealedSecret;
use crate::protocol::models::{Credential, Environment, NewCredential};
use crate::ApiwardenError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Tenant (or other column) restriction added by a tenancy scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeFilter {
    /// Column name.
    pub column: String,
    /// Required value.
    pub value: String,
}

/// Filter for listing credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialQuery {
    /// Only this environment.
    pub environment: Option<Environment>,
    /// Only active (`Some(true)`) or inactive (`Some(false)`) credentials.
    pub active: Option<bool>,
    /// Scope restrictions.
    pub scopes: Vec<ScopeFilter>,
}

/// Backing store for credentials.
pub trait CredentialRepository: Send + Sync {
    /// Look up by client id.
    fn find_by_client_id(&self, client_id: &str) -> Result<Option<Credential>, ApiwardenError>;

    /// Store a new credential and assign its id.
    ///
    /// # Errors
    /// * `DuplicateClientId` - the client id is taken
    fn insert(
        &self,
        credential: NewCredential,
        created_at: DateTime<Utc>,
    ) -> Result<Credential, ApiwardenError>;

    /// Replace the stored record with the same id in one write.
    ///
    /// # Errors
    /// * `CredentialNotFound` - no record with this id
    /// * `DuplicateClientId` - another record already uses the client id
    fn update(&self, credential: &Credential) -> Result<(), ApiwardenError>;

    /// Set `last_used_at` without touching other fields.
    fn touch(&self, id: u64, at: DateTime<Utc>) -> Result<(), ApiwardenError>;

    /// Remove a record. Returns whether it existed.
    fn delete(&self, id: u64) -> Result<bool, ApiwardenError>;

    /// Records matching a query.
    fn list(&self, query: &CredentialQuery) -> Result<Vec<Credential>, ApiwardenError>;
}

/// Cached credential access shared by the verifier and administration.
#[derive(Clone)]
pub struct CredentialStore {
    repository: Arc<dyn CredentialRepository>,
    cache: Arc<dyn KvCache>,
    keys: CacheKeys,
    mutex: CacheMutex,
    clock: Arc<dyn Clock>,
    cache_ttl: Duration,
    negative_ttl: Duration,
    used_debounce: Duration,
    lock_wait: Duration,
}

impl CredentialStore {
    /// Create a store over a repository and the shared cache.
    pub fn new(
        repository: Arc<dyn CredentialRepository>,
        cache: Arc<dyn KvCache>,
        clock: Arc<dyn Clock>,
        config: &ApiwardenConfig,
    ) -> Self {
        Self {
            repository,
            mutex: CacheMutex::new(Arc::clone(&cache), config.lock_ttl()),
            cache,
            keys: CacheKeys::new(config.cache_prefix.clone()),
            clock,
            cache_ttl: config.cache_ttl(),
            negative_ttl: config.negative_cache_ttl(),
            used_debounce: config.last_used_debounce(),
            lock_wait: config.lock_wait(),
        }
    }

    /// Cached lookup of any credential by client id.
    pub fn find_by_client_id(&self, client_id: &str) -> Result<Option<Credential>, ApiwardenError> {
        if let Some(hit) = self.cached_any(client_id) {
            return Ok(hit);
        }
        self.load(client_id, || self.cached_any(client_id))
    }

    /// Cached, single-flight lookup of a usable credential.
    ///
    /// Returns `None` for unknown, inactive and expired credentials.
    pub fn find_active_usable(&self, client_id: &str) -> Result<Option<Credential>, ApiwardenError> {
        if let Some(hit) = self.cached_usable(client_id) {
            return Ok(hit);
        }
        let found = self.load(client_id, || self.cached_usable(client_id))?;
        let now = self.clock.now_utc();
        Ok(found.filter(|c| c.is_usable(now)))
    }

    /// Drop every cache entry for a client id.
    pub fn invalidate(&self, client_id: &str) -> Result<(), ApiwardenError> {
        for namespace in [
            Namespace::Credential,
            Namespace::ActiveCredential,
            Namespace::CredentialMiss,
            Namespace::CredentialUsed,
        ] {
            self.cache.delete(&self.keys.key(namespace, client_id))?;
        }
        Ok(())
    }

    /// Store a new credential.
    pub fn create(&self, credential: NewCredential) -> Result<Credential, ApiwardenError> {
        let client_id = credential.client_id.clone();
        let now = self.clock.now_utc();
        self.write_locked(&client_id, || self.repository.insert(credential, now))
    }

    /// Persist changes to an existing credential.
    pub fn update(&self, credential: &Credential) -> Result<(), ApiwardenError> {
        self.write_locked(&credential.client_id, || self.repository.update(credential))
    }

    /// Persist a credential whose client id changed from `previous_client_id`.
    ///
    /// The previous id stops resolving once this returns.
    pub fn reassign_client_id(
        &self,
        credential: &Credential,
        previous_client_id: &str,
    ) -> Result<(), ApiwardenError> {
        self.write_locked(previous_client_id, || self.repository.update(credential))?;
        self.invalidate_committed(&credential.client_id);
        Ok(())
    }

    /// Switch a credential off.
    pub fn deactivate(&self, credential: &Credential) -> Result<Credential, ApiwardenError> {
        self.set_active(credential, false)
    }

    /// Switch a credential back on.
    pub fn activate(&self, credential: &Credential) -> Result<Credential, ApiwardenError> {
        self.set_active(credential, true)
    }

    fn set_active(&self, credential: &Credential, active: bool) -> Result<Credential, ApiwardenError> {
        let mut updated = credential.clone();
        updated.is_active = active;
        self.update(&updated)?;
        Ok(updated)
    }

    /// Install a new secret, keeping the current one valid for `grace_days`.
    ///
    /// Both secrets are written in a single update, so a request signed with
    /// the previous secret keeps validating throughout.
    pub fn rotate_secret(
        &self,
        credential: &Credential,
        new_secret: SealedSecret,
        grace_days: u32,
    ) -> Result<Credential, ApiwardenError> {
        let now = self.clock.now_utc();
        let mut updated = credential.clone();
        let previous = std::mem::replace(&mut updated.secret, new_secret);
        updated.old_secret = Some(previous);
        updated.old_secret_expires_at = Some(
            now.checked_add_signed(chrono::Duration::days(i64::from(grace_days)))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        );
        self.update(&updated)?;
        Ok(updated)
    }

    /// Record a use, writing at most once per debounce interval.
    ///
    /// Returns whether a write happened.
    pub fn mark_used(&self, credential: &Credential) -> Result<bool, ApiwardenError> {
        let key = self.keys.key(Namespace::CredentialUsed, &credential.client_id);
        if !self.cache.set_if_absent(&key, "1", self.used_debounce)? {
            return Ok(false);
        }
        self.repository.touch(credential.id, self.clock.now_utc())?;
        Ok(true)
    }

    /// Remove a credential permanently.
    pub fn delete(&self, credential: &Credential) -> Result<bool, ApiwardenError> {
        self.write_locked(&credential.client_id, || self.repository.delete(credential.id))
    }

    /// List credentials, uncached.
    pub fn list(&self, query: &CredentialQuery) -> Result<Vec<Credential>, ApiwardenError> {
        self.repository.list(query)
    }

    /// Run a repository write while holding the client id's refill lock,
    /// then drop its cache entries.
    ///
    /// Holding the lock keeps an in-flight refill from caching a snapshot
    /// taken before the write. Once the write commits the result is `Ok`,
    /// even if the cache could not be reached.
    fn write_locked<T>(
        &self,
        client_id: &str,
        write: impl FnOnce() -> Result<T, ApiwardenError>,
    ) -> Result<T, ApiwardenError> {
        let lock_key = self.keys.key(Namespace::CredentialLock, client_id);
        let guard = match self.mutex.acquire(&lock_key, self.lock_wait) {
            Ok(Some(guard)) => Some(guard),
            Ok(None) => {
                tracing::warn!(client_id, "credential lock wait timed out, writing without it");
                None
            }
            Err(e) => {
                tracing::warn!(client_id, error = %e, "credential lock unavailable, writing without it");
                None
            }
        };

        let written = write()?;
        self.invalidate_committed(client_id);
        drop(guard);
        Ok(written)
    }

    fn invalidate_committed(&self, client_id: &str) {
        if let Err(e) = self.invalidate(client_id) {
            tracing::warn!(client_id, error = %e, "cache invalidation failed after committed write");
        }
    }

    /// Single-flight repository read that refills the cache.
    ///
    /// Waiters poll `cached` and take the holder's result as soon as it
    /// lands. A waiter that runs out of time, or cannot reach the lock at
    /// all, reads the repository directly without caching.
    fn load(
        &self,
        client_id: &str,
        cached: impl Fn() -> Option<Option<Credential>>,
    ) -> Result<Option<Credential>, ApiwardenError> {
        let lock_key = self.keys.key(Namespace::CredentialLock, client_id);
        let guard = match self.mutex.acquire_unless(&lock_key, self.lock_wait, &cached) {
            Ok(Acquired::Locked(guard)) => guard,
            Ok(Acquired::Ready(hit)) => return Ok(hit),
            Ok(Acquired::TimedOut) => {
                tracing::warn!(client_id, "credential lock wait timed out, reading directly");
                return self.repository.find_by_client_id(client_id);
            }
            Err(e) => {
                tracing::warn!(client_id, error = %e, "credential lock unavailable, reading directly");
                return self.repository.find_by_client_id(client_id);
            }
        };

        // Another holder may have filled the cache before we won the lock
        if let Some(hit) = cached() {
            return Ok(hit);
        }
        let found = self.repository.find_by_client_id(client_id)?;
        self.fill(client_id, found.as_ref());

        match guard.release() {
            Ok(true) => {}
            Ok(false) => {
                // The lock expired mid-refill, so a write may have slipped in
                tracing::warn!(client_id, "credential lock expired during refill, dropping cached entry");
                self.invalidate_committed(client_id);
            }
            Err(e) => tracing::warn!(client_id, error = %e, "failed to release credential lock"),
        }
        Ok(found)
    }

    fn fill(&self, client_id: &str, found: Option<&Credential>) {
        match found {
            Some(credential) => {
                self.remember(&self.keys.key(Namespace::Credential, client_id), credential);
                if credential.is_usable(self.clock.now_utc()) {
                    self.remember(
                        &self.keys.key(Namespace::ActiveCredential, client_id),
                        credential,
                    );
                }
            }
            None => self.remember_missing(client_id),
        }
    }

    /// Answer from cache alone: `Some(result)` on a definitive hit, `None` to load.
    fn cached_any(&self, client_id: &str) -> Option<Option<Credential>> {
        if let Some(credential) = self.cached(&self.keys.key(Namespace::Credential, client_id)) {
            return Some(Some(credential));
        }
        if self.is_known_missing(client_id) {
            return Some(None);
        }
        None
    }

    /// Like [`Self::cached_any`], with unusable records filtered out.
    fn cached_usable(&self, client_id: &str) -> Option<Option<Credential>> {
        let now = self.clock.now_utc();
        let active_key = self.keys.key(Namespace::ActiveCredential, client_id);
        if let Some(credential) = self.cached(&active_key) {
            return Some(Some(credential).filter(|c| c.is_usable(now)));
        }
        self.cached_any(client_id)
            .map(|hit| hit.filter(|c| c.is_usable(now)))
    }

    fn cached(&self, key: &str) -> Option<Credential> {
        match self.cache.get(key) {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(credential) => Some(credential),
                Err(e) => {
                    tracing::warn!(error = %e, "discarding undecodable cached credential");
                    let _ = self.cache.delete(key);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "credential cache read failed");
                None
            }
        }
    }

    fn is_known_missing(&self, client_id: &str) -> bool {
        self.cache
            .exists(&self.keys.key(Namespace::CredentialMiss, client_id))
            .unwrap_or(false)
    }

    fn remember(&self, key: &str, credential: &Credential) {
        let json = match serde_json::to_string(credential) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize credential for cache");
                return;
            }
        };
        if let Err(e) = self.cache.set(key, &json, self.cache_ttl) {
            tracing::warn!(error = %e, "credential cache write failed");
        }
    }

    fn remember_missing(&self, client_id: &str) {
        let key = self.keys.key(Namespace::CredentialMiss, client_id);
        if let Err(e) = self.cache.set(&key, "1", self.negative_ttl) {
            tracing::warn!(error = %e, "negative cache write failed");
        }
    }
}
