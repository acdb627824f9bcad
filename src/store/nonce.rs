//! Cache-backed nonce store for replay attack prevention.

use crate::cache::{CacheKeys, KvCache, Namespace};
use crate::config::ApiwardenConfig;
use crate::ApiwardenError;
use std::sync::Arc;
use std::time::Duration;

/// What to do when the backing cache cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceFailurePolicy {
    /// Treat the nonce as unverifiable and reject.
    FailClosed,
    /// Accept the nonce without replay protection.
    FailOpen,
}

/// Result of admitting a nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceVerdict {
    /// First use; now recorded.
    Fresh,
    /// Seen within its TTL.
    Replayed,
    /// The store could not be consulted and policy is fail-closed.
    Unverifiable,
}

/// TTL-keyed record of consumed nonces shared across nodes.
#[derive(Clone)]
pub struct NonceStore {
    cache: Arc<dyn KvCache>,
    keys: CacheKeys,
    ttl: Duration,
    policy: NonceFailurePolicy,
    production: bool,
}

impl NonceStore {
    /// Create a nonce store from configuration.
    pub fn new(cache: Arc<dyn KvCache>, config: &ApiwardenConfig) -> Self {
        let policy = if config.nonce_fail_open {
            NonceFailurePolicy::FailOpen
        } else {
            NonceFailurePolicy::FailClosed
        };
        Self {
            cache,
            keys: CacheKeys::new(config.cache_prefix.clone()),
            ttl: config.nonce_ttl(),
            policy,
            production: config.is_production(),
        }
    }

    /// Configured failure policy.
    pub fn policy(&self) -> NonceFailurePolicy {
        self.policy
    }

    /// Whether the nonce has been recorded within its TTL.
    pub fn exists(&self, nonce: &str) -> Result<bool, ApiwardenError> {
        self.cache.exists(&self.keys.key(Namespace::Nonce, nonce))
    }

    /// Record a nonce. Idempotent.
    pub fn store(&self, nonce: &str) -> Result<(), ApiwardenError> {
        self.cache
            .set_if_absent(&self.keys.key(Namespace::Nonce, nonce), "1", self.ttl)
            .map(|_| ())
    }

    /// Atomically check and record a nonce, applying the failure policy.
    ///
    /// Two concurrent requests with the same nonce cannot both see `Fresh`.
    pub fn admit(&self, nonce: &str) -> NonceVerdict {
        let key = self.keys.key(Namespace::Nonce, nonce);
        match self.cache.set_if_absent(&key, "1", self.ttl) {
            Ok(true) => NonceVerdict::Fresh,
            Ok(false) => NonceVerdict::Replayed,
            Err(e) => match self.policy {
                NonceFailurePolicy::FailClosed => {
                    tracing::warn!(error = %e, "nonce store unavailable, rejecting (fail-closed)");
                    NonceVerdict::Unverifiable
                }
                NonceFailurePolicy::FailOpen => {
                    tracing::warn!(error = %e, "nonce store unavailable, accepting (fail-open)");
                    NonceVerdict::Fresh
                }
            },
        }
    }

    /// Forget every recorded nonce.
    ///
    /// # Errors
    /// * `OperationNotPermitted` - in production, where this would reset replay protection
    pub fn clear(&self) -> Result<usize, ApiwardenError> {
        if self.production {
            return Err(ApiwardenError::OperationNotPermitted(
                "clearing the nonce store is disabled in production".to_string(),
            ));
        }
        let removed = self
            .cache
            .delete_prefix(&self.keys.namespace_prefix(Namespace::Nonce))?;
        tracing::info!(removed, "nonce store cleared");
        Ok(removed)
    }
}
