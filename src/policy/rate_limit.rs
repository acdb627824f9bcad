//! Per-client failure counter with a decay window.

use crate::cache::{CacheKeys, KvCache, Namespace};
use crate::config::ApiwardenConfig;
use crate::ApiwardenError;
use std::sync::Arc;
use std::time::Duration;

/// Counts attacker-attributable failures per client id.
///
/// The counter lives in the shared cache so every node sees the same count.
/// Each failure refreshes the window; a success clears it.
#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn KvCache>,
    keys: CacheKeys,
    enabled: bool,
    max_attempts: u64,
    decay: Duration,
}

impl RateLimiter {
    /// Create a limiter from configuration.
    pub fn new(cache: Arc<dyn KvCache>, config: &ApiwardenConfig) -> Self {
        Self {
            cache,
            keys: CacheKeys::new(config.cache_prefix.clone()),
            enabled: config.rate_limit.enabled,
            max_attempts: config.rate_limit.max_attempts,
            decay: config.rate_limit_decay(),
        }
    }

    /// Whether limiting is switched on.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Failures currently recorded for a client id.
    pub fn attempts(&self, client_id: &str) -> Result<u64, ApiwardenError> {
        let value = self.cache.get(&self.key(client_id))?;
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    /// Whether the client id has reached the maximum within the window.
    pub fn is_limited(&self, client_id: &str) -> Result<bool, ApiwardenError> {
        if !self.enabled {
            return Ok(false);
        }
        Ok(self.attempts(client_id)? >= self.max_attempts)
    }

    /// Count one failure and refresh the window. Returns the new count.
    pub fn record_failure(&self, client_id: &str) -> Result<u64, ApiwardenError> {
        if !self.enabled {
            return Ok(0);
        }
        let count = self.cache.increment(&self.key(client_id), self.decay)?;
        if count == self.max_attempts {
            tracing::info!(client_id, attempts = count, "client rate limited");
        }
        Ok(count)
    }

    /// Clear the counter.
    pub fn reset(&self, client_id: &str) -> Result<(), ApiwardenError> {
        self.cache.delete(&self.key(client_id)).map(|_| ())
    }

    fn key(&self, client_id: &str) -> String {
        self.keys.key(Namespace::RateLimit, client_id)
    }
}
