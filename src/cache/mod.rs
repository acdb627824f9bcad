//! Shared key-value cache layer.
//!
//! All cross-request state (nonces, rate counters, credential records,
//! negative markers, refill locks) lives behind [`KvCache`]. TTLs are the
//! only mechanism bounding memory; there is no other eviction.

pub mod lock;
pub mod memory;

use crate::ApiwardenError;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// TTL-capable key-value cache shared by all requests.
///
/// Implementations must make `set_if_absent`, `delete_if_equals` and
/// `increment` atomic at the cache layer.
pub trait KvCache: Send + Sync {
    /// Read a live value.
    fn get(&self, key: &str) -> Result<Option<String>, ApiwardenError>;

    /// Write a value with a TTL, replacing any existing value.
    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), ApiwardenError>;

    /// Write a value only if no live value exists. Returns whether it was written.
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, ApiwardenError>;

    /// Whether a live value exists.
    fn exists(&self, key: &str) -> Result<bool, ApiwardenError> {
        Ok(self.get(key)?.is_some())
    }

    /// Remove a value. Returns whether a live value was removed.
    fn delete(&self, key: &str) -> Result<bool, ApiwardenError>;

    /// Remove a value only if it currently equals `expected`.
    fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, ApiwardenError>;

    /// Increment a counter, creating it at 1, and refresh its TTL.
    fn increment(&self, key: &str, ttl: Duration) -> Result<u64, ApiwardenError>;

    /// Remove every key starting with `prefix`. Returns the count removed.
    fn delete_prefix(&self, prefix: &str) -> Result<usize, ApiwardenError>;
}

/// Logical stores sharing the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Cached credential records by client id.
    Credential,
    /// Cached usable credentials by client id.
    ActiveCredential,
    /// Negative lookup markers.
    CredentialMiss,
    /// `last_used_at` debounce markers.
    CredentialUsed,
    /// Credential refill locks.
    CredentialLock,
    /// Consumed nonces.
    Nonce,
    /// Failure counters.
    RateLimit,
}

impl Namespace {
    fn segment(self) -> &'static str {
        match self {
            Namespace::Credential => "cred",
            Namespace::ActiveCredential => "cred-active",
            Namespace::CredentialMiss => "cred-miss",
            Namespace::CredentialUsed => "cred-used",
            Namespace::CredentialLock => "cred-lock",
            Namespace::Nonce => "nonce",
            Namespace::RateLimit => "rate",
        }
    }
}

/// Builds namespaced cache keys.
#[derive(Debug, Clone)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    /// Create a key builder with the configured prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Key for an identifier within a namespace.
    ///
    /// Identifiers are client-supplied, so only their digest becomes key
    /// material; this bounds key length and keeps raw values out of the cache.
    pub fn key(&self, namespace: Namespace, identifier: &str) -> String {
        format!(
            "{}:{}:{}",
            self.prefix,
            namespace.segment(),
            digest_identifier(identifier)
        )
    }

    /// Prefix covering every key in a namespace.
    pub fn namespace_prefix(&self, namespace: Namespace) -> String {
        format!("{}:{}:", self.prefix, namespace.segment())
    }
}

/// SHA-256 hex digest of an identifier.
pub fn digest_identifier(identifier: &str) -> String {
    hex::encode(Sha256::digest(identifier.as_bytes()))
}
