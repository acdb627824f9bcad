//! Apiwarden configuration.
//!
//! A single validated, immutable value built once at startup and shared
//! behind `Arc` with every component.

use crate::crypto::hmac::Algorithm;
use crate::protocol::models::Environment;
use crate::ApiwardenError;
use serde::Deserialize;
use std::time::Duration;

/// Configuration for HMAC request verification.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiwardenConfig {
    /// Global kill switch. When false, requests bypass verification entirely.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Signing algorithm assigned to newly generated credentials.
    #[serde(default)]
    pub algorithm: Algorithm,

    /// Maximum allowed distance between request timestamp and now, in seconds.
    #[serde(default = "default_timestamp_tolerance")]
    pub timestamp_tolerance_seconds: u64,

    /// How long a consumed nonce is remembered, in seconds.
    /// Must be at least twice the timestamp tolerance.
    #[serde(default = "default_nonce_ttl")]
    pub nonce_ttl_seconds: u64,

    /// Minimum accepted nonce length in characters.
    #[serde(default = "default_min_nonce_length")]
    pub min_nonce_length: usize,

    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Per-client failure rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Per-IP blocking driven by the request log.
    #[serde(default)]
    pub ip_blocking: IpBlockingConfig,

    /// Require the credential environment to match the deployment.
    #[serde(default = "default_true")]
    pub enforce_environment: bool,

    /// Name of the current deployment ("production", "staging", "local", ...).
    #[serde(default = "default_deployment_environment")]
    pub deployment_environment: String,

    /// TTL of the negative lookup marker, in seconds.
    #[serde(default = "default_negative_cache_ttl")]
    pub negative_cache_ttl_seconds: u64,

    /// TTL of cached credential records, in seconds.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,

    /// Minimum interval between `last_used_at` writes per credential, in seconds.
    #[serde(default = "default_last_used_debounce")]
    pub last_used_debounce_seconds: u64,

    /// Bounded wait for the credential refill lock, in milliseconds.
    #[serde(default = "default_lock_wait_millis")]
    pub lock_wait_millis: u64,

    /// Lifetime of the credential refill lock, in seconds.
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_seconds: u64,

    /// Namespace prefix for every cache key.
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,

    /// Accept requests when the nonce store is unreachable.
    #[serde(default)]
    pub nonce_fail_open: bool,

    /// Header names carrying the authentication fields.
    #[serde(default)]
    pub headers: HeaderNames,

    /// Optional tenant scoping of credentials.
    #[serde(default)]
    pub tenancy: TenancyConfig,

    /// Record successful attempts in the request log (failures are always recorded).
    #[serde(default = "default_true")]
    pub log_successful_requests: bool,

    /// Days request-log entries are retained before purge.
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,

    /// Rows deleted per purge batch.
    #[serde(default = "default_purge_batch_size")]
    pub purge_batch_size: usize,

    /// Grace period applied by secret rotation when none is given, in days.
    #[serde(default = "default_grace_days")]
    pub default_grace_days: u32,
}

/// Failure rate limiting per client id.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Whether rate limiting is applied.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Failures within the decay window before the client is limited.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u64,
    /// Length of the decay window in minutes.
    #[serde(default = "default_decay_minutes")]
    pub decay_minutes: u64,
}

/// IP blocking based on recent failed attempts.
#[derive(Debug, Clone, Deserialize)]
pub struct IpBlockingConfig {
    /// Whether IP blocking is applied.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Failed attempts within the window that block an IP.
    #[serde(default = "default_ip_threshold")]
    pub threshold: u64,
    /// Trailing window in minutes.
    #[serde(default = "default_ip_window_minutes")]
    pub window_minutes: u64,
}

/// Request header names.
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderNames {
    /// Header carrying the client id.
    #[serde(default = "default_api_key_header")]
    pub api_key: String,
    /// Header carrying the base64url signature.
    #[serde(default = "default_signature_header")]
    pub signature: String,
    /// Header carrying the unix timestamp.
    #[serde(default = "default_timestamp_header")]
    pub timestamp: String,
    /// Header carrying the nonce.
    #[serde(default = "default_nonce_header")]
    pub nonce: String,
}

/// Tenancy settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TenancyConfig {
    /// Whether credentials are scoped to tenants.
    #[serde(default)]
    pub enabled: bool,
    /// Column holding the tenant identifier.
    #[serde(default = "default_tenant_column")]
    pub column: String,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_timestamp_tolerance() -> u64 {
    300
}

fn default_nonce_ttl() -> u64 {
    600
}

fn default_min_nonce_length() -> usize {
    32
}

fn default_max_body_size() -> usize {
    10_485_760 // 10MB
}

fn default_deployment_environment() -> String {
    "production".to_string()
}

fn default_negative_cache_ttl() -> u64 {
    60
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_last_used_debounce() -> u64 {
    60
}

fn default_lock_wait_millis() -> u64 {
    3_000
}

fn default_lock_ttl() -> u64 {
    10
}

fn default_cache_prefix() -> String {
    "apiwarden".to_string()
}

fn default_log_retention_days() -> u32 {
    30
}

fn default_purge_batch_size() -> usize {
    1_000
}

fn default_grace_days() -> u32 {
    7
}

fn default_max_attempts() -> u64 {
    5
}

fn default_decay_minutes() -> u64 {
    1
}

fn default_ip_threshold() -> u64 {
    50
}

fn default_ip_window_minutes() -> u64 {
    15
}

fn default_api_key_header() -> String {
    "X-Api-Key".to_string()
}

fn default_signature_header() -> String {
    "X-Signature".to_string()
}

fn default_timestamp_header() -> String {
    "X-Timestamp".to_string()
}

fn default_nonce_header() -> String {
    "X-Nonce".to_string()
}

fn default_tenant_column() -> String {
    "tenant_id".to_string()
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_attempts: default_max_attempts(),
            decay_minutes: default_decay_minutes(),
        }
    }
}

impl Default for IpBlockingConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            threshold: default_ip_threshold(),
            window_minutes: default_ip_window_minutes(),
        }
    }
}

impl Default for HeaderNames {
    fn default() -> Self {
        Self {
            api_key: default_api_key_header(),
            signature: default_signature_header(),
            timestamp: default_timestamp_header(),
            nonce: default_nonce_header(),
        }
    }
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            column: default_tenant_column(),
        }
    }
}

impl Default for ApiwardenConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            algorithm: Algorithm::default(),
            timestamp_tolerance_seconds: default_timestamp_tolerance(),
            nonce_ttl_seconds: default_nonce_ttl(),
            min_nonce_length: default_min_nonce_length(),
            max_body_size: default_max_body_size(),
            rate_limit: RateLimitConfig::default(),
            ip_blocking: IpBlockingConfig::default(),
            enforce_environment: default_true(),
            deployment_environment: default_deployment_environment(),
            negative_cache_ttl_seconds: default_negative_cache_ttl(),
            cache_ttl_seconds: default_cache_ttl(),
            last_used_debounce_seconds: default_last_used_debounce(),
            lock_wait_millis: default_lock_wait_millis(),
            lock_ttl_seconds: default_lock_ttl(),
            cache_prefix: default_cache_prefix(),
            nonce_fail_open: false,
            headers: HeaderNames::default(),
            tenancy: TenancyConfig::default(),
            log_successful_requests: default_true(),
            log_retention_days: default_log_retention_days(),
            purge_batch_size: default_purge_batch_size(),
            default_grace_days: default_grace_days(),
        }
    }
}

impl ApiwardenConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, ApiwardenError> {
        let config: ApiwardenConfig = serde_json::from_str(json)
            .map_err(|e| ApiwardenError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for obvious errors.
    pub fn validate(&self) -> Result<(), ApiwardenError> {
        if self.timestamp_tolerance_seconds == 0 {
            return Err(ApiwardenError::ConfigError(
                "timestamp_tolerance_seconds must be greater than 0".to_string(),
            ));
        }
        if self.max_body_size == 0 {
            return Err(ApiwardenError::ConfigError(
                "max_body_size must be greater than 0".to_string(),
            ));
        }
        if self.min_nonce_length < 16 {
            return Err(ApiwardenError::ConfigError(format!(
                "min_nonce_length must be at least 16, got {}",
                self.min_nonce_length
            )));
        }
        if self.nonce_ttl_seconds < self.timestamp_tolerance_seconds.saturating_mul(2) {
            return Err(ApiwardenError::ConfigError(format!(
                "nonce_ttl_seconds ({}) must be at least twice timestamp_tolerance_seconds ({})",
                self.nonce_ttl_seconds, self.timestamp_tolerance_seconds
            )));
        }
        if self.rate_limit.enabled
            && (self.rate_limit.max_attempts == 0 || self.rate_limit.decay_minutes == 0)
        {
            return Err(ApiwardenError::ConfigError(
                "rate_limit.max_attempts and rate_limit.decay_minutes must be greater than 0"
                    .to_string(),
            ));
        }
        if self.ip_blocking.enabled
            && (self.ip_blocking.threshold == 0 || self.ip_blocking.window_minutes == 0)
        {
            return Err(ApiwardenError::ConfigError(
                "ip_blocking.threshold and ip_blocking.window_minutes must be greater than 0"
                    .to_string(),
            ));
        }
        let headers = [
            &self.headers.api_key,
            &self.headers.signature,
            &self.headers.timestamp,
            &self.headers.nonce,
        ];
        if headers.iter().any(|h| h.trim().is_empty()) {
            return Err(ApiwardenError::ConfigError(
                "header names cannot be empty".to_string(),
            ));
        }
        if self.cache_prefix.is_empty() {
            return Err(ApiwardenError::ConfigError(
                "cache_prefix cannot be empty".to_string(),
            ));
        }
        if self.lock_wait_millis == 0 || self.lock_ttl_seconds == 0 {
            return Err(ApiwardenError::ConfigError(
                "lock_wait_millis and lock_ttl_seconds must be greater than 0".to_string(),
            ));
        }
        if self.tenancy.enabled && self.tenancy.column.is_empty() {
            return Err(ApiwardenError::ConfigError(
                "tenancy.column cannot be empty when tenancy is enabled".to_string(),
            ));
        }
        if self.purge_batch_size == 0 {
            return Err(ApiwardenError::ConfigError(
                "purge_batch_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether this deployment is production.
    pub fn is_production(&self) -> bool {
        self.deployment_environment.eq_ignore_ascii_case("production")
    }

    /// Credential environment required by this deployment.
    pub fn required_environment(&self) -> Environment {
        if self.is_production() {
            Environment::Production
        } else {
            Environment::Testing
        }
    }

    /// Nonce TTL as a duration.
    pub fn nonce_ttl(&self) -> Duration {
        Duration::from_secs(self.nonce_ttl_seconds)
    }

    /// Positive credential cache TTL.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    /// Negative lookup marker TTL.
    pub fn negative_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_cache_ttl_seconds)
    }

    /// Debounce interval for `last_used_at` writes.
    pub fn last_used_debounce(&self) -> Duration {
        Duration::from_secs(self.last_used_debounce_seconds)
    }

    /// Bounded wait for the refill lock.
    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_millis)
    }

    /// Refill lock lifetime.
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_seconds)
    }

    /// Rate-limit decay window.
    pub fn rate_limit_decay(&self) -> Duration {
        Duration::from_secs(self.rate_limit.decay_minutes * 60)
    }
}
