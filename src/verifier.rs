//! Request verifier - the main public API for Apiwarden.
//!
//! The `Verifier` runs the ordered authentication checks for one inbound
//! request and turns every outcome, including infrastructure faults, into
//! a [`VerificationResult`]. Cheap checks run first; checks that touch
//! shared state or do crypto run last.

use crate::admin::CredentialManager;
use crate::cache::memory::MemoryCache;
use crate::cache::KvCache;
use crate::clock::{Clock, SystemClock};
use crate::config::ApiwardenConfig;
use crate::crypto::freshness::check_timestamp;
use crate::crypto::hmac;
use crate::crypto::secret::{PlaintextCipher, SealedSecret, SecretCipher};
use crate::crypto::signing::SignaturePayload;
use crate::events::{VerificationEvent, VerificationListener};
use crate::policy::access::{check_access, EnvironmentPolicy};
use crate::policy::rate_limit::RateLimiter;
use crate::policy::tenancy::{tenancy_scope, TenancyScope};
use crate::protocol::models::Credential;
use crate::protocol::request::InboundRequest;
use crate::protocol::result::{Decision, FailureReason, VerificationResult};
use crate::store::attempts::{AttemptLog, RequestLogger};
use crate::store::credentials::{CredentialRepository, CredentialStore};
use crate::store::memory::{MemoryAttemptLog, MemoryCredentialRepository};
use crate::store::nonce::{NonceStore, NonceVerdict};
use crate::ApiwardenError;
use std::sync::Arc;

/// External collaborators the verifier is built on.
#[derive(Clone)]
pub struct Backends {
    /// Shared TTL cache for nonces, counters and credential entries.
    pub cache: Arc<dyn KvCache>,
    /// Credential storage.
    pub credentials: Arc<dyn CredentialRepository>,
    /// Request attempt log.
    pub attempts: Arc<dyn AttemptLog>,
    /// Decrypts stored secrets.
    pub cipher: Arc<dyn SecretCipher>,
}

impl Backends {
    /// Single-process backends: in-memory cache and repositories, plaintext secrets.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: Arc::new(MemoryCache::new(clock)),
            credentials: Arc::new(MemoryCredentialRepository::new()),
            attempts: Arc::new(MemoryAttemptLog::new()),
            cipher: Arc::new(PlaintextCipher),
        }
    }
}

/// Headers pulled from a request that passed the presence check.
struct Presented<'a> {
    client_id: &'a str,
    signature: &'a str,
    timestamp: &'a str,
    nonce: &'a str,
}

/// Main request verifier for Apiwarden.
///
/// Create one instance per process and share it across request handlers.
pub struct Verifier {
    config: Arc<ApiwardenConfig>,
    clock: Arc<dyn Clock>,
    cipher: Arc<dyn SecretCipher>,
    nonces: NonceStore,
    limiter: RateLimiter,
    logger: RequestLogger,
    credentials: CredentialStore,
    environment: EnvironmentPolicy,
    tenancy: Arc<dyn TenancyScope>,
    listeners: Vec<Arc<dyn VerificationListener>>,
}

impl Verifier {
    /// Create a verifier with the given configuration and backends.
    ///
    /// Uses the system clock for time operations.
    ///
    /// # Errors
    /// Returns `ConfigError` if configuration validation fails.
    pub fn new(config: ApiwardenConfig, backends: Backends) -> Result<Self, ApiwardenError> {
        config.validate()?;
        Ok(Self::with_clock(config, backends, Arc::new(SystemClock)))
    }

    /// Create a verifier with a custom clock (for testing).
    #[cfg(any(test, feature = "test-seams"))]
    pub fn new_with_clock(
        config: ApiwardenConfig,
        backends: Backends,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ApiwardenError> {
        config.validate()?;
        Ok(Self::with_clock(config, backends, clock))
    }

    fn with_clock(config: ApiwardenConfig, backends: Backends, clock: Arc<dyn Clock>) -> Self {
        let Backends {
            cache,
            credentials,
            attempts,
            cipher,
        } = backends;

        Self {
            nonces: NonceStore::new(Arc::clone(&cache), &config),
            limiter: RateLimiter::new(Arc::clone(&cache), &config),
            logger: RequestLogger::new(attempts, Arc::clone(&clock), &config),
            credentials: CredentialStore::new(credentials, cache, Arc::clone(&clock), &config),
            environment: EnvironmentPolicy::from_config(&config),
            tenancy: tenancy_scope(&config.tenancy),
            config: Arc::new(config),
            clock,
            cipher,
            listeners: Vec::new(),
        }
    }

    /// Register a listener notified after every verification.
    pub fn with_listener(mut self, listener: impl VerificationListener + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Whether authentication is switched on.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Active configuration.
    pub fn config(&self) -> &ApiwardenConfig {
        &self.config
    }

    /// Administrative operations over the same stores.
    pub fn admin(&self) -> CredentialManager {
        CredentialManager::new(
            self.credentials.clone(),
            self.nonces.clone(),
            self.logger.clone(),
            Arc::clone(&self.tenancy),
            Arc::clone(&self.cipher),
            Arc::clone(&self.config),
        )
    }

    /// Per-client failure counter.
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Request log.
    pub fn request_logger(&self) -> &RequestLogger {
        &self.logger
    }

    /// Middleware entry point: applies the kill switch, then verifies.
    pub fn authorize(&self, request: &InboundRequest) -> Decision {
        if !self.is_enabled() {
            return Decision::Bypassed;
        }
        match self.verify(request) {
            VerificationResult::Success(credential) => Decision::Allowed(credential),
            failure => match failure.rejection() {
                Some(rejection) => Decision::Denied(rejection),
                None => Decision::Bypassed,
            },
        }
    }

    /// Verify one request.
    ///
    /// Never fails: every outcome, including backend faults, is a result.
    /// The attempt is logged and listeners are notified before returning.
    pub fn verify(&self, request: &InboundRequest) -> VerificationResult {
        let client_id = request.non_empty_header(&self.config.headers.api_key);
        let result = self.run_checks(request);

        match &result {
            VerificationResult::Success(credential) => {
                tracing::debug!(client_id = %credential.client_id, ip = request.ip(), "request verified");
            }
            VerificationResult::Failure { reason, .. } => {
                tracing::debug!(client_id, ip = request.ip(), reason = %reason, "request rejected");
            }
        }

        self.log_attempt(request, client_id, &result);
        self.notify(request, client_id, &result);
        result
    }

    fn run_checks(&self, request: &InboundRequest) -> VerificationResult {
        let Some(presented) = self.presented_headers(request) else {
            return VerificationResult::failure(FailureReason::MissingHeaders);
        };

        if request.body().len() > self.config.max_body_size {
            return VerificationResult::failure(FailureReason::BodyTooLarge);
        }

        if self.config.ip_blocking.enabled {
            match self.logger.has_excessive_failures(request.ip(), None, None) {
                Ok(false) => {}
                Ok(true) => return VerificationResult::failure(FailureReason::IpBlocked),
                Err(e) => {
                    tracing::warn!(ip = request.ip(), error = %e, "IP block check failed, rejecting");
                    return VerificationResult::failure(FailureReason::IpBlocked);
                }
            }
        }

        match self.limiter.is_limited(presented.client_id) {
            Ok(false) => {}
            Ok(true) => return VerificationResult::failure(FailureReason::RateLimited),
            Err(e) => {
                tracing::warn!(client_id = presented.client_id, error = %e, "rate limit check failed, rejecting");
                return VerificationResult::failure(FailureReason::RateLimited);
            }
        }

        if presented.nonce.len() < self.config.min_nonce_length {
            return VerificationResult::failure(FailureReason::InvalidNonce);
        }

        let freshness = check_timestamp(
            presented.timestamp,
            self.config.timestamp_tolerance_seconds,
            self.clock.as_ref(),
        );
        if !freshness.is_fresh() {
            return VerificationResult::failure(FailureReason::InvalidTimestamp);
        }

        let credential = match self.credentials.find_active_usable(presented.client_id) {
            Ok(Some(credential)) => credential,
            Ok(None) => return self.reject(presented.client_id, FailureReason::InvalidClientId, None),
            Err(e) => {
                // A repository fault is not the client's doing, so it bypasses the limiter
                tracing::warn!(client_id = presented.client_id, error = %e, "credential lookup failed, rejecting");
                return VerificationResult::failure(FailureReason::InvalidClientId);
            }
        };

        if let Err(reason) = check_access(&credential, &self.environment, self.clock.now_utc()) {
            return self.reject(presented.client_id, reason, Some(credential));
        }

        match self.nonces.admit(presented.nonce) {
            NonceVerdict::Fresh => {}
            NonceVerdict::Replayed => {
                return self.reject(presented.client_id, FailureReason::DuplicateNonce, Some(credential))
            }
            NonceVerdict::Unverifiable => {
                return self.reject(presented.client_id, FailureReason::InvalidNonce, Some(credential))
            }
        }

        let payload = match SignaturePayload::new(
            request.method(),
            request.path(),
            request.body(),
            presented.timestamp,
            presented.nonce,
        ) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(error = %e, "request cannot be canonicalized");
                return self.reject(
                    presented.client_id,
                    FailureReason::InvalidSignature,
                    Some(credential),
                );
            }
        };

        let current = match self.expected_signature(&credential, &credential.secret, &payload) {
            Ok(expected) => expected,
            Err(e) => {
                tracing::warn!(client_id = %credential.client_id, error = %e, "stored secret unusable");
                return self.reject(presented.client_id, FailureReason::InvalidSecret, Some(credential));
            }
        };

        if !hmac::verify(&current, presented.signature)
            && !self.matches_old_secret(&credential, &payload, presented.signature)
        {
            return self.reject(
                presented.client_id,
                FailureReason::InvalidSignature,
                Some(credential),
            );
        }

        if let Err(e) = self.credentials.mark_used(&credential) {
            tracing::warn!(client_id = %credential.client_id, error = %e, "failed to record credential use");
        }
        if let Err(e) = self.limiter.reset(&credential.client_id) {
            tracing::warn!(client_id = %credential.client_id, error = %e, "failed to reset rate limit");
        }

        VerificationResult::success(credential)
    }

    fn presented_headers<'a>(&self, request: &'a InboundRequest) -> Option<Presented<'a>> {
        let headers = &self.config.headers;
        Some(Presented {
            client_id: request.non_empty_header(&headers.api_key)?,
            signature: request.non_empty_header(&headers.signature)?,
            timestamp: request.non_empty_header(&headers.timestamp)?,
            nonce: request.non_empty_header(&headers.nonce)?,
        })
    }

    fn expected_signature(
        &self,
        credential: &Credential,
        secret: &SealedSecret,
        payload: &SignaturePayload,
    ) -> Result<String, ApiwardenError> {
        let plaintext = secret.reveal(self.cipher.as_ref())?;
        hmac::sign(payload, &plaintext, credential.algorithm)
    }

    fn matches_old_secret(
        &self,
        credential: &Credential,
        payload: &SignaturePayload,
        signature: &str,
    ) -> bool {
        let Some(old) = credential.old_secret_in_grace(self.clock.now_utc()) else {
            return false;
        };
        match self.expected_signature(credential, old, payload) {
            Ok(expected) => hmac::verify(&expected, signature),
            Err(e) => {
                tracing::warn!(client_id = %credential.client_id, error = %e, "rotated-out secret unusable");
                false
            }
        }
    }

    /// Failure attributable to a presented client id. Counts toward its
    /// rate limit when [`FailureReason::increments_rate_limit`] says so.
    fn reject(
        &self,
        client_id: &str,
        reason: FailureReason,
        credential: Option<Credential>,
    ) -> VerificationResult {
        if reason.increments_rate_limit() {
            if let Err(e) = self.limiter.record_failure(client_id) {
                tracing::warn!(client_id, error = %e, "failed to record rate limit failure");
            }
        }
        VerificationResult::Failure { reason, credential }
    }

    fn log_attempt(&self, request: &InboundRequest, client_id: Option<&str>, result: &VerificationResult) {
        let logged = match result {
            VerificationResult::Success(credential) => {
                if !self.config.log_successful_requests {
                    return;
                }
                self.logger.log_success(request, credential)
            }
            VerificationResult::Failure { reason, credential } => {
                self.logger
                    .log_failure(request, client_id, *reason, credential.as_ref())
            }
        };
        if let Err(e) = logged {
            tracing::warn!(ip = request.ip(), error = %e, "failed to write request log");
        }
    }

    fn notify(&self, request: &InboundRequest, client_id: Option<&str>, result: &VerificationResult) {
        if self.listeners.is_empty() {
            return;
        }
        let at = self.clock.now_utc();
        let event = match result {
            VerificationResult::Success(credential) => VerificationEvent::Succeeded {
                credential_id: credential.id,
                client_id: credential.client_id.clone(),
                ip: request.ip().to_string(),
                at,
            },
            VerificationResult::Failure { reason, .. } => VerificationEvent::Failed {
                client_id: client_id.map(str::to_string),
                reason: *reason,
                ip: request.ip().to_string(),
                at,
            },
        };
        for listener in &self.listeners {
            listener.on_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::GenerateOptions;
    use crate::cache::memory::MemoryCache;
    use crate::client::signer::sign_request;
    use crate::clock::MockClock;
    use crate::config::HeaderNames;
    use crate::crypto::hmac::Algorithm;
    use crate::protocol::models::{Environment, NewCredential};
    use std::sync::Mutex;

    const NOW: i64 = 1_704_067_200;
    const NONCE: &str = "n0nceN0nceN0nceN0nceN0nceN0nce12";
    const BODY: &str = r#"{"name":"John"}"#;

    struct Harness {
        clock: Arc<MockClock>,
        cache: Arc<MemoryCache>,
        attempts: Arc<MemoryAttemptLog>,
        verifier: Verifier,
    }

    fn harness(config: ApiwardenConfig) -> Harness {
        harness_with_cipher(config, Arc::new(PlaintextCipher))
    }

    fn harness_with_cipher(config: ApiwardenConfig, cipher: Arc<dyn SecretCipher>) -> Harness {
        let clock = Arc::new(MockClock::at_unix(NOW));
        let cache = Arc::new(MemoryCache::new(clock.clone()));
        let attempts = Arc::new(MemoryAttemptLog::new());
        let backends = Backends {
            cache: cache.clone(),
            credentials: Arc::new(MemoryCredentialRepository::new()),
            attempts: attempts.clone(),
            cipher,
        };
        let verifier = Verifier::new_with_clock(config, backends, clock.clone()).unwrap();
        Harness {
            clock,
            cache,
            attempts,
            verifier,
        }
    }

    fn insert(h: &Harness, client_id: &str, secret: &str, environment: Environment) -> Credential {
        h.verifier
            .credentials
            .create(NewCredential {
                client_id: client_id.to_string(),
                secret: SealedSecret::from_ciphertext(secret),
                algorithm: Algorithm::Sha256,
                environment,
                expires_at: None,
                tenant_id: None,
            })
            .unwrap()
    }

    fn signed(client_id: &str, secret: &str, body: &str, timestamp: i64, nonce: &str) -> InboundRequest {
        let request = InboundRequest::new("POST", "/api/users")
            .with_body(body)
            .with_ip("203.0.113.7");
        sign_request(
            request,
            &HeaderNames::default(),
            client_id,
            secret,
            Algorithm::Sha256,
            timestamp,
            nonce,
        )
        .unwrap()
    }

    fn nonce(i: usize) -> String {
        format!("{:0>32}", i)
    }

    #[test]
    fn test_end_to_end_success_replay_tamper() {
        let h = harness(ApiwardenConfig::default());
        insert(&h, "prod_ab12", "s3cr3t", Environment::Production);

        let request = signed("prod_ab12", "s3cr3t", BODY, NOW, NONCE);
        let first = h.verifier.verify(&request);
        assert!(first.is_success(), "{:?}", first.reason());
        assert_eq!(first.credential().unwrap().client_id, "prod_ab12");

        let replay = h.verifier.verify(&request);
        assert_eq!(replay.reason(), Some(FailureReason::DuplicateNonce));

        let tampered = signed("prod_ab12", "s3cr3t", BODY, NOW, &nonce(1))
            .with_body(r#"{"name":"Joho"}"#);
        let result = h.verifier.verify(&tampered);
        assert_eq!(result.reason(), Some(FailureReason::InvalidSignature));
    }

    #[test]
    fn test_missing_and_empty_headers() {
        let h = harness(ApiwardenConfig::default());
        let bare = InboundRequest::new("GET", "/");
        assert_eq!(
            h.verifier.verify(&bare).reason(),
            Some(FailureReason::MissingHeaders)
        );

        let empty_nonce = signed("prod_ab12", "s3cr3t", BODY, NOW, NONCE).with_header("X-Nonce", "");
        assert_eq!(
            h.verifier.verify(&empty_nonce).reason(),
            Some(FailureReason::MissingHeaders)
        );
    }

    #[test]
    fn test_body_too_large() {
        let h = harness(ApiwardenConfig {
            max_body_size: 8,
            ..Default::default()
        });
        let result = h.verifier.verify(&signed("prod_ab12", "s3cr3t", BODY, NOW, NONCE));
        assert_eq!(result.reason(), Some(FailureReason::BodyTooLarge));
        assert_eq!(result.status(), 413);
    }

    #[test]
    fn test_short_nonce() {
        let h = harness(ApiwardenConfig::default());
        insert(&h, "prod_ab12", "s3cr3t", Environment::Production);
        let result = h.verifier.verify(&signed("prod_ab12", "s3cr3t", BODY, NOW, "short-nonce-value"));
        assert_eq!(result.reason(), Some(FailureReason::InvalidNonce));
    }

    #[test]
    fn test_timestamp_boundary() {
        let h = harness(ApiwardenConfig::default());
        insert(&h, "prod_ab12", "s3cr3t", Environment::Production);

        let at_edge = h
            .verifier
            .verify(&signed("prod_ab12", "s3cr3t", BODY, NOW - 300, &nonce(1)));
        assert!(at_edge.is_success());

        let past_edge = h
            .verifier
            .verify(&signed("prod_ab12", "s3cr3t", BODY, NOW - 301, &nonce(2)));
        assert_eq!(past_edge.reason(), Some(FailureReason::InvalidTimestamp));

        let future = h
            .verifier
            .verify(&signed("prod_ab12", "s3cr3t", BODY, NOW + 301, &nonce(3)));
        assert_eq!(future.reason(), Some(FailureReason::InvalidTimestamp));

        let garbage = signed("prod_ab12", "s3cr3t", BODY, NOW, &nonce(4))
            .with_header("X-Timestamp", "yesterday");
        assert_eq!(
            h.verifier.verify(&garbage).reason(),
            Some(FailureReason::InvalidTimestamp)
        );
    }

    #[test]
    fn test_unknown_and_inactive_client() {
        let h = harness(ApiwardenConfig::default());
        let unknown = h.verifier.verify(&signed("prod_nobody", "x", BODY, NOW, &nonce(1)));
        assert_eq!(unknown.reason(), Some(FailureReason::InvalidClientId));

        let credential = insert(&h, "prod_ab12", "s3cr3t", Environment::Production);
        h.verifier.credentials.deactivate(&credential).unwrap();
        let inactive = h.verifier.verify(&signed("prod_ab12", "s3cr3t", BODY, NOW, &nonce(2)));
        assert_eq!(inactive.reason(), Some(FailureReason::InvalidClientId));
        assert_eq!(h.verifier.rate_limiter().attempts("prod_ab12").unwrap(), 1);
    }

    #[test]
    fn test_environment_mismatch() {
        let h = harness(ApiwardenConfig::default());
        insert(&h, "test_ab12", "s3cr3t", Environment::Testing);
        let result = h.verifier.verify(&signed("test_ab12", "s3cr3t", BODY, NOW, NONCE));
        assert_eq!(result.reason(), Some(FailureReason::EnvironmentMismatch));
        assert!(result.credential().is_some());
        assert_eq!(h.verifier.rate_limiter().attempts("test_ab12").unwrap(), 1);
    }

    #[test]
    fn test_environment_not_enforced() {
        let h = harness(ApiwardenConfig {
            enforce_environment: false,
            ..Default::default()
        });
        insert(&h, "test_ab12", "s3cr3t", Environment::Testing);
        assert!(h
            .verifier
            .verify(&signed("test_ab12", "s3cr3t", BODY, NOW, NONCE))
            .is_success());
    }

    #[test]
    fn test_rate_limited_then_reset_by_success() {
        let h = harness(ApiwardenConfig::default());
        insert(&h, "prod_ab12", "s3cr3t", Environment::Production);

        for i in 0..5 {
            let result = h.verifier.verify(&signed("prod_ab12", "wrong", BODY, NOW, &nonce(i)));
            assert_eq!(result.reason(), Some(FailureReason::InvalidSignature));
        }
        let limited = h.verifier.verify(&signed("prod_ab12", "s3cr3t", BODY, NOW, &nonce(10)));
        assert_eq!(limited.reason(), Some(FailureReason::RateLimited));
        assert_eq!(limited.status(), 429);

        h.clock.advance_secs(60);
        let ok = h.verifier.verify(&signed("prod_ab12", "s3cr3t", BODY, NOW + 60, &nonce(11)));
        assert!(ok.is_success());

        for i in 20..24 {
            h.verifier.verify(&signed("prod_ab12", "wrong", BODY, NOW + 60, &nonce(i)));
        }
        h.verifier.verify(&signed("prod_ab12", "s3cr3t", BODY, NOW + 60, &nonce(30)));
        assert_eq!(h.verifier.rate_limiter().attempts("prod_ab12").unwrap(), 0);
    }

    #[test]
    fn test_non_attributable_failures_do_not_count() {
        let h = harness(ApiwardenConfig::default());
        insert(&h, "prod_ab12", "s3cr3t", Environment::Production);
        for i in 0..10 {
            h.verifier
                .verify(&signed("prod_ab12", "s3cr3t", BODY, NOW - 1000, &nonce(i)));
        }
        assert_eq!(h.verifier.rate_limiter().attempts("prod_ab12").unwrap(), 0);
    }

    #[test]
    fn test_ip_blocking_across_client_ids() {
        let mut config = ApiwardenConfig::default();
        config.ip_blocking.threshold = 3;
        let h = harness(config);
        insert(&h, "prod_ab12", "s3cr3t", Environment::Production);

        for (i, client) in ["prod_x1", "prod_x2", "prod_x3"].iter().enumerate() {
            h.verifier.verify(&signed(client, "guess", BODY, NOW, &nonce(i)));
        }
        let blocked = h.verifier.verify(&signed("prod_ab12", "s3cr3t", BODY, NOW, NONCE));
        assert_eq!(blocked.reason(), Some(FailureReason::IpBlocked));

        let other_ip = signed("prod_ab12", "s3cr3t", BODY, NOW, NONCE).with_ip("198.51.100.1");
        assert!(h.verifier.verify(&other_ip).is_success());
    }

    #[test]
    fn test_only_counting_reasons_reach_the_limiter() {
        let h = harness(ApiwardenConfig::default());
        insert(&h, "prod_ab12", "s3cr3t", Environment::Production);

        let request = signed("prod_ab12", "s3cr3t", BODY, NOW, NONCE);
        assert!(h.verifier.verify(&request).is_success());
        for _ in 0..3 {
            let replay = h.verifier.verify(&request);
            assert_eq!(replay.reason(), Some(FailureReason::DuplicateNonce));
            assert!(!FailureReason::DuplicateNonce.increments_rate_limit());
        }
        assert_eq!(h.verifier.rate_limiter().attempts("prod_ab12").unwrap(), 0);

        h.verifier.verify(&signed("prod_ab12", "wrong", BODY, NOW, &nonce(1)));
        assert_eq!(h.verifier.rate_limiter().attempts("prod_ab12").unwrap(), 1);
    }

    #[test]
    fn test_ip_block_lifts_despite_retries() {
        let mut config = ApiwardenConfig::default();
        config.ip_blocking.threshold = 3;
        let h = harness(config);
        insert(&h, "prod_ab12", "s3cr3t", Environment::Production);

        for (i, client) in ["prod_x1", "prod_x2", "prod_x3"].iter().enumerate() {
            h.verifier.verify(&signed(client, "guess", BODY, NOW, &nonce(i)));
        }
        let mut now = NOW;
        for i in 0..14 {
            h.clock.advance_secs(60);
            now += 60;
            let retry = h
                .verifier
                .verify(&signed("prod_ab12", "s3cr3t", BODY, now, &nonce(100 + i)));
            assert_eq!(retry.reason(), Some(FailureReason::IpBlocked));
        }

        h.clock.advance_secs(2 * 60);
        now += 2 * 60;
        assert!(h
            .verifier
            .verify(&signed("prod_ab12", "s3cr3t", BODY, now, NONCE))
            .is_success());
    }

    #[test]
    fn test_rotation_grace_window() {
        let h = harness(ApiwardenConfig::default());
        insert(&h, "prod_ab12", "old-secret", Environment::Production);
        let admin = h.verifier.admin();
        let issued = admin.rotate_secret("prod_ab12", Some(7)).unwrap();

        let old = h.verifier.verify(&signed("prod_ab12", "old-secret", BODY, NOW, &nonce(1)));
        assert!(old.is_success());
        let new = h.verifier.verify(&signed("prod_ab12", &issued.secret, BODY, NOW, &nonce(2)));
        assert!(new.is_success());

        h.clock.advance_secs(7 * 86_400 + 1);
        let later = NOW + 7 * 86_400 + 1;
        let old = h.verifier.verify(&signed("prod_ab12", "old-secret", BODY, later, &nonce(3)));
        assert_eq!(old.reason(), Some(FailureReason::InvalidSignature));
        let new = h.verifier.verify(&signed("prod_ab12", &issued.secret, BODY, later, &nonce(4)));
        assert!(new.is_success());
    }

    /// Cache whose nonce writes fail while everything else works.
    struct NonceOutage(Arc<MemoryCache>);

    impl KvCache for NonceOutage {
        fn get(&self, key: &str) -> Result<Option<String>, ApiwardenError> {
            self.0.get(key)
        }
        fn set(&self, key: &str, value: &str, ttl: std::time::Duration) -> Result<(), ApiwardenError> {
            self.0.set(key, value, ttl)
        }
        fn set_if_absent(
            &self,
            key: &str,
            value: &str,
            ttl: std::time::Duration,
        ) -> Result<bool, ApiwardenError> {
            if key.contains(":nonce:") {
                return Err(ApiwardenError::CacheUnavailable("nonce shard down".to_string()));
            }
            self.0.set_if_absent(key, value, ttl)
        }
        fn delete(&self, key: &str) -> Result<bool, ApiwardenError> {
            self.0.delete(key)
        }
        fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, ApiwardenError> {
            self.0.delete_if_equals(key, expected)
        }
        fn increment(&self, key: &str, ttl: std::time::Duration) -> Result<u64, ApiwardenError> {
            self.0.increment(key, ttl)
        }
        fn delete_prefix(&self, prefix: &str) -> Result<usize, ApiwardenError> {
            self.0.delete_prefix(prefix)
        }
    }

    fn nonce_outage_verifier(config: ApiwardenConfig) -> Verifier {
        let clock = Arc::new(MockClock::at_unix(NOW));
        let backends = Backends {
            cache: Arc::new(NonceOutage(Arc::new(MemoryCache::new(clock.clone())))),
            ..Backends::in_memory(clock.clone())
        };
        let verifier = Verifier::new_with_clock(config, backends, clock).unwrap();
        verifier
            .credentials
            .create(NewCredential {
                client_id: "prod_ab12".to_string(),
                secret: SealedSecret::from_ciphertext("s3cr3t"),
                algorithm: Algorithm::Sha256,
                environment: Environment::Production,
                expires_at: None,
                tenant_id: None,
            })
            .unwrap();
        verifier
    }

    #[test]
    fn test_nonce_store_outage_fails_closed() {
        let verifier = nonce_outage_verifier(ApiwardenConfig::default());
        let result = verifier.verify(&signed("prod_ab12", "s3cr3t", BODY, NOW, NONCE));
        assert_eq!(result.reason(), Some(FailureReason::InvalidNonce));
    }

    #[test]
    fn test_nonce_store_outage_fail_open() {
        let verifier = nonce_outage_verifier(ApiwardenConfig {
            nonce_fail_open: true,
            ..Default::default()
        });
        assert!(verifier
            .verify(&signed("prod_ab12", "s3cr3t", BODY, NOW, NONCE))
            .is_success());
    }

    #[test]
    fn test_cache_outage_rejects_without_panicking() {
        let h = harness(ApiwardenConfig::default());
        insert(&h, "prod_ab12", "s3cr3t", Environment::Production);
        h.cache.set_offline(true);

        let result = h.verifier.verify(&signed("prod_ab12", "s3cr3t", BODY, NOW, NONCE));
        assert_eq!(result.reason(), Some(FailureReason::RateLimited));
    }

    #[test]
    fn test_undecryptable_secret() {
        struct BrokenCipher;
        impl SecretCipher for BrokenCipher {
            fn seal(&self, plaintext: &str) -> Result<String, ApiwardenError> {
                Ok(plaintext.to_string())
            }
            fn open(&self, _ciphertext: &str) -> Result<String, ApiwardenError> {
                Err(ApiwardenError::SecretDecryption("bad key".to_string()))
            }
        }

        let h = harness_with_cipher(ApiwardenConfig::default(), Arc::new(BrokenCipher));
        insert(&h, "prod_ab12", "s3cr3t", Environment::Production);
        let result = h.verifier.verify(&signed("prod_ab12", "s3cr3t", BODY, NOW, NONCE));
        assert_eq!(result.reason(), Some(FailureReason::InvalidSecret));
        assert_eq!(h.verifier.rate_limiter().attempts("prod_ab12").unwrap(), 0);
    }

    #[test]
    fn test_attempts_logged_and_listeners_notified() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut h = harness(ApiwardenConfig::default());
        h.verifier = h.verifier.with_listener(move |event: &VerificationEvent| {
            sink.lock().unwrap().push(event.clone());
        });
        insert(&h, "prod_ab12", "s3cr3t", Environment::Production);

        h.verifier.verify(&signed("prod_ab12", "s3cr3t", BODY, NOW, NONCE));
        h.verifier.verify(&signed("prod_ab12", "s3cr3t", BODY, NOW, NONCE));

        let records = h.attempts.records();
        assert_eq!(records.len(), 2);
        assert!(records[0].signature_valid);
        assert_eq!(records[1].reason, Some(FailureReason::DuplicateNonce));

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].is_success());
        assert!(!events[1].is_success());
    }

    #[test]
    fn test_success_logging_can_be_disabled() {
        let h = harness(ApiwardenConfig {
            log_successful_requests: false,
            ..Default::default()
        });
        insert(&h, "prod_ab12", "s3cr3t", Environment::Production);
        assert!(h
            .verifier
            .verify(&signed("prod_ab12", "s3cr3t", BODY, NOW, NONCE))
            .is_success());
        assert!(h.attempts.is_empty());
    }

    #[test]
    fn test_authorize_decisions() {
        let h = harness(ApiwardenConfig::default());
        let generated = h
            .verifier
            .admin()
            .generate(Environment::Production, GenerateOptions::default())
            .unwrap();

        let request = signed(&generated.credential.client_id, &generated.secret, BODY, NOW, NONCE);
        assert!(matches!(h.verifier.authorize(&request), Decision::Allowed(_)));
        match h.verifier.authorize(&request) {
            Decision::Denied(rejection) => {
                assert_eq!(rejection.code, FailureReason::DuplicateNonce);
                assert_eq!(rejection.status, 401);
            }
            other => panic!("expected denial, got {:?}", other),
        }

        let off = harness(ApiwardenConfig {
            enabled: false,
            ..Default::default()
        });
        assert_eq!(
            off.verifier.authorize(&InboundRequest::new("GET", "/")),
            Decision::Bypassed
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let clock: Arc<dyn Clock> = Arc::new(MockClock::at_unix(NOW));
        let config = ApiwardenConfig {
            min_nonce_length: 8,
            ..Default::default()
        };
        assert!(matches!(
            Verifier::new_with_clock(config, Backends::in_memory(Arc::clone(&clock)), clock),
            Err(ApiwardenError::ConfigError(_))
        ));
    }
}
