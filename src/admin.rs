//! Credential administration.
//!
//! Operations an operator CLI or admin UI needs: issuing, rotating and
//! retiring credentials, plus request-log and nonce housekeeping. Every
//! mutation goes through [`CredentialStore`], which invalidates the
//! affected cache entries.

use crate::config::ApiwardenConfig;
use crate::crypto::hmac::Algorithm;
use crate::crypto::secret::{SealedSecret, SecretCipher};
use crate::policy::tenancy::TenancyScope;
use crate::protocol::models::{Credential, Environment, NewCredential};
use crate::store::attempts::{BlockedIp, RequestLogger};
use crate::store::credentials::{CredentialQuery, CredentialStore};
use crate::store::nonce::NonceStore;
use crate::ApiwardenError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use std::fmt;
use std::sync::Arc;

/// Random characters after the environment prefix of a client id.
pub const CLIENT_ID_RANDOM_LENGTH: usize = 24;

/// Random bytes in a generated secret.
pub const SECRET_BYTES: usize = 32;

/// Attempts at finding an unused client id before giving up.
const CLIENT_ID_ATTEMPTS: usize = 5;

/// Optional settings for a new credential.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Hard expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// Owning tenant; ignored unless tenancy is enabled.
    pub tenant_id: Option<String>,
    /// Signing algorithm; the configured default when absent.
    pub algorithm: Option<Algorithm>,
}

/// A credential together with its plaintext secret.
///
/// The plaintext is only available here, at issue time.
#[derive(Clone)]
pub struct IssuedCredential {
    /// Stored credential.
    pub credential: Credential,
    /// Plaintext secret to hand to the client.
    pub secret: String,
}

impl fmt::Debug for IssuedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCredential")
            .field("credential", &self.credential)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// New client id: environment prefix, underscore, 24 alphanumerics.
pub fn generate_client_id(environment: Environment) -> String {
    let random: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(CLIENT_ID_RANDOM_LENGTH)
        .map(char::from)
        .collect();
    format!("{}_{}", environment.client_id_prefix(), random)
}

/// New secret: 32 random bytes, base64url without padding.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Administrative operations over credentials and logs.
#[derive(Clone)]
pub struct CredentialManager {
    credentials: CredentialStore,
    nonces: NonceStore,
    logger: RequestLogger,
    tenancy: Arc<dyn TenancyScope>,
    cipher: Arc<dyn SecretCipher>,
    config: Arc<ApiwardenConfig>,
}

impl CredentialManager {
    /// Create a manager over the verifier's stores.
    pub fn new(
        credentials: CredentialStore,
        nonces: NonceStore,
        logger: RequestLogger,
        tenancy: Arc<dyn TenancyScope>,
        cipher: Arc<dyn SecretCipher>,
        config: Arc<ApiwardenConfig>,
    ) -> Self {
        Self {
            credentials,
            nonces,
            logger,
            tenancy,
            cipher,
            config,
        }
    }

    /// Issue a new credential.
    ///
    /// # Errors
    /// * `DuplicateClientId` - every generated client id collided
    /// * `SecretDecryption` - the cipher refused to seal the secret
    pub fn generate(
        &self,
        environment: Environment,
        options: GenerateOptions,
    ) -> Result<IssuedCredential, ApiwardenError> {
        let secret = generate_secret();
        let sealed = SealedSecret::seal(&secret, self.cipher.as_ref())?;
        let algorithm = options.algorithm.unwrap_or(self.config.algorithm);
        let tenant_id = self.tenancy.tenant_for_new(options.tenant_id.as_deref());

        let mut last_error = None;
        for _ in 0..CLIENT_ID_ATTEMPTS {
            let candidate = NewCredential {
                client_id: generate_client_id(environment),
                secret: sealed.clone(),
                algorithm,
                environment,
                expires_at: options.expires_at,
                tenant_id: tenant_id.clone(),
            };
            match self.credentials.create(candidate) {
                Ok(credential) => {
                    tracing::info!(client_id = %credential.client_id, environment = %environment, "credential generated");
                    return Ok(IssuedCredential { credential, secret });
                }
                Err(e @ ApiwardenError::DuplicateClientId { .. }) => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| ApiwardenError::DuplicateClientId {
            client_id: environment.client_id_prefix().to_string(),
        }))
    }

    /// Replace the secret, keeping the old one valid for `grace_days`
    /// (the configured default when absent).
    pub fn rotate_secret(
        &self,
        client_id: &str,
        grace_days: Option<u32>,
    ) -> Result<IssuedCredential, ApiwardenError> {
        let credential = self.require(client_id)?;
        let secret = generate_secret();
        let sealed = SealedSecret::seal(&secret, self.cipher.as_ref())?;
        let grace_days = grace_days.unwrap_or(self.config.default_grace_days);

        let credential = self.credentials.rotate_secret(&credential, sealed, grace_days)?;
        tracing::info!(client_id, grace_days, "credential secret rotated");
        Ok(IssuedCredential { credential, secret })
    }

    /// Switch a credential off.
    pub fn deactivate(&self, client_id: &str) -> Result<Credential, ApiwardenError> {
        let credential = self.credentials.deactivate(&self.require(client_id)?)?;
        tracing::info!(client_id, "credential deactivated");
        Ok(credential)
    }

    /// Switch a credential back on.
    pub fn activate(&self, client_id: &str) -> Result<Credential, ApiwardenError> {
        let credential = self.credentials.activate(&self.require(client_id)?)?;
        tracing::info!(client_id, "credential activated");
        Ok(credential)
    }

    /// Give a credential a new client id with the same environment prefix.
    ///
    /// The old client id stops resolving immediately.
    pub fn regenerate_client_id(&self, client_id: &str) -> Result<Credential, ApiwardenError> {
        let mut credential = self.require(client_id)?;
        let environment = Environment::from_client_id(client_id).unwrap_or(credential.environment);
        credential.client_id = generate_client_id(environment);
        self.credentials.reassign_client_id(&credential, client_id)?;
        tracing::info!(old = client_id, new = %credential.client_id, "client id regenerated");
        Ok(credential)
    }

    /// Set or clear the hard expiry.
    pub fn set_expiration(
        &self,
        client_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Credential, ApiwardenError> {
        let mut credential = self.require(client_id)?;
        credential.expires_at = expires_at;
        self.credentials.update(&credential)?;
        tracing::info!(client_id, ?expires_at, "credential expiration set");
        Ok(credential)
    }

    /// Remove a credential permanently. Returns whether it existed.
    pub fn delete(&self, client_id: &str) -> Result<bool, ApiwardenError> {
        let Some(credential) = self.credentials.find_by_client_id(client_id)? else {
            return Ok(false);
        };
        let existed = self.credentials.delete(&credential)?;
        tracing::info!(client_id, "credential deleted");
        Ok(existed)
    }

    /// Credentials matching `query`, restricted to `tenant_id` when tenancy is on.
    pub fn list(
        &self,
        mut query: CredentialQuery,
        tenant_id: Option<&str>,
    ) -> Result<Vec<Credential>, ApiwardenError> {
        self.tenancy.apply_scope(&mut query, tenant_id);
        self.credentials.list(&query)
    }

    /// Delete request-log entries older than `days` (the configured retention when absent).
    pub fn purge_logs(&self, days: Option<u32>) -> Result<usize, ApiwardenError> {
        self.logger
            .purge_older_than(days.unwrap_or(self.config.log_retention_days))
    }

    /// IPs at or over the blocking threshold within the blocking window.
    pub fn blocked_ips(&self) -> Result<Vec<BlockedIp>, ApiwardenError> {
        self.logger.blocked_ips(None, None)
    }

    /// Forget all recorded nonces.
    ///
    /// # Errors
    /// * `OperationNotPermitted` - in production
    pub fn clear_nonces(&self) -> Result<usize, ApiwardenError> {
        self.nonces.clear()
    }

    fn require(&self, client_id: &str) -> Result<Credential, ApiwardenError> {
        self.credentials
            .find_by_client_id(client_id)?
            .ok_or_else(|| ApiwardenError::CredentialNotFound {
                client_id: client_id.to_string(),
            })
    }
}
