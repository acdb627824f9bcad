//! Apiwarden error types.
//!
//! Expected authentication outcomes are never errors; they are
//! [`VerificationResult`](crate::protocol::result::VerificationResult) values.
//! These errors cover misconfiguration and infrastructure faults.

use thiserror::Error;

/// Errors raised by configuration, storage and cache collaborators.
#[derive(Debug, Error)]
pub enum ApiwardenError {
    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The shared cache backend could not be reached or refused the operation.
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// The credential or request-log repository failed.
    #[error("Store I/O error: {0}")]
    StoreIO(String),

    /// No credential exists for the given client id.
    #[error("Credential not found: {client_id}")]
    CredentialNotFound {
        /// The client id that was looked up.
        client_id: String,
    },

    /// A credential with this client id already exists.
    #[error("Duplicate client id: {client_id}")]
    DuplicateClientId {
        /// The conflicting client id.
        client_id: String,
    },

    /// A stored secret could not be decrypted.
    #[error("Secret decryption failed: {0}")]
    SecretDecryption(String),

    /// A signature payload could not be constructed.
    #[error("Invalid signature payload: {0}")]
    InvalidPayload(String),

    /// Algorithm name outside the supported HMAC set.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The operation is refused in the current deployment.
    #[error("Operation not permitted: {0}")]
    OperationNotPermitted(String),

    /// A cached or stored record could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}
