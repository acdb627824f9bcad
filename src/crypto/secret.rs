//! Secrets at rest.
//!
//! A [`SealedSecret`] only ever holds ciphertext produced by the injected
//! [`SecretCipher`]. Plaintext is obtained explicitly through
//! [`SealedSecret::reveal`], which reports decryption failure as a value.

use crate::ApiwardenError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Encryption provider for signing secrets.
pub trait SecretCipher: Send + Sync {
    /// Encrypt a plaintext secret.
    fn seal(&self, plaintext: &str) -> Result<String, ApiwardenError>;

    /// Decrypt a sealed secret.
    fn open(&self, ciphertext: &str) -> Result<String, ApiwardenError>;
}

/// Identity cipher for development and tests. Stores secrets as given.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextCipher;

impl SecretCipher for PlaintextCipher {
    fn seal(&self, plaintext: &str) -> Result<String, ApiwardenError> {
        Ok(plaintext.to_string())
    }

    fn open(&self, ciphertext: &str) -> Result<String, ApiwardenError> {
        Ok(ciphertext.to_string())
    }
}

/// Ciphertext of a signing secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedSecret(String);

impl SealedSecret {
    /// Seal a plaintext secret with the given cipher.
    pub fn seal(plaintext: &str, cipher: &dyn SecretCipher) -> Result<Self, ApiwardenError> {
        cipher.seal(plaintext).map(SealedSecret)
    }

    /// Wrap ciphertext loaded from storage.
    pub fn from_ciphertext(ciphertext: impl Into<String>) -> Self {
        SealedSecret(ciphertext.into())
    }

    /// The stored ciphertext.
    pub fn ciphertext(&self) -> &str {
        &self.0
    }

    /// Decrypt the secret.
    ///
    /// # Errors
    /// * `SecretDecryption` - the cipher rejected the ciphertext
    pub fn reveal(&self, cipher: &dyn SecretCipher) -> Result<String, ApiwardenError> {
        cipher
            .open(&self.0)
            .map_err(|e| ApiwardenError::SecretDecryption(e.to_string()))
    }
}

impl fmt::Debug for SealedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SealedSecret(..)")
    }
}
