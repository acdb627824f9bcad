//! HMAC signing and constant-time verification.

use crate::crypto::signing::SignaturePayload;
use crate::ApiwardenError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;

/// Supported HMAC digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// HMAC-SHA256.
    #[default]
    Sha256,
    /// HMAC-SHA384.
    Sha384,
    /// HMAC-SHA512.
    Sha512,
}

impl Algorithm {
    /// Every supported algorithm.
    pub const ALL: [Algorithm; 3] = [Algorithm::Sha256, Algorithm::Sha384, Algorithm::Sha512];

    /// Lowercase algorithm name.
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha384 => "sha384",
            Algorithm::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = ApiwardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Algorithm::ALL
            .into_iter()
            .find(|a| a.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ApiwardenError::UnsupportedAlgorithm(s.to_string()))
    }
}

/// Case-insensitive check against the supported set.
pub fn is_algorithm_supported(name: &str) -> bool {
    name.parse::<Algorithm>().is_ok()
}

/// Names of the supported algorithms.
pub fn supported_algorithms() -> Vec<&'static str> {
    Algorithm::ALL.iter().map(|a| a.name()).collect()
}

fn mac_digest<M: Mac + KeyInit>(secret: &[u8], message: &[u8]) -> Result<Vec<u8>, ApiwardenError> {
    let mut mac = <M as KeyInit>::new_from_slice(secret)
        .map_err(|e| ApiwardenError::InvalidPayload(format!("Invalid HMAC key: {}", e)))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Compute the raw HMAC of a message.
pub fn compute_mac(
    message: &[u8],
    secret: &[u8],
    algorithm: Algorithm,
) -> Result<Vec<u8>, ApiwardenError> {
    match algorithm {
        Algorithm::Sha256 => mac_digest::<Hmac<Sha256>>(secret, message),
        Algorithm::Sha384 => mac_digest::<Hmac<Sha384>>(secret, message),
        Algorithm::Sha512 => mac_digest::<Hmac<Sha512>>(secret, message),
    }
}

/// Sign a payload: HMAC over the canonical form, base64url without padding.
pub fn sign(
    payload: &SignaturePayload,
    secret: &str,
    algorithm: Algorithm,
) -> Result<String, ApiwardenError> {
    let mac = compute_mac(&payload.canonicalize(), secret.as_bytes(), algorithm)?;
    Ok(URL_SAFE_NO_PAD.encode(mac))
}

/// Constant-time comparison of two encoded signatures.
///
/// Only the length comparison can return early; equal-length inputs are
/// compared over every byte.
pub fn verify(expected: &str, actual: &str) -> bool {
    expected.as_bytes().ct_eq(actual.as_bytes()).into()
}
