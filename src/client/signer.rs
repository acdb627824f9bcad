//! Produces the authentication headers a client attaches to a request.
//!
//! The signature covers the request exactly as the verifier will rebuild
//! it: upper-cased method, normalized path, raw body, then the timestamp
//! and nonce strings as sent.

use crate::clock::Clock;
use crate::config::HeaderNames;
use crate::crypto::hmac::{self, Algorithm};
use crate::crypto::signing::SignaturePayload;
use crate::protocol::request::InboundRequest;
use crate::ApiwardenError;
use rand::distr::Alphanumeric;
use rand::Rng;
use std::fmt;

/// Length of generated nonces.
pub const NONCE_LENGTH: usize = 32;

/// Random alphanumeric nonce of [`NONCE_LENGTH`] characters.
pub fn generate_nonce() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LENGTH)
        .map(char::from)
        .collect()
}

/// Attach client id, signature, timestamp and nonce headers to `request`.
///
/// # Errors
/// * `InvalidPayload` - method, timestamp or nonce is empty
pub fn sign_request(
    request: InboundRequest,
    headers: &HeaderNames,
    client_id: &str,
    secret: &str,
    algorithm: Algorithm,
    timestamp: i64,
    nonce: &str,
) -> Result<InboundRequest, ApiwardenError> {
    let timestamp = timestamp.to_string();
    let payload = SignaturePayload::new(
        request.method(),
        request.path(),
        request.body(),
        &timestamp,
        nonce,
    )?;
    let signature = hmac::sign(&payload, secret, algorithm)?;

    Ok(request
        .with_header(&headers.api_key, client_id)
        .with_header(&headers.signature, signature)
        .with_header(&headers.timestamp, timestamp)
        .with_header(&headers.nonce, nonce))
}

/// Signs requests for one credential.
#[derive(Clone)]
pub struct RequestSigner {
    client_id: String,
    secret: String,
    algorithm: Algorithm,
    headers: HeaderNames,
}

impl RequestSigner {
    /// Signer using the default header names.
    pub fn new(client_id: impl Into<String>, secret: impl Into<String>, algorithm: Algorithm) -> Self {
        Self {
            client_id: client_id.into(),
            secret: secret.into(),
            algorithm,
            headers: HeaderNames::default(),
        }
    }

    /// Use custom header names.
    pub fn with_headers(mut self, headers: HeaderNames) -> Self {
        self.headers = headers;
        self
    }

    /// Sign with an explicit timestamp and nonce.
    pub fn sign(
        &self,
        request: InboundRequest,
        timestamp: i64,
        nonce: &str,
    ) -> Result<InboundRequest, ApiwardenError> {
        sign_request(
            request,
            &self.headers,
            &self.client_id,
            &self.secret,
            self.algorithm,
            timestamp,
            nonce,
        )
    }

    /// Sign with the clock's current time and a fresh nonce.
    pub fn sign_now<C: Clock + ?Sized>(
        &self,
        request: InboundRequest,
        clock: &C,
    ) -> Result<InboundRequest, ApiwardenError> {
        self.sign(request, clock.unix_seconds(), &generate_nonce())
    }
}

impl fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSigner")
            .field("client_id", &self.client_id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}
