//! # Apiwarden
//!
//! **Hardened HMAC request authentication for Rust services.**
//!
//! Apiwarden verifies that an inbound API request was signed by a known
//! client with its shared secret, and that it is fresh, unique and within
//! abuse limits. Every outcome is a value: expected rejections and backend
//! faults alike resolve to a [`VerificationResult`], never a panic.
//!
//! ## Features
//!
//! - **HMAC-SHA256/384/512 signatures** over `METHOD\nPATH\nBODY\nTIMESTAMP\nNONCE`
//! - **Constant-time comparison** of presented and expected signatures
//! - **Replay protection**: timestamp window plus atomic, TTL-bounded nonce store
//! - **Abuse limits**: per-client failure rate limiting and per-IP blocking
//! - **Zero-downtime rotation**: the previous secret stays valid for a grace period
//! - **Fail-closed**: an unreachable cache rejects rather than bypasses
//!
//! ## Quickstart
//!
//! ```
//! use apiwarden::{ApiwardenConfig, Backends, Decision, Environment, InboundRequest, Verifier};
//! use apiwarden::admin::GenerateOptions;
//! use apiwarden::client::signer::RequestSigner;
//! use apiwarden::clock::SystemClock;
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), apiwarden::ApiwardenError> {
//!     let config = ApiwardenConfig::from_json_str(r#"{"deployment_environment": "production"}"#)?;
//!     let verifier = Verifier::new(config, Backends::in_memory(Arc::new(SystemClock)))?;
//!
//!     let issued = verifier
//!         .admin()
//!         .generate(Environment::Production, GenerateOptions::default())?;
//!
//!     let signer = RequestSigner::new(
//!         issued.credential.client_id.clone(),
//!         issued.secret.clone(),
//!         issued.credential.algorithm,
//!     );
//!     let request = InboundRequest::new("POST", "/api/users")
//!         .with_body(r#"{"name":"John"}"#)
//!         .with_ip("203.0.113.7");
//!     let request = signer.sign_now(request, &SystemClock)?;
//!
//!     match verifier.authorize(&request) {
//!         Decision::Allowed(credential) => println!("hello {}", credential.client_id),
//!         Decision::Denied(rejection) => println!("{} {}", rejection.status, rejection.to_json()),
//!         Decision::Bypassed => println!("authentication disabled"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Threat Model
//!
//! Apiwarden protects against:
//! - **Forged requests**: without the secret, no valid signature can be produced
//! - **Tampering**: any change to method, path, body, timestamp or nonce breaks the signature
//! - **Replay**: a nonce is accepted once; stale timestamps are rejected outright
//! - **Credential guessing**: failures count toward client and IP limits
//!
//! Apiwarden does **not** provide confidentiality of request bodies; run it
//! behind TLS.
//!
//! ## Configuration
//!
//! See [`ApiwardenConfig`] for every option and its default.

#![warn(missing_docs)]

// Core modules
pub mod clock;
pub mod config;
pub mod errors;

// Crypto layer
pub mod crypto;

// Protocol layer
pub mod protocol;

// Cache layer
pub mod cache;

// Stores
pub mod store;

// Policy layer
pub mod policy;

// Client-side signing
pub mod client;

// Notifications
pub mod events;

// Administration
pub mod admin;

// Verifier (main public API)
pub mod verifier;

// Re-exports for public API
pub use admin::CredentialManager;
pub use clock::{Clock, SystemClock};
pub use config::ApiwardenConfig;
pub use crypto::hmac::Algorithm;
pub use errors::ApiwardenError;
pub use protocol::models::{Credential, Environment};
pub use protocol::request::InboundRequest;
pub use protocol::result::{Decision, FailureReason, Rejection, VerificationResult};
pub use verifier::{Backends, Verifier};

#[cfg(any(test, feature = "test-seams"))]
pub use clock::MockClock;
