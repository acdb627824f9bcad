//! Cryptographic primitives for request verification.

pub mod freshness;
pub mod hmac;
pub mod secret;
pub mod signing;
