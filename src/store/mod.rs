//! Shared-state stores: nonces, credentials and the request log.

pub mod attempts;
pub mod credentials;
pub mod memory;
pub mod nonce;
