//! Client-side request signing.

pub mod signer;
