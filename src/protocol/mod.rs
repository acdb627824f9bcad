//! Data types exchanged between the verifier and its callers.

pub mod models;
pub mod request;
pub mod result;
