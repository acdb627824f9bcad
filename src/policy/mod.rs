//! Request admission policies.

pub mod access;
pub mod rate_limit;
pub mod tenancy;
