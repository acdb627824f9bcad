//! Credential admission checks.
//!
//! This module decides whether a resolved credential may authenticate in
//! the current deployment:
//! - The credential must be active and unexpired
//! - When enforcement is on, its environment must match the deployment

use crate::config::ApiwardenConfig;
use crate::protocol::models::{Credential, Environment};
use crate::protocol::result::FailureReason;
use chrono::{DateTime, Utc};

/// Environment-matching policy, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentPolicy {
    enforce: bool,
    required: Environment,
}

impl EnvironmentPolicy {
    /// Build from configuration.
    pub fn from_config(config: &ApiwardenConfig) -> Self {
        Self {
            enforce: config.enforce_environment,
            required: config.required_environment(),
        }
    }

    /// Environment a credential must carry to be accepted here.
    pub fn required(&self) -> Environment {
        self.required
    }

    /// Whether the credential's environment is acceptable.
    pub fn permits(&self, credential: &Credential) -> bool {
        !self.enforce || credential.environment == self.required
    }
}

/// Check that a resolved credential may authenticate.
///
/// # Returns
/// * `Ok(())` - Access granted
/// * `Err(InvalidClientId)` - Credential inactive or expired
/// * `Err(EnvironmentMismatch)` - Credential issued for another environment
pub fn check_access(
    credential: &Credential,
    policy: &EnvironmentPolicy,
    now: DateTime<Utc>,
) -> Result<(), FailureReason> {
    if !credential.is_usable(now) {
        return Err(FailureReason::InvalidClientId);
    }

    if !policy.permits(credential) {
        return Err(FailureReason::EnvironmentMismatch);
    }

    Ok(())
}
