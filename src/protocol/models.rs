//! Credential model.

use crate::crypto::hmac::Algorithm;
use crate::crypto::secret::SealedSecret;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Environment a credential is issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Live traffic.
    Production,
    /// Anything that is not production.
    Testing,
}

impl Environment {
    /// Client id prefix encoding this environment.
    pub fn client_id_prefix(self) -> &'static str {
        match self {
            Environment::Production => "prod",
            Environment::Testing => "test",
        }
    }

    /// Environment encoded in a client id prefix, if recognizable.
    pub fn from_client_id(client_id: &str) -> Option<Self> {
        let (prefix, rest) = client_id.split_once('_')?;
        if rest.is_empty() {
            return None;
        }
        match prefix {
            "prod" => Some(Environment::Production),
            "test" => Some(Environment::Testing),
            _ => None,
        }
    }

    /// Lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Testing => "testing",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One API consumer's signing identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// Storage identifier, assigned by the repository.
    pub id: u64,

    /// Public client identifier, prefixed with the environment.
    pub client_id: String,

    /// Current signing secret.
    pub secret: SealedSecret,

    /// HMAC algorithm the client signs with.
    pub algorithm: Algorithm,

    /// Environment the credential is issued for.
    pub environment: Environment,

    /// Administrative on/off switch.
    pub is_active: bool,

    /// Hard expiry, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// Previous secret, still accepted during the rotation grace period.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub old_secret: Option<SealedSecret>,

    /// End of the rotation grace period.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub old_secret_expires_at: Option<DateTime<Utc>>,

    /// Owning tenant when tenancy is enabled.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tenant_id: Option<String>,

    /// Advisory last-use time, written with debounce.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_used_at: Option<DateTime<Utc>>,

    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Credential {
    /// Whether the credential has passed its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Active and not expired.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_expired(now)
    }

    /// The rotated-out secret, if its grace period has not ended.
    pub fn old_secret_in_grace(&self, now: DateTime<Utc>) -> Option<&SealedSecret> {
        match (&self.old_secret, self.old_secret_expires_at) {
            (Some(secret), Some(until)) if now < until => Some(secret),
            _ => None,
        }
    }
}

/// Fields for a credential that has not been stored yet.
#[derive(Debug, Clone)]
pub struct NewCredential {
    /// Public client identifier.
    pub client_id: String,
    /// Sealed signing secret.
    pub secret: SealedSecret,
    /// HMAC algorithm.
    pub algorithm: Algorithm,
    /// Environment.
    pub environment: Environment,
    /// Optional hard expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// Optional tenant.
    pub tenant_id: Option<String>,
}

impl NewCredential {
    /// Materialize with a storage id.
    pub fn into_credential(self, id: u64, created_at: DateTime<Utc>) -> Credential {
        Credential {
            id,
            client_id: self.client_id,
            secret: self.secret,
            algorithm: self.algorithm,
            environment: self.environment,
            is_active: true,
            expires_at: self.expires_at,
            old_secret: None,
            old_secret_expires_at: None,
            tenant_id: self.tenant_id,
            last_used_at: None,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn sample(now: DateTime<Utc>) -> Credential {
        NewCredential {
            client_id: "prod_ab12".to_string(),
            secret: SealedSecret::from_ciphertext("s3cr3t"),
            algorithm: Algorithm::Sha256,
            environment: Environment::Production,
            expires_at: None,
            tenant_id: None,
        }
        .into_credential(1, now)
    }

    #[test]
    fn test_usable_requires_active_and_unexpired() {
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
        let mut cred = sample(now);
        assert!(cred.is_usable(now));

        cred.is_active = false;
        assert!(!cred.is_usable(now));

        cred.is_active = true;
        cred.expires_at = Some(now + Duration::seconds(1));
        assert!(cred.is_usable(now));
        assert!(!cred.is_usable(now + Duration::seconds(1)));
    }

    #[test]
    fn test_old_secret_only_within_grace() {
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
        let mut cred = sample(now);
        assert!(cred.old_secret_in_grace(now).is_none());

        cred.old_secret = Some(SealedSecret::from_ciphertext("old"));
        cred.old_secret_expires_at = Some(now + Duration::days(7));
        assert!(cred.old_secret_in_grace(now).is_some());
        assert!(cred.old_secret_in_grace(now + Duration::days(7)).is_none());
    }

    #[test]
    fn test_environment_from_client_id() {
        assert_eq!(
            Environment::from_client_id("prod_ab12"),
            Some(Environment::Production)
        );
        assert_eq!(
            Environment::from_client_id("test_xyz"),
            Some(Environment::Testing)
        );
        assert_eq!(Environment::from_client_id("dev_xyz"), None);
        assert_eq!(Environment::from_client_id("prod_"), None);
        assert_eq!(Environment::from_client_id("prodab12"), None);
    }

    #[test]
    fn test_credential_json_round_trip_keeps_ciphertext() {
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
        let cred = sample(now);
        let json = serde_json::to_string(&cred).unwrap();
        assert!(json.contains("\"environment\":\"production\""));
        assert!(json.contains("\"algorithm\":\"sha256\""));
        let back: Credential = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cred);
    }
}
