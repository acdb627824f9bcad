//! Verification outcomes and the rejection body rendered at the boundary.

use crate::protocol::models::Credential;
use serde::Serialize;
use std::fmt;

/// Closed set of authentication failure reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    /// A required header is absent or empty.
    MissingHeaders,
    /// Timestamp unparsable or outside tolerance.
    InvalidTimestamp,
    /// Body exceeds the configured maximum.
    BodyTooLarge,
    /// Source IP has too many recent failures.
    IpBlocked,
    /// Client id has too many recent failures.
    RateLimited,
    /// Nonce too short, or the nonce store could not be consulted.
    InvalidNonce,
    /// Nonce already consumed.
    DuplicateNonce,
    /// Unknown, inactive or expired client id.
    InvalidClientId,
    /// Credential past its expiry.
    CredentialExpired,
    /// Credential environment does not match the deployment.
    EnvironmentMismatch,
    /// Stored secret could not be decrypted.
    InvalidSecret,
    /// Signature does not match.
    InvalidSignature,
}

impl FailureReason {
    /// Every reason.
    pub const ALL: [FailureReason; 12] = [
        FailureReason::MissingHeaders,
        FailureReason::InvalidTimestamp,
        FailureReason::BodyTooLarge,
        FailureReason::IpBlocked,
        FailureReason::RateLimited,
        FailureReason::InvalidNonce,
        FailureReason::DuplicateNonce,
        FailureReason::InvalidClientId,
        FailureReason::CredentialExpired,
        FailureReason::EnvironmentMismatch,
        FailureReason::InvalidSecret,
        FailureReason::InvalidSignature,
    ];

    /// HTTP status returned for this reason.
    pub fn status(self) -> u16 {
        match self {
            FailureReason::BodyTooLarge => 413,
            FailureReason::IpBlocked | FailureReason::RateLimited => 429,
            _ => 401,
        }
    }

    /// Whether this failure counts toward the client's rate limit.
    ///
    /// Only failures an attacker can drive by guessing count; malformed
    /// requests and policy blocks do not.
    pub fn increments_rate_limit(self) -> bool {
        matches!(
            self,
            FailureReason::InvalidClientId
                | FailureReason::EnvironmentMismatch
                | FailureReason::InvalidSignature
        )
    }

    /// Stable machine-readable code.
    pub fn code(self) -> &'static str {
        match self {
            FailureReason::MissingHeaders => "MISSING_HEADERS",
            FailureReason::InvalidTimestamp => "INVALID_TIMESTAMP",
            FailureReason::BodyTooLarge => "BODY_TOO_LARGE",
            FailureReason::IpBlocked => "IP_BLOCKED",
            FailureReason::RateLimited => "RATE_LIMITED",
            FailureReason::InvalidNonce => "INVALID_NONCE",
            FailureReason::DuplicateNonce => "DUPLICATE_NONCE",
            FailureReason::InvalidClientId => "INVALID_CLIENT_ID",
            FailureReason::CredentialExpired => "CREDENTIAL_EXPIRED",
            FailureReason::EnvironmentMismatch => "ENVIRONMENT_MISMATCH",
            FailureReason::InvalidSecret => "INVALID_SECRET",
            FailureReason::InvalidSignature => "INVALID_SIGNATURE",
        }
    }

    /// User-facing message.
    pub fn message(self) -> &'static str {
        match self {
            FailureReason::MissingHeaders => "Missing required authentication headers",
            FailureReason::InvalidTimestamp => "Request timestamp is invalid or expired",
            FailureReason::BodyTooLarge => "Request body too large",
            FailureReason::IpBlocked => "Too many failed attempts from this IP address",
            FailureReason::RateLimited => "Too many failed authentication attempts",
            FailureReason::InvalidNonce => "Invalid nonce",
            FailureReason::DuplicateNonce => "Nonce has already been used",
            FailureReason::InvalidClientId => "Invalid client ID",
            FailureReason::CredentialExpired => "Credential has expired",
            FailureReason::EnvironmentMismatch => "Credential environment mismatch",
            FailureReason::InvalidSecret => "Invalid secret",
            FailureReason::InvalidSignature => "Invalid signature",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Terminal result of verifying one request.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationResult {
    /// The request is authentic.
    Success(Credential),
    /// The request was rejected.
    Failure {
        /// Why.
        reason: FailureReason,
        /// The resolved credential, when lookup got that far.
        credential: Option<Credential>,
    },
}

impl VerificationResult {
    /// Successful result.
    pub fn success(credential: Credential) -> Self {
        VerificationResult::Success(credential)
    }

    /// Failure without a resolved credential.
    pub fn failure(reason: FailureReason) -> Self {
        VerificationResult::Failure {
            reason,
            credential: None,
        }
    }

    /// Whether verification succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, VerificationResult::Success(_))
    }

    /// Failure reason, if any.
    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            VerificationResult::Success(_) => None,
            VerificationResult::Failure { reason, .. } => Some(*reason),
        }
    }

    /// Credential attached to the result, if any.
    pub fn credential(&self) -> Option<&Credential> {
        match self {
            VerificationResult::Success(c) => Some(c),
            VerificationResult::Failure { credential, .. } => credential.as_ref(),
        }
    }

    /// HTTP status: 200 on success, the reason's status otherwise.
    pub fn status(&self) -> u16 {
        self.reason().map_or(200, FailureReason::status)
    }

    /// Whether the failure counts toward the client's rate limit.
    pub fn should_increment_rate_limit(&self) -> bool {
        self.reason()
            .is_some_and(FailureReason::increments_rate_limit)
    }

    /// User-facing message.
    pub fn message(&self) -> &'static str {
        self.reason()
            .map_or("Authenticated", FailureReason::message)
    }

    /// Boundary rejection for a failed result.
    pub fn rejection(&self) -> Option<Rejection> {
        self.reason().map(Rejection::from)
    }
}

/// Structured rejection body returned to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    /// Always false.
    pub success: bool,
    /// Human-readable message.
    pub message: String,
    /// Stable machine-readable code.
    pub code: FailureReason,
    /// HTTP status to send.
    #[serde(skip)]
    pub status: u16,
}

impl From<FailureReason> for Rejection {
    fn from(reason: FailureReason) -> Self {
        Self {
            success: false,
            message: reason.message().to_string(),
            code: reason,
            status: reason.status(),
        }
    }
}

impl Rejection {
    /// JSON body.
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "success": self.success,
            "message": self.message,
            "code": self.code.code(),
        })
        .to_string()
    }
}

/// What a middleware should do with a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Authentication is disabled; pass through untouched.
    Bypassed,
    /// Authenticated as this credential.
    Allowed(Credential),
    /// Reject with this body.
    Denied(Rejection),
}
