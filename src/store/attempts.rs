//! Request attempt log and failure tracking.
//!
//! Every verification attempt is appended here. The same records answer
//! IP-blocking queries ("how many failures from this address recently"),
//! independently of the per-client rate limiter.

use crate::clock::Clock;
use crate::config::ApiwardenConfig;
use crate::protocol::models::Credential;
use crate::protocol::request::InboundRequest;
use crate::protocol::result::FailureReason;
use crate::ApiwardenError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// One logged verification attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    /// Resolved credential, if lookup succeeded.
    pub credential_id: Option<u64>,
    /// Client id as presented.
    pub client_id: Option<String>,
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Source IP.
    pub ip: String,
    /// User agent.
    pub user_agent: Option<String>,
    /// Whether the signature validated.
    pub signature_valid: bool,
    /// Response status.
    pub status: u16,
    /// Failure reason, `None` on success.
    pub reason: Option<FailureReason>,
    /// When the attempt was made.
    pub created_at: DateTime<Utc>,
}

impl AttemptRecord {
    /// Whether the attempt was rejected.
    pub fn is_failure(&self) -> bool {
        self.reason.is_some()
    }

    /// Whether the attempt counts toward its IP's blocking threshold.
    ///
    /// `IP_BLOCKED` rejections do not, so a block lifts once the failures
    /// that caused it leave the window, however often the client retries.
    pub fn counts_toward_ip_block(&self) -> bool {
        self.is_failure() && self.reason != Some(FailureReason::IpBlocked)
    }
}

/// Storage for attempt records.
pub trait AttemptLog: Send + Sync {
    /// Append a record.
    fn append(&self, record: AttemptRecord) -> Result<(), ApiwardenError>;

    /// Failed attempts from an IP since a point in time, counting only
    /// records where [`AttemptRecord::counts_toward_ip_block`] holds.
    fn count_failures_by_ip(&self, ip: &str, since: DateTime<Utc>) -> Result<u64, ApiwardenError>;

    /// Failed attempts for a client id since a point in time.
    fn count_failures_by_client(
        &self,
        client_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, ApiwardenError>;

    /// IPs with at least `min_failures` failures since a point in time, most
    /// first. Counts the same records as `count_failures_by_ip`.
    fn failing_ips(
        &self,
        since: DateTime<Utc>,
        min_failures: u64,
    ) -> Result<Vec<(String, u64)>, ApiwardenError>;

    /// Delete at most `limit` records older than `cutoff`. Returns the count deleted.
    fn delete_before(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<usize, ApiwardenError>;
}

/// An IP currently over the blocking threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedIp {
    /// Address.
    pub ip: String,
    /// Failures within the window.
    pub failures: u64,
}

/// Writes attempt records and answers failure-volume queries.
///
/// Every rejection is logged, `IP_BLOCKED` included, but blocked-request
/// records are left out of the per-IP counts.
#[derive(Clone)]
pub struct RequestLogger {
    log: Arc<dyn AttemptLog>,
    clock: Arc<dyn Clock>,
    threshold: u64,
    window_minutes: u64,
    purge_batch_size: usize,
}

impl RequestLogger {
    /// Create a logger; thresholds default to the IP-blocking settings.
    pub fn new(log: Arc<dyn AttemptLog>, clock: Arc<dyn Clock>, config: &ApiwardenConfig) -> Self {
        Self {
            log,
            clock,
            threshold: config.ip_blocking.threshold,
            window_minutes: config.ip_blocking.window_minutes,
            purge_batch_size: config.purge_batch_size,
        }
    }

    /// Record a successful attempt.
    pub fn log_success(
        &self,
        request: &InboundRequest,
        credential: &Credential,
    ) -> Result<(), ApiwardenError> {
        self.log.append(AttemptRecord {
            credential_id: Some(credential.id),
            client_id: Some(credential.client_id.clone()),
            method: request.method().to_ascii_uppercase(),
            path: request.path().to_string(),
            ip: request.ip().to_string(),
            user_agent: request.user_agent().map(str::to_string),
            signature_valid: true,
            status: 200,
            reason: None,
            created_at: self.clock.now_utc(),
        })
    }

    /// Record a rejected attempt.
    pub fn log_failure(
        &self,
        request: &InboundRequest,
        client_id: Option<&str>,
        reason: FailureReason,
        credential: Option<&Credential>,
    ) -> Result<(), ApiwardenError> {
        self.log.append(AttemptRecord {
            credential_id: credential.map(|c| c.id),
            client_id: client_id.map(str::to_string),
            method: request.method().to_ascii_uppercase(),
            path: request.path().to_string(),
            ip: request.ip().to_string(),
            user_agent: request.user_agent().map(str::to_string),
            signature_valid: false,
            status: reason.status(),
            reason: Some(reason),
            created_at: self.clock.now_utc(),
        })
    }

    /// Whether an IP reached `threshold` failures within `window_minutes`.
    pub fn has_excessive_failures(
        &self,
        ip: &str,
        threshold: Option<u64>,
        window_minutes: Option<u64>,
    ) -> Result<bool, ApiwardenError> {
        let since = self.window_start(window_minutes);
        let failures = self.log.count_failures_by_ip(ip, since)?;
        Ok(failures >= threshold.unwrap_or(self.threshold))
    }

    /// Whether a client id reached `threshold` failures within `window_minutes`.
    pub fn has_excessive_client_failures(
        &self,
        client_id: &str,
        threshold: Option<u64>,
        window_minutes: Option<u64>,
    ) -> Result<bool, ApiwardenError> {
        let since = self.window_start(window_minutes);
        let failures = self.log.count_failures_by_client(client_id, since)?;
        Ok(failures >= threshold.unwrap_or(self.threshold))
    }

    /// IPs at or over the blocking threshold within the window.
    pub fn blocked_ips(
        &self,
        threshold: Option<u64>,
        window_minutes: Option<u64>,
    ) -> Result<Vec<BlockedIp>, ApiwardenError> {
        let since = self.window_start(window_minutes);
        Ok(self
            .log
            .failing_ips(since, threshold.unwrap_or(self.threshold))?
            .into_iter()
            .map(|(ip, failures)| BlockedIp { ip, failures })
            .collect())
    }

    /// Delete records older than `days`, in bounded batches. Idempotent.
    pub fn purge_older_than(&self, days: u32) -> Result<usize, ApiwardenError> {
        let cutoff = self
            .clock
            .now_utc()
            .checked_sub_signed(chrono::Duration::days(i64::from(days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut total = 0;
        loop {
            let deleted = self.log.delete_before(cutoff, self.purge_batch_size)?;
            total += deleted;
            if deleted < self.purge_batch_size {
                break;
            }
        }
        tracing::info!(days, deleted = total, "purged request log");
        Ok(total)
    }

    fn window_start(&self, window_minutes: Option<u64>) -> DateTime<Utc> {
        let minutes = i64::try_from(window_minutes.unwrap_or(self.window_minutes)).unwrap_or(i64::MAX);
        let window = chrono::Duration::try_minutes(minutes).unwrap_or(chrono::Duration::MAX);
        self.clock
            .now_utc()
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}
