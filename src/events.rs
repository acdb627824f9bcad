//! Verification outcome notifications.
//!
//! Listeners are invoked synchronously, in registration order, after the
//! verifier has produced its result. Closures taking a `&VerificationEvent`
//! are listeners; [`ChannelListener`] hands events to async consumers.

use crate::protocol::result::FailureReason;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// One verification outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum VerificationEvent {
    /// A request authenticated.
    Succeeded {
        /// Credential storage id.
        credential_id: u64,
        /// Authenticated client id.
        client_id: String,
        /// Source IP.
        ip: String,
        /// When it happened.
        at: DateTime<Utc>,
    },
    /// A request was rejected.
    Failed {
        /// Presented client id, if any.
        client_id: Option<String>,
        /// Why.
        reason: FailureReason,
        /// Source IP.
        ip: String,
        /// When it happened.
        at: DateTime<Utc>,
    },
}

impl VerificationEvent {
    /// Whether this is a success event.
    pub fn is_success(&self) -> bool {
        matches!(self, VerificationEvent::Succeeded { .. })
    }
}

/// Receives verification events.
pub trait VerificationListener: Send + Sync {
    /// Called once per verification.
    fn on_event(&self, event: &VerificationEvent);
}

impl<F> VerificationListener for F
where
    F: Fn(&VerificationEvent) + Send + Sync,
{
    fn on_event(&self, event: &VerificationEvent) {
        self(event)
    }
}

/// Forwards events onto an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    sender: UnboundedSender<VerificationEvent>,
}

impl ChannelListener {
    /// Wrap a sender.
    pub fn new(sender: UnboundedSender<VerificationEvent>) -> Self {
        Self { sender }
    }
}

impl VerificationListener for ChannelListener {
    fn on_event(&self, event: &VerificationEvent) {
        if self.sender.send(event.clone()).is_err() {
            tracing::debug!("verification event receiver dropped");
        }
    }
}
