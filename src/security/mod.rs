// src/security/mod.rs
pub mod clock;
pub mod replay;
pub mod signature;

use std::sync::Arc;

use metrics::counter;
use serde_json::Value;
use thiserror::Error;

pub use clock::{check_clock_sync, ClockSync};
pub use replay::ReplayGuard;
pub use signature::{generate_secret, sign, sign_now, verify, verify_at};

/// Why an inbound message was refused. Messages are safe to log or return to
/// the sender: they never include the secret or the expected signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("missing required webhook security headers")]
    MissingSecurityHeaders,
    #[error("webhook timestamp is not a unix timestamp")]
    MalformedTimestamp,
    #[error("webhook timestamp is outside the tolerance window")]
    ExpiredTimestamp,
    #[error("webhook signature verification failed")]
    SignatureMismatch,
    #[error("webhook signature was already processed")]
    DuplicateSignature,
    #[error("webhook body is not valid JSON")]
    InvalidPayload,
}

impl Rejection {
    /// Stable machine-readable code for logs, metrics labels and responses.
    pub fn as_code(&self) -> &'static str {
        match self {
            Rejection::MissingSecurityHeaders => "missing_security_headers",
            Rejection::MalformedTimestamp => "malformed_timestamp",
            Rejection::ExpiredTimestamp => "expired_timestamp",
            Rejection::SignatureMismatch => "signature_mismatch",
            Rejection::DuplicateSignature => "duplicate_signature",
            Rejection::InvalidPayload => "invalid_payload",
        }
    }
}

/// Inbound entry point: headers + raw body in, parsed JSON payload out.
pub struct InboundVerifier {
    secret: String,
    tolerance_secs: u64,
    replay: Arc<ReplayGuard>,
}

impl InboundVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: u64, replay: Arc<ReplayGuard>) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
            replay,
        }
    }

    pub fn verify(
        &self,
        body: &[u8],
        signature: Option<&str>,
        timestamp: Option<&str>,
    ) -> Result<Value, Rejection> {
        self.verify_at(body, signature, timestamp, signature::now_unix())
    }

    /// Checks run in order: headers, timestamp format, tolerance, signature,
    /// replay, JSON. Only authentic messages reach the replay cache.
    pub fn verify_at(
        &self,
        body: &[u8],
        signature: Option<&str>,
        timestamp: Option<&str>,
        now: i64,
    ) -> Result<Value, Rejection> {
        let res = self.check(body, signature, timestamp, now);
        match &res {
            Ok(_) => counter!("pipeline_inbound_accepted_total").increment(1),
            Err(r) => {
                tracing::warn!(target: "security", reason = r.as_code(), "inbound webhook rejected");
                counter!("pipeline_inbound_rejected_total", "reason" => r.as_code()).increment(1);
            }
        }
        res
    }

    fn check(
        &self,
        body: &[u8],
        signature: Option<&str>,
        timestamp: Option<&str>,
        now: i64,
    ) -> Result<Value, Rejection> {
        let (Some(sig), Some(ts)) = (
            signature.filter(|s| !s.trim().is_empty()),
            timestamp.filter(|s| !s.trim().is_empty()),
        ) else {
            return Err(Rejection::MissingSecurityHeaders);
        };
        let ts = parse_timestamp(ts)?;

        verify_at(&self.secret, body, ts, sig, self.tolerance_secs, now)?;

        if self.replay.is_duplicate(sig.trim()) {
            return Err(Rejection::DuplicateSignature);
        }

        serde_json::from_slice(body).map_err(|_| Rejection::InvalidPayload)
    }
}

/// Signatures cover the decimal rendering of the timestamp, so only the
/// canonical form (no sign, no leading zeros) can ever verify.
fn parse_timestamp(header: &str) -> Result<i64, Rejection> {
    let text = header.trim();
    let ts: i64 = text.parse().map_err(|_| Rejection::MalformedTimestamp)?;
    if ts.to_string() != text {
        return Err(Rejection::MalformedTimestamp);
    }
    Ok(ts)
}
