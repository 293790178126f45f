// src/security/clock.rs
//! Local clock drift check. Signature verification rejects anything outside
//! the tolerance window, so a skewed host clock rejects every sender.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{header, Client};
use serde::Serialize;
use serde_json::Value;

/// Drift below this counts as synced.
pub const MAX_DRIFT: Duration = Duration::from_millis(5_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockSync {
    pub is_synced: bool,
    /// `None` when the reference time could not be read.
    pub drift_ms: Option<u64>,
}

impl ClockSync {
    pub fn unknown() -> Self {
        Self {
            is_synced: false,
            drift_ms: None,
        }
    }

    pub fn between(reference: DateTime<Utc>, local: DateTime<Utc>) -> Self {
        let drift_ms = (reference - local).num_milliseconds().unsigned_abs();
        Self {
            is_synced: drift_ms < MAX_DRIFT.as_millis() as u64,
            drift_ms: Some(drift_ms),
        }
    }
}

/// Compare the local clock with a time service. The reference is the JSON
/// `utc_datetime` field when present, else the HTTP `Date` header.
/// Failures report [`ClockSync::unknown`] and never error.
pub async fn check_clock_sync(client: &Client, url: &str) -> ClockSync {
    let resp = match client.get(url).timeout(Duration::from_secs(5)).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(target: "security", url, error = %e, "clock sync check failed");
            return ClockSync::unknown();
        }
    };
    let local = Utc::now();

    let date_header = resp
        .headers()
        .get(header::DATE)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| DateTime::parse_from_rfc2822(s).ok())
        .map(|d| d.with_timezone(&Utc));
    let from_body = resp
        .json::<Value>()
        .await
        .ok()
        .and_then(|v| v.get("utc_datetime").and_then(Value::as_str).map(str::to_string))
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc));

    match from_body.or(date_header) {
        Some(reference) => {
            let sync = ClockSync::between(reference, local);
            if !sync.is_synced {
                tracing::warn!(target: "security", drift_ms = sync.drift_ms, "local clock drift exceeds 5s");
            }
            sync
        }
        None => {
            tracing::warn!(target: "security", url, "clock sync response carried no usable time");
            ClockSync::unknown()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drift_is_symmetric_and_bounded_by_five_seconds() {
        let local = Utc::now();
        let ahead = ClockSync::between(local + chrono::Duration::milliseconds(4_999), local);
        assert!(ahead.is_synced);
        assert_eq!(ahead.drift_ms, Some(4_999));

        let behind = ClockSync::between(local - chrono::Duration::seconds(5), local);
        assert!(!behind.is_synced);
        assert_eq!(behind.drift_ms, Some(5_000));

        assert_eq!(ClockSync::unknown().drift_ms, None);
    }
}
