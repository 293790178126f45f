// src/ingest/types.rs
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One remote source owned by the polling engine.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub id: String,
    pub url: String,
    pub credential: String,
    pub cursor: Option<String>,
    pub last_poll_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("credential", &"<redacted>")
            .field("cursor", &self.cursor)
            .field("last_poll_at", &self.last_poll_at)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollHealth {
    Ok,
    Failed { reason: String },
}

/// Outcome of one poll of one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollResult {
    pub endpoint_id: String,
    pub events: Vec<Value>,
    pub next_cursor: Option<String>,
    pub exhausted: bool,
    pub health: PollHealth,
}

impl PollResult {
    /// Empty placeholder for an endpoint that could not be polled.
    pub fn failed(endpoint_id: &str, cursor: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            endpoint_id: endpoint_id.to_string(),
            events: Vec::new(),
            next_cursor: cursor,
            exhausted: false,
            health: PollHealth::Failed {
                reason: reason.into(),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.health == PollHealth::Ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorHandling {
    /// Propagate the first failure.
    #[default]
    Throw,
    /// Log and return an empty result keeping the previous cursor.
    Log,
    /// Retry with exponential backoff; propagate once retries run out.
    Retry,
}

#[derive(Debug, Clone)]
pub struct PollOptions {
    pub batch_size: u32,
    pub timeout: Duration,
    pub error_handling: ErrorHandling,
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further attempt.
    pub backoff_base: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            timeout: Duration::from_millis(30_000),
            error_handling: ErrorHandling::Throw,
            max_retries: 3,
            backoff_base: Duration::from_millis(1_000),
        }
    }
}

impl PollOptions {
    pub fn retry(max_retries: u32) -> Self {
        Self {
            error_handling: ErrorHandling::Retry,
            max_retries,
            ..Self::default()
        }
    }

    /// Wait before retry number `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor)
    }
}

/// Response body of a poller endpoint. Missing and `null` fields both read
/// as their defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PollPage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: Vec<Value>,
    #[serde(default)]
    pub iterator: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub done: bool,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A fully built GET request for one poll attempt.
#[derive(Clone)]
pub struct PollRequest {
    pub url: String,
    pub credential: String,
    pub timeout: Duration,
}

impl fmt::Debug for PollRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollRequest")
            .field("url", &self.url)
            .field("credential", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("poll failed with HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid poll response: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("polling endpoint not found: {0}")]
    UnknownEndpoint(String),
    #[error("endpoint {endpoint} has an invalid url: {reason}")]
    InvalidUrl { endpoint: String, reason: String },
    #[error("polling {endpoint} failed after {attempts} attempt(s): {source}")]
    Transport {
        endpoint: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },
}
