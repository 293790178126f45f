// src/notify/webhook.rs
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use metrics::counter;
use parking_lot::RwLock;
use reqwest::{header, Client};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinSet;

use super::{DeliveryOutcome, OutboundEvent};
use crate::security::signature::{self, SIGNATURE_HEADER, TIMESTAMP_HEADER};

const RETRY_BASE_MS: u64 = 500;

pub const WEBHOOK_USER_AGENT: &str = concat!("event-pipeline-webhook/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct Destination {
    pub url: String,
    pub secret: String,
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destination")
            .field("url", &self.url)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("destination {0} not found")]
    UnknownDestination(String),
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("webhook request failed: {0}")]
    Request(String),
    #[error("webhook returned non-success status: {status}")]
    NonSuccess { status: u16 },
}

/// Signs and delivers events to registered destinations.
#[derive(Clone)]
struct Sender {
    client: Client,
    timeout: Duration,
    max_attempts: u8,
}

impl Sender {
    async fn deliver(&self, dest: &Destination, body: &str) -> Result<u16, DispatchError> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            // Re-signed per attempt; retries carry a fresh timestamp.
            let (ts, sig) = signature::sign_now(&dest.secret, body.as_bytes());
            let res = self
                .client
                .post(&dest.url)
                .timeout(self.timeout)
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::USER_AGENT, WEBHOOK_USER_AGENT)
                .header(SIGNATURE_HEADER, sig)
                .header(TIMESTAMP_HEADER, ts.to_string())
                .body(body.to_string())
                .send()
                .await;

            let err = match res {
                Ok(rsp) if rsp.status().is_success() => return Ok(rsp.status().as_u16()),
                Ok(rsp) => DispatchError::NonSuccess {
                    status: rsp.status().as_u16(),
                },
                Err(e) => DispatchError::Request(e.to_string()),
            };
            if attempt >= self.max_attempts {
                return Err(err);
            }
            tokio::time::sleep(retry_delay(attempt)).await;
        }
    }
}

pub struct WebhookDispatcher {
    sender: Sender,
    destinations: RwLock<HashMap<String, Destination>>,
}

impl WebhookDispatcher {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            sender: Sender {
                client,
                timeout: Duration::from_secs(10),
                max_attempts: 1,
            },
            destinations: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.sender.timeout = timeout;
        self
    }

    /// Total attempts per delivery (minimum 1), with 500ms doubling backoff.
    pub fn with_retries(mut self, attempts: u8) -> Self {
        self.sender.max_attempts = attempts.max(1);
        self
    }

    pub fn add_destination(&self, id: &str, url: &str, secret: &str) -> &Self {
        self.destinations.write().insert(
            id.to_string(),
            Destination {
                url: url.to_string(),
                secret: secret.to_string(),
            },
        );
        self
    }

    pub fn remove_destination(&self, id: &str) -> bool {
        self.destinations.write().remove(id).is_some()
    }

    pub fn destination_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.destinations.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Register and send a `webhook.ping`. A failed ping is logged; the
    /// destination stays registered either way.
    pub async fn register_with_ping(&self, id: &str, url: &str, secret: &str) -> DeliveryOutcome {
        self.add_destination(id, url, secret);
        let ping = OutboundEvent::new(
            "webhook.ping",
            serde_json::json!({
                "message": "webhook connection established",
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }),
        );
        let outcome = DeliveryOutcome::from(self.send_to(id, &ping).await);
        if let DeliveryOutcome::Failed { reason } = &outcome {
            tracing::warn!(target: "dispatch", destination = id, reason = %reason, "test ping failed");
        }
        outcome
    }

    pub async fn send_to<P: Serialize + ?Sized>(&self, id: &str, payload: &P) -> Result<u16, DispatchError> {
        let dest = self
            .destinations
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownDestination(id.to_string()))?;
        let body = serde_json::to_string(payload)?;
        let res = self.sender.deliver(&dest, &body).await;
        record(id, &res);
        res
    }

    /// Deliver to every destination concurrently. Never fails as a whole.
    pub async fn broadcast<P: Serialize + ?Sized>(&self, payload: &P) -> BTreeMap<String, DeliveryOutcome> {
        let targets: Vec<(String, Destination)> = self
            .destinations
            .read()
            .iter()
            .map(|(id, d)| (id.clone(), d.clone()))
            .collect();

        let body = match serde_json::to_string(payload) {
            Ok(b) => b,
            Err(e) => {
                let reason = DispatchError::from(e).to_string();
                return targets
                    .into_iter()
                    .map(|(id, _)| (id, DeliveryOutcome::Failed { reason: reason.clone() }))
                    .collect();
            }
        };

        let mut set = JoinSet::new();
        for (id, dest) in targets.iter().cloned() {
            let sender = self.sender.clone();
            let body = body.clone();
            set.spawn(async move {
                let res = sender.deliver(&dest, &body).await;
                (id, res)
            });
        }

        let mut out = BTreeMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((id, res)) => {
                    record(&id, &res);
                    if let Err(e) = &res {
                        tracing::error!(target: "dispatch", destination = %id, error = %e, "error sending webhook");
                    }
                    out.insert(id, DeliveryOutcome::from(res));
                }
                Err(e) => tracing::error!(target: "dispatch", error = %e, "delivery task failed"),
            }
        }
        // A panicked task still owes its destination an entry.
        for (id, _) in targets {
            out.entry(id).or_insert_with(|| DeliveryOutcome::Failed {
                reason: "delivery task aborted".into(),
            });
        }
        out
    }
}

impl Default for WebhookDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// One-off signed delivery without a registry.
pub async fn send_signed<P: Serialize + ?Sized>(url: &str, secret: &str, payload: &P) -> Result<u16, DispatchError> {
    let d = WebhookDispatcher::new();
    d.add_destination("one-time", url, secret);
    d.send_to("one-time", payload).await
}

/// Wait after failed attempt `attempt` (1-based): 500ms doubling, saturating.
fn retry_delay(attempt: u8) -> Duration {
    let factor = 1u64.checked_shl(u32::from(attempt.saturating_sub(1))).unwrap_or(u64::MAX);
    Duration::from_millis(RETRY_BASE_MS.saturating_mul(factor))
}

fn record(id: &str, res: &Result<u16, DispatchError>) {
    let outcome = if res.is_ok() { "delivered" } else { "failed" };
    counter!("pipeline_dispatch_total", "outcome" => outcome).increment(1);
    tracing::debug!(target: "dispatch", destination = id, outcome, "webhook delivery");
}
