// src/ingest/mod.rs
pub mod scheduler;
pub mod transport;
pub mod types;

use std::sync::Arc;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use reqwest::Url;
use serde_json::Value;

use crate::enrich::{enrich, EnrichOptions, EnrichedRow};
use crate::ingest::transport::{HttpTransport, PollTransport};
use crate::ingest::types::{
    Endpoint, ErrorHandling, PollError, PollHealth, PollOptions, PollRequest, PollResult,
};

/// Confidence given to polled fields; polled data comes from an authenticated pull.
pub const POLLED_CONFIDENCE: u8 = 85;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_polls_total", "Poll attempts by final outcome.");
        describe_counter!("pipeline_poll_retries_total", "Poll retries after a failure.");
        describe_counter!("pipeline_events_total", "Raw events returned by pollers.");
        describe_histogram!("pipeline_poll_ms", "Poll latency in milliseconds.");
        describe_counter!(
            "pipeline_ticks_skipped_total",
            "Scheduled ticks skipped because the previous cycle was still running."
        );
        describe_gauge!("pipeline_last_tick_ts", "Unix ts when a poll cycle last ran.");
        describe_counter!("pipeline_inbound_accepted_total", "Inbound webhooks accepted.");
        describe_counter!("pipeline_inbound_rejected_total", "Inbound webhooks rejected by reason.");
        describe_counter!("pipeline_dispatch_total", "Outbound deliveries by outcome.");
        describe_gauge!("pipeline_replay_cache_size", "Signatures held by the replay guard.");
    });
}

/// Registry of remote sources plus the cursor-driven fetch loop.
///
/// Endpoints are kept in registration order; the lock is never held across I/O.
pub struct PollingEngine {
    endpoints: RwLock<Vec<Endpoint>>,
    transport: Arc<dyn PollTransport>,
}

impl PollingEngine {
    pub fn new() -> Self {
        Self::with_transport(Arc::new(HttpTransport::new()))
    }

    pub fn with_transport(transport: Arc<dyn PollTransport>) -> Self {
        ensure_metrics_described();
        Self {
            endpoints: RwLock::new(Vec::new()),
            transport,
        }
    }

    /// Insert or replace an endpoint. Re-registering keeps the stored cursor
    /// and the original position.
    pub fn register_endpoint(&self, id: &str, url: &str, credential: &str) {
        if let Some(why) = url_warning(url) {
            tracing::warn!(target: "ingest", endpoint = id, url, why, "endpoint url does not look like a poller endpoint");
        }

        let mut eps = self.endpoints.write();
        match eps.iter_mut().find(|e| e.id == id) {
            Some(ep) => {
                ep.url = url.to_string();
                ep.credential = credential.to_string();
            }
            None => eps.push(Endpoint {
                id: id.to_string(),
                url: url.to_string(),
                credential: credential.to_string(),
                cursor: None,
                last_poll_at: None,
            }),
        }
        tracing::info!(target: "ingest", endpoint = id, "registered polling endpoint");
    }

    pub fn remove_endpoint(&self, id: &str) -> bool {
        let mut eps = self.endpoints.write();
        let before = eps.len();
        eps.retain(|e| e.id != id);
        before != eps.len()
    }

    pub fn endpoint_ids(&self) -> Vec<String> {
        self.endpoints.read().iter().map(|e| e.id.clone()).collect()
    }

    pub fn endpoint(&self, id: &str) -> Option<Endpoint> {
        self.endpoints.read().iter().find(|e| e.id == id).cloned()
    }

    pub fn cursor(&self, id: &str) -> Option<String> {
        self.endpoints
            .read()
            .iter()
            .find(|e| e.id == id)
            .and_then(|e| e.cursor.clone())
    }

    /// Swap the credential. Polls already in flight finish with the old one.
    pub fn update_endpoint_credential(&self, id: &str, credential: &str) -> Result<(), PollError> {
        let mut eps = self.endpoints.write();
        let ep = eps
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| PollError::UnknownEndpoint(id.to_string()))?;
        ep.credential = credential.to_string();
        tracing::info!(target: "ingest", endpoint = id, "rotated endpoint credential");
        Ok(())
    }

    pub async fn poll_endpoint(&self, id: &str, options: &PollOptions) -> Result<PollResult, PollError> {
        let snapshot = self
            .endpoint(id)
            .ok_or_else(|| PollError::UnknownEndpoint(id.to_string()))?;

        let request = PollRequest {
            url: build_poll_url(&snapshot.url, snapshot.cursor.as_deref(), options.batch_size)
                .map_err(|reason| PollError::InvalidUrl {
                    endpoint: id.to_string(),
                    reason,
                })?,
            credential: snapshot.credential.clone(),
            timeout: options.timeout,
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let t0 = std::time::Instant::now();
            let res = self.transport.fetch(&request).await;
            histogram!("pipeline_poll_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

            let err = match res {
                Ok(page) => {
                    counter!("pipeline_polls_total", "outcome" => "ok").increment(1);
                    counter!("pipeline_events_total").increment(page.data.len() as u64);
                    let next_cursor = page.iterator.or(snapshot.cursor);
                    self.record_success(id, next_cursor.clone());
                    tracing::debug!(
                        target: "ingest",
                        endpoint = id,
                        events = page.data.len(),
                        attempt,
                        "poll ok"
                    );
                    return Ok(PollResult {
                        endpoint_id: id.to_string(),
                        events: page.data,
                        next_cursor,
                        exhausted: page.done,
                        health: PollHealth::Ok,
                    });
                }
                Err(e) => e,
            };

            match options.error_handling {
                ErrorHandling::Retry if attempt <= options.max_retries => {
                    let wait = options.backoff(attempt);
                    tracing::warn!(
                        target: "ingest",
                        endpoint = id,
                        attempt,
                        max_retries = options.max_retries,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "poll failed, retrying"
                    );
                    counter!("pipeline_poll_retries_total").increment(1);
                    tokio::time::sleep(wait).await;
                }
                ErrorHandling::Log => {
                    tracing::warn!(target: "ingest", endpoint = id, error = %err, "poll failed");
                    counter!("pipeline_polls_total", "outcome" => "failed").increment(1);
                    return Ok(PollResult::failed(id, snapshot.cursor, err.to_string()));
                }
                ErrorHandling::Retry | ErrorHandling::Throw => {
                    counter!("pipeline_polls_total", "outcome" => "failed").increment(1);
                    return Err(PollError::Transport {
                        endpoint: id.to_string(),
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }
    }

    /// Poll every endpoint in registration order. Always one result per
    /// endpoint; failures become empty `Failed` placeholders.
    pub async fn poll_all_endpoints(&self, options: &PollOptions) -> Vec<PollResult> {
        let ids = self.endpoint_ids();
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            match self.poll_endpoint(&id, options).await {
                Ok(r) => results.push(r),
                Err(e) => {
                    tracing::error!(target: "ingest", endpoint = %id, error = %e, "error polling endpoint");
                    results.push(PollResult::failed(&id, self.cursor(&id), e.to_string()));
                }
            }
        }
        results
    }

    /// Normalize every event of a poll, attributing it to its endpoint.
    pub fn process_events(&self, result: &PollResult) -> Vec<EnrichedRow> {
        process_events(result)
    }

    fn record_success(&self, id: &str, cursor: Option<String>) {
        let mut eps = self.endpoints.write();
        match eps.iter_mut().find(|e| e.id == id) {
            Some(ep) => {
                ep.cursor = cursor;
                ep.last_poll_at = Some(chrono::Utc::now());
            }
            None => {
                tracing::debug!(target: "ingest", endpoint = id, "endpoint removed during poll; cursor not stored");
            }
        }
    }
}

impl Default for PollingEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// See [`PollingEngine::process_events`].
pub fn process_events(result: &PollResult) -> Vec<EnrichedRow> {
    result
        .events
        .iter()
        .map(|event| {
            let event_id = event.get("id").map(display_value).unwrap_or_else(|| "unknown".into());
            let event_type = event
                .get("type")
                .map(display_value)
                .unwrap_or_else(|| "unknown".into());
            let opts = EnrichOptions::default()
                .confidence(POLLED_CONFIDENCE)
                .source(format!("Event Type: {event_type}"));
            let source = format!("poller/{}/event/{}", result.endpoint_id, event_id);
            enrich(event, &[source], &opts)
        })
        .collect()
}

fn display_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "unknown".to_string(),
        other => other.to_string(),
    }
}

/// Base URL plus `iterator` (when a cursor exists) and `size` query parameters.
pub fn build_poll_url(base: &str, cursor: Option<&str>, batch_size: u32) -> Result<String, String> {
    let mut url = Url::parse(base).map_err(|e| e.to_string())?;
    {
        let mut q = url.query_pairs_mut();
        if let Some(c) = cursor {
            q.append_pair("iterator", c);
        }
        q.append_pair("size", &batch_size.to_string());
    }
    Ok(url.into())
}

fn url_warning(url: &str) -> Option<&'static str> {
    let Ok(parsed) = Url::parse(url) else {
        return Some("unparseable url");
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return Some("scheme is not http(s)");
    }
    let host = parsed.host_str().unwrap_or_default();
    if !host.contains("poller") && !parsed.path().contains("poller") {
        return Some("no poller segment in host or path");
    }
    None
}
