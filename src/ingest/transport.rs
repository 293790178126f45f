// src/ingest/transport.rs
use async_trait::async_trait;
use reqwest::{header, Client};

use crate::ingest::types::{PollPage, PollRequest, TransportError};

pub const POLLER_USER_AGENT: &str = concat!("event-pipeline-poller/", env!("CARGO_PKG_VERSION"));

/// Executes one poll request. The engine owns retries and cursor bookkeeping.
#[async_trait]
pub trait PollTransport: Send + Sync {
    async fn fetch(&self, req: &PollRequest) -> Result<PollPage, TransportError>;
}

/// `reqwest`-backed transport used in production.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PollTransport for HttpTransport {
    async fn fetch(&self, req: &PollRequest) -> Result<PollPage, TransportError> {
        let resp = self
            .client
            .get(&req.url)
            .timeout(req.timeout)
            .bearer_auth(&req.credential)
            .header(header::ACCEPT, "application/json")
            .header(header::USER_AGENT, POLLER_USER_AGENT)
            .send()
            .await
            .map_err(map_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: truncate(&body, 256),
            });
        }

        resp.json::<PollPage>().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Decode(e.to_string())
            }
        })
    }
}

fn map_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connect(e.to_string())
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
