// tests/common/mod.rs
#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use event_pipeline::ingest::transport::PollTransport;
use event_pipeline::ingest::types::{PollPage, PollRequest, TransportError};
use parking_lot::Mutex;
use tokio::time::Instant;

/// Serve `app` on an ephemeral localhost port.
pub async fn spawn_server(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}

/// Transport that replays a script of responses and records every request.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<PollPage, TransportError>>>,
    pub calls: Mutex<Vec<(Instant, PollRequest)>>,
    delay: Duration,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<PollPage, TransportError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Every fetch sleeps `delay` (tokio clock) before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().iter().map(|(t, _)| *t).collect()
    }

    pub fn requests(&self) -> Vec<PollRequest> {
        self.calls.lock().iter().map(|(_, r)| r.clone()).collect()
    }
}

#[async_trait]
impl PollTransport for ScriptedTransport {
    async fn fetch(&self, req: &PollRequest) -> Result<PollPage, TransportError> {
        self.calls.lock().push((Instant::now(), req.clone()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        // An exhausted script keeps answering with empty pages.
        self.script.lock().pop_front().unwrap_or_else(|| Ok(PollPage::default()))
    }
}

pub fn page(n: usize, cursor: &str) -> PollPage {
    PollPage {
        data: (0..n)
            .map(|i| serde_json::json!({"id": format!("evt_{i}"), "type": "contact.updated", "n": i}))
            .collect(),
        iterator: Some(cursor.to_string()),
        done: false,
    }
}

pub fn unavailable() -> Result<PollPage, TransportError> {
    Err(TransportError::Status {
        status: 503,
        body: "unavailable".into(),
    })
}
