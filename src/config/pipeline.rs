// src/config/pipeline.rs
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::ingest::types::{ErrorHandling, PollOptions};

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_poll_interval_ms() -> u64 {
    60_000
}
fn default_batch_size() -> u32 {
    100
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_tolerance_secs() -> u64 {
    300
}
fn default_replay_expiry_secs() -> u64 {
    3_600
}
fn default_replay_sweep_secs() -> u64 {
    600
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub id: String,
    pub url: String,
    /// Bearer credential; `env:NAME` reads it from the environment.
    pub credential: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub id: String,
    pub url: String,
    /// Signing secret; `env:NAME` reads it from the environment.
    pub secret: String,
    #[serde(default)]
    pub ping_on_register: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub error_handling: ErrorHandling,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_tolerance_secs")]
    pub signature_tolerance_secs: u64,
    #[serde(default = "default_replay_expiry_secs")]
    pub replay_expiry_secs: u64,
    #[serde(default = "default_replay_sweep_secs")]
    pub replay_sweep_secs: u64,
    /// Secret for inbound webhooks; `env:NAME` supported.
    #[serde(default)]
    pub inbound_secret: Option<String>,
    /// Time service checked for local clock drift at startup.
    #[serde(default)]
    pub clock_check_url: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub destinations: Vec<DestinationConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            timeout_ms: default_timeout_ms(),
            error_handling: ErrorHandling::default(),
            max_retries: default_max_retries(),
            signature_tolerance_secs: default_tolerance_secs(),
            replay_expiry_secs: default_replay_expiry_secs(),
            replay_sweep_secs: default_replay_sweep_secs(),
            inbound_secret: None,
            clock_check_url: None,
            endpoints: Vec::new(),
            destinations: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Resolve `env:NAME` references and sanitize out-of-range values.
    pub fn resolve(mut self) -> Result<Self> {
        if let Some(s) = self.inbound_secret.take() {
            self.inbound_secret = Some(resolve_env_ref(&s)?);
        }
        for ep in &mut self.endpoints {
            ep.credential = resolve_env_ref(&ep.credential)?;
        }
        for d in &mut self.destinations {
            d.secret = resolve_env_ref(&d.secret)?;
        }

        if self.batch_size == 0 {
            self.batch_size = default_batch_size();
        }
        if self.replay_sweep_secs == 0 {
            self.replay_sweep_secs = default_replay_sweep_secs();
        }
        if self.poll_interval_ms == 0 {
            tracing::warn!("poll_interval_ms = 0 is invalid, using default");
            self.poll_interval_ms = default_poll_interval_ms();
        }
        if self.poll_interval_ms < 5_000 {
            tracing::warn!(
                poll_interval_ms = self.poll_interval_ms,
                "poll interval below recommended minimum of 5000ms"
            );
        }
        Ok(self)
    }

    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            batch_size: self.batch_size,
            timeout: Duration::from_millis(self.timeout_ms),
            error_handling: self.error_handling,
            max_retries: self.max_retries,
            ..PollOptions::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn replay_expiry(&self) -> Duration {
        Duration::from_secs(self.replay_expiry_secs)
    }

    pub fn replay_sweep_every(&self) -> Duration {
        Duration::from_secs(self.replay_sweep_secs)
    }
}

fn resolve_env_ref(value: &str) -> Result<String> {
    match value.trim().strip_prefix("env:") {
        Some(name) => std::env::var(name.trim()).map_err(|_| anyhow!("Missing {} env var", name.trim())),
        None => Ok(value.to_string()),
    }
}
