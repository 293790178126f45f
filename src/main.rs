//! Event pipeline: binary entrypoint.
//! Loads config, registers pollers and destinations, starts the scheduler and
//! serves the inbound webhook + metrics HTTP surface.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use event_pipeline::api::{self, AppState};
use event_pipeline::config;
use event_pipeline::metrics::Metrics;
use event_pipeline::security::{check_clock_sync, generate_secret, InboundVerifier, ReplayGuard};
use event_pipeline::sink::{LogSink, RowSink};
use event_pipeline::{OutboundEvent, PollingEngine, Scheduler, WebhookDispatcher};

const ENV_INBOUND_SECRET: &str = "INBOUND_WEBHOOK_SECRET";

/// JSON logs when `PIPELINE_LOG_JSON=1`, compact otherwise.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("event_pipeline=info,warn"));
    let json = std::env::var("PIPELINE_LOG_JSON").is_ok_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = config::load_default().context("loading pipeline config")?;
    let metrics = Metrics::init()?;

    // --- Outbound destinations ---
    let dispatcher = Arc::new(WebhookDispatcher::new());
    for d in &cfg.destinations {
        if d.ping_on_register {
            dispatcher.register_with_ping(&d.id, &d.url, &d.secret).await;
        } else {
            dispatcher.add_destination(&d.id, &d.url, &d.secret);
        }
    }

    // --- Polling ---
    let engine = Arc::new(PollingEngine::new());
    for ep in &cfg.endpoints {
        engine.register_endpoint(&ep.id, &ep.url, &ep.credential);
    }
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&engine), cfg.poll_options()));
    let sink: Arc<dyn RowSink> = Arc::new(LogSink);

    if engine.endpoint_ids().is_empty() {
        tracing::warn!("no polling endpoints configured; scheduler idle");
    } else {
        let sink = Arc::clone(&sink);
        let dispatcher = Arc::clone(&dispatcher);
        scheduler.start(cfg.poll_interval(), move |results, rows| {
            let sink = Arc::clone(&sink);
            let dispatcher = Arc::clone(&dispatcher);
            async move {
                let failed = results.iter().filter(|r| !r.is_ok()).count();
                if failed > 0 {
                    tracing::warn!(failed, total = results.len(), "some endpoints failed this cycle");
                }
                if rows.is_empty() {
                    return;
                }
                if !dispatcher.destination_ids().is_empty() {
                    let event = OutboundEvent::new("pipeline.rows", serde_json::json!({ "rows": &rows }));
                    let outcomes = dispatcher.broadcast(&event).await;
                    let delivered = outcomes.values().filter(|o| o.is_delivered()).count();
                    tracing::info!(delivered, destinations = outcomes.len(), "forwarded enriched rows");
                }
                if let Err(e) = sink.store(rows).await {
                    tracing::error!(error = ?e, "sink store failed");
                }
            }
        });
    }

    // --- Inbound verification ---
    let secret = match cfg.inbound_secret.clone().or_else(|| std::env::var(ENV_INBOUND_SECRET).ok()) {
        Some(s) => s,
        None => {
            tracing::warn!("no inbound secret configured; generated an ephemeral one, inbound webhooks will not verify");
            generate_secret(32)
        }
    };
    if let Some(url) = cfg.clock_check_url.clone() {
        tokio::spawn(async move {
            let sync = check_clock_sync(&reqwest::Client::new(), &url).await;
            tracing::info!(synced = sync.is_synced, drift_ms = sync.drift_ms, "clock sync check");
        });
    }
    let replay = Arc::new(ReplayGuard::with_sweeper(cfg.replay_expiry(), cfg.replay_sweep_every()));
    let verifier = Arc::new(InboundVerifier::new(secret, cfg.signature_tolerance_secs, replay));

    let app = api::router(AppState {
        verifier,
        scheduler: Arc::clone(&scheduler),
        sink,
    })
    .merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr)
        .await
        .with_context(|| format!("binding {}", cfg.listen_addr))?;
    tracing::info!(addr = %cfg.listen_addr, endpoints = engine.endpoint_ids().len(), "event pipeline listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("http server")?;

    scheduler.stop();
    tracing::info!("shutdown complete");
    Ok(())
}
