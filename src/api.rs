use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::enrich::{calculate_confidence_score, enrich, EnrichOptions, EnrichedRow};
use crate::ingest::scheduler::{PollStats, Scheduler};
use crate::ingest::types::PollHealth;
use crate::security::signature::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::security::{InboundVerifier, Rejection};
use crate::sink::RowSink;

#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<InboundVerifier>,
    pub scheduler: Arc<Scheduler>,
    pub sink: Arc<dyn RowSink>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/webhooks/inbound", post(inbound_webhook))
        .route("/stats", get(stats))
        .route("/poll", post(poll_now))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct InboundResp {
    message: &'static str,
    row: EnrichedRow,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PollSummary {
    endpoint_id: String,
    events: usize,
    next_cursor: Option<String>,
    exhausted: bool,
    health: PollHealth,
}

#[derive(Serialize)]
struct PollResp {
    results: Vec<PollSummary>,
    rows: usize,
}

fn rejection_response(r: Rejection) -> Response {
    let status = match r {
        Rejection::DuplicateSignature => StatusCode::CONFLICT,
        Rejection::InvalidPayload => StatusCode::BAD_REQUEST,
        _ => StatusCode::UNAUTHORIZED,
    };
    (status, Json(json!({ "error": r.as_code() }))).into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn inbound_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let payload = match state.verifier.verify(
        &body,
        header_str(&headers, SIGNATURE_HEADER),
        header_str(&headers, TIMESTAMP_HEADER),
    ) {
        Ok(p) => p,
        Err(r) => return rejection_response(r),
    };

    let event = payload
        .get("event")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let data = payload.get("data").cloned().unwrap_or_else(|| payload.clone());

    let sources = vec![format!("inbound/{event}")];
    let opts = EnrichOptions::default().confidence(calculate_confidence_score(&sources, &data));
    let row = enrich(&data, &sources, &opts);

    if let Err(e) = state.sink.store(vec![row.clone()]).await {
        tracing::error!(error = ?e, event = %event, "storing inbound row failed");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "storage_failed" })),
        )
            .into_response();
    }

    tracing::info!(event = %event, row_id = %row.id, fields = row.fields.len(), "inbound webhook processed");
    (
        StatusCode::OK,
        Json(InboundResp {
            message: "webhook processed",
            row,
        }),
    )
        .into_response()
}

async fn stats(State(state): State<AppState>) -> Json<PollStats> {
    Json(state.scheduler.stats())
}

async fn poll_now(State(state): State<AppState>) -> Response {
    let (results, rows) = state.scheduler.poll_now().await;
    let row_count = rows.len();
    if let Err(e) = state.sink.store(rows).await {
        tracing::error!(error = ?e, "storing polled rows failed");
    }
    let results = results
        .into_iter()
        .map(|r| PollSummary {
            endpoint_id: r.endpoint_id,
            events: r.events.len(),
            next_cursor: r.next_cursor,
            exhausted: r.exhausted,
            health: r.health,
        })
        .collect();
    Json(PollResp {
        results,
        rows: row_count,
    })
    .into_response()
}
