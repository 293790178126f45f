// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod enrich;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod security;
pub mod sink;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::enrich::{calculate_confidence_score, enrich, update_field, EnrichOptions, EnrichedField, EnrichedRow};
pub use crate::ingest::scheduler::{PollStats, Scheduler};
pub use crate::ingest::types::{ErrorHandling, PollOptions, PollResult};
pub use crate::ingest::PollingEngine;
pub use crate::notify::{DeliveryOutcome, OutboundEvent, WebhookDispatcher};
pub use crate::security::{InboundVerifier, Rejection, ReplayGuard};
