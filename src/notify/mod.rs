pub mod webhook;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use webhook::{send_signed, DispatchError, WebhookDispatcher};

/// Envelope for locally generated events sent to destinations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    pub event: String,
    pub data: Value,
}

impl OutboundEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Per-destination result of a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered { http_status: u16 },
    Failed { reason: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

impl From<Result<u16, DispatchError>> for DeliveryOutcome {
    fn from(res: Result<u16, DispatchError>) -> Self {
        match res {
            Ok(http_status) => DeliveryOutcome::Delivered { http_status },
            Err(e) => DeliveryOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }
}
