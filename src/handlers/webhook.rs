use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use super::now;
use crate::errors::AppError;
use crate::services::reconciliation::{self, WebhookOutcome};
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";

// POST /webhook/payments
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if signature.is_empty() {
        tracing::warn!("missing {SIGNATURE_HEADER} header");
        return Err(AppError::InvalidSignature("missing webhook signature".to_string()));
    }

    let outcome = reconciliation::handle_gateway_event(&state, &body, signature, now()).await?;
    let status = match outcome {
        WebhookOutcome::Reconciled(booking) => {
            tracing::info!(booking_id = %booking.id, "webhook reconciled payment");
            "processed"
        }
        WebhookOutcome::Ignored => "ignored",
    };

    Ok(Json(json!({ "status": status })))
}
