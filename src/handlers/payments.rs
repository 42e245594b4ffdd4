use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;

use super::{actor_from_headers, now};
use crate::errors::AppError;
use crate::models::Booking;
use crate::services::bookings;
use crate::services::reconciliation::{self, PaymentConfirmation, PaymentOrder};
use crate::state::AppState;

// POST /api/bookings/:id/payment/order
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<PaymentOrder>, AppError> {
    let actor = actor_from_headers(&headers, &state.config.api_token)?;
    let order = reconciliation::create_payment_order(&state, &actor, &id, now()).await?;
    Ok(Json(order))
}

// POST /api/bookings/:id/payment/verify
pub async fn verify_payment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(confirmation): Json<PaymentConfirmation>,
) -> Result<Json<Booking>, AppError> {
    let actor = actor_from_headers(&headers, &state.config.api_token)?;
    // Only someone who can see the booking may report a payment for it.
    bookings::get_booking(&state, &actor, &id)?;

    let booking = reconciliation::reconcile_payment(&state, &id, &confirmation, now()).await?;
    Ok(Json(booking))
}
