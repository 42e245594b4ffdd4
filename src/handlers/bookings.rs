use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;

use super::{actor_from_headers, now};
use crate::db::queries::BookingPage;
use crate::errors::AppError;
use crate::models::{Booking, BookingQuery, BookingStatus};
use crate::services::bookings::{self, CreateBookingRequest};
use crate::state::AppState;

// POST /api/bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    let actor = actor_from_headers(&headers, &state.config.api_token)?;
    let booking = bookings::create_booking(&state, &actor, req, now()).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

// GET /api/bookings?status=confirmed&start_date[gte]=2025-01-01&sort=-created_at
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<BookingPage>, AppError> {
    let actor = actor_from_headers(&headers, &state.config.api_token)?;
    let query = BookingQuery::from_params(&params)?;
    Ok(Json(bookings::list_bookings(&state, &actor, query)?))
}

// GET /api/bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    let actor = actor_from_headers(&headers, &state.config.api_token)?;
    Ok(Json(bookings::get_booking(&state, &actor, &id)?))
}

#[derive(Deserialize)]
pub struct TransitionRequest {
    pub status: String,
}

// POST /api/bookings/:id/status
pub async fn transition_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<TransitionRequest>,
) -> Result<Json<Booking>, AppError> {
    let actor = actor_from_headers(&headers, &state.config.api_token)?;
    let target = BookingStatus::parse(req.status.trim())
        .ok_or_else(|| AppError::Validation(format!("unknown booking status: {}", req.status)))?;
    let booking = bookings::transition_status(&state, &actor, &id, target, now()).await?;
    Ok(Json(booking))
}
