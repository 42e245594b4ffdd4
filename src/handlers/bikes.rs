use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{actor_from_headers, now};
use crate::errors::AppError;
use crate::models::{Bike, BikeStatus};
use crate::services::bikes::{self, CreateBikeRequest};
use crate::services::bookings;
use crate::services::pricing::Quote;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct WindowQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

// POST /api/bikes
pub async fn create_bike(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateBikeRequest>,
) -> Result<(StatusCode, Json<Bike>), AppError> {
    let actor = actor_from_headers(&headers, &state.config.api_token)?;
    let bike = bikes::create_bike(&state, &actor, req, now())?;
    Ok((StatusCode::CREATED, Json(bike)))
}

// GET /api/bikes/:id
pub async fn get_bike(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Bike>, AppError> {
    actor_from_headers(&headers, &state.config.api_token)?;
    Ok(Json(bikes::get_bike(&state, &id)?))
}

#[derive(Deserialize)]
pub struct SetBikeStatusRequest {
    pub status: String,
}

// POST /api/bikes/:id/status
pub async fn set_bike_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<SetBikeStatusRequest>,
) -> Result<Json<Bike>, AppError> {
    let actor = actor_from_headers(&headers, &state.config.api_token)?;
    let status = BikeStatus::parse(req.status.trim())
        .ok_or_else(|| AppError::Validation(format!("unknown bike status: {}", req.status)))?;
    Ok(Json(bikes::set_bike_status(&state, &actor, &id, status, now())?))
}

// DELETE /api/bikes/:id
pub async fn delete_bike(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let actor = actor_from_headers(&headers, &state.config.api_token)?;
    bikes::delete_bike(&state, &actor, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct AvailabilityResponse {
    pub bike_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub available: bool,
}

// GET /api/bikes/:id/availability?start_date=..&end_date=..
pub async fn availability(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(window): Query<WindowQuery>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    actor_from_headers(&headers, &state.config.api_token)?;
    let available =
        bookings::check_availability(&state, &id, &window.start_date, &window.end_date)?;
    Ok(Json(AvailabilityResponse {
        bike_id: id,
        start_date: window.start_date,
        end_date: window.end_date,
        available,
    }))
}

// GET /api/bikes/:id/quote?start_date=..&end_date=..
pub async fn quote(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(window): Query<WindowQuery>,
) -> Result<Json<Quote>, AppError> {
    actor_from_headers(&headers, &state.config.api_token)?;
    Ok(Json(bookings::quote(
        &state,
        &id,
        &window.start_date,
        &window.end_date,
    )?))
}
