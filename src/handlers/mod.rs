pub mod bikes;
pub mod bookings;
pub mod health;
pub mod payments;
pub mod webhook;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use chrono::{NaiveDateTime, Utc};

use crate::errors::AppError;
use crate::models::{Actor, ActorRole};
use crate::state::AppState;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/bikes", post(bikes::create_bike))
        .route(
            "/api/bikes/:id",
            get(bikes::get_bike).delete(bikes::delete_bike),
        )
        .route("/api/bikes/:id/status", post(bikes::set_bike_status))
        .route("/api/bikes/:id/availability", get(bikes::availability))
        .route("/api/bikes/:id/quote", get(bikes::quote))
        .route(
            "/api/bookings",
            post(bookings::create_booking).get(bookings::list_bookings),
        )
        .route("/api/bookings/:id", get(bookings::get_booking))
        .route("/api/bookings/:id/status", post(bookings::transition_status))
        .route(
            "/api/bookings/:id/payment/order",
            post(payments::create_order),
        )
        .route(
            "/api/bookings/:id/payment/verify",
            post(payments::verify_payment),
        )
        .route("/webhook/payments", post(webhook::payment_webhook))
        .with_state(state)
}

// When `API_TOKEN` is set the request must also carry it as a bearer token,
// so only the gateway can assert identities.
pub fn actor_from_headers(headers: &HeaderMap, api_token: &str) -> Result<Actor, AppError> {
    if !api_token.is_empty() {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let token = auth.strip_prefix("Bearer ").unwrap_or("");
        if token != api_token {
            return Err(AppError::Unauthorized);
        }
    }

    let id = headers
        .get(ACTOR_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(AppError::Unauthorized)?;
    let role = headers
        .get(ACTOR_ROLE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(ActorRole::parse_external)
        .ok_or(AppError::Unauthorized)?;

    Ok(Actor::new(id, role))
}

pub(crate) fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}
