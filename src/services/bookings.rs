use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;

use crate::db::queries::{self, BookingPage, InsertOutcome};
use crate::errors::{AppError, ConflictKind};
use crate::models::{
    Actor, ActorRole, Booking, BookingQuery, BookingStatus, Field, PaymentStatus, StatusChange,
};
use crate::services::notifications::notify_best_effort;
use crate::services::pricing::{self, Quote};
use crate::services::{availability, lifecycle, projection};
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBookingRequest {
    pub bike_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub customer_id: Option<String>,
}

pub async fn create_booking(
    state: &AppState,
    actor: &Actor,
    req: CreateBookingRequest,
    now: NaiveDateTime,
) -> Result<Booking, AppError> {
    let customer_id = match actor.role {
        ActorRole::Customer => actor.id.clone(),
        ActorRole::Admin => req
            .customer_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| AppError::Validation("customer_id is required".to_string()))?,
        ActorRole::Vendor | ActorRole::System => {
            return Err(AppError::Forbidden(format!(
                "{} may not create bookings",
                actor.role.as_str()
            )))
        }
    };

    availability::validate_window(&req.start_date, &req.end_date)?;
    if req.start_date < now.date() {
        return Err(AppError::Validation(
            "start date cannot be in the past".to_string(),
        ));
    }

    let policy = state.config.booking_policy();

    let booking = {
        let conn = state.conn()?;

        let bike = queries::get_bike(&conn, &req.bike_id)?
            .ok_or_else(|| AppError::NotFound("bike".to_string()))?;
        if !bike.accepts_bookings() {
            return Err(AppError::Conflict(ConflictKind::Overlap));
        }

        let quote = pricing::price(bike.daily_rate, &req.start_date, &req.end_date, &policy.pricing)?;

        let booking = Booking {
            id: uuid::Uuid::new_v4().to_string(),
            customer_id,
            bike_id: bike.id.clone(),
            vendor_id: bike.vendor_id.clone(),
            start_date: req.start_date,
            end_date: req.end_date,
            duration_days: quote.duration_days,
            base_amount: quote.base_amount,
            tax_amount: quote.tax_amount,
            security_deposit: bike.security_deposit,
            total_amount: quote.total_amount,
            status: BookingStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            payment_order_id: None,
            payment: None,
            status_history: vec![StatusChange {
                status: BookingStatus::Pending,
                actor_id: actor.id.clone(),
                actor_role: actor.role,
                changed_at: now,
            }],
            created_at: now,
            updated_at: now,
        };

        match queries::insert_booking_if_available(&conn, &booking)? {
            InsertOutcome::Inserted => booking,
            InsertOutcome::BikeMissing => return Err(AppError::NotFound("bike".to_string())),
            InsertOutcome::Unavailable => return Err(AppError::Conflict(ConflictKind::Overlap)),
        }
    };

    tracing::info!(
        booking_id = %booking.id,
        bike_id = %booking.bike_id,
        customer_id = %booking.customer_id,
        start = %booking.start_date,
        end = %booking.end_date,
        total = %booking.total_amount,
        "booking created"
    );

    notify_best_effort(
        state.notifier.as_ref(),
        state.config.notify_timeout(),
        &booking.vendor_id,
        "New booking request",
        &format!(
            "Booking {} for bike {} from {} to {} is awaiting your approval.",
            booking.id, booking.bike_id, booking.start_date, booking.end_date
        ),
    )
    .await;

    Ok(booking)
}

pub async fn transition_status(
    state: &AppState,
    actor: &Actor,
    booking_id: &str,
    target: BookingStatus,
    now: NaiveDateTime,
) -> Result<Booking, AppError> {
    let policy = state.config.booking_policy();

    let booking = {
        let conn = state.conn()?;
        let booking = lifecycle::transition(&conn, booking_id, target, actor, &policy, now)?;
        projection::refresh_quietly(&conn, &booking.bike_id, now);
        booking
    };

    notify_parties(state, &booking, actor).await;

    Ok(booking)
}

// Tell whoever did not make the change. Admin changes go to both sides.
pub(crate) async fn notify_parties(state: &AppState, booking: &Booking, actor: &Actor) {
    let recipients: Vec<&str> = match actor.role {
        ActorRole::Customer => vec![booking.vendor_id.as_str()],
        ActorRole::Vendor | ActorRole::System => vec![booking.customer_id.as_str()],
        ActorRole::Admin => vec![booking.customer_id.as_str(), booking.vendor_id.as_str()],
    };

    let subject = format!("Booking {}", booking.status.as_str());
    let body = format!(
        "Booking {} ({} to {}) is now {}.",
        booking.id,
        booking.start_date,
        booking.end_date,
        booking.status.as_str()
    );

    for recipient in recipients {
        notify_best_effort(
            state.notifier.as_ref(),
            state.config.notify_timeout(),
            recipient,
            &subject,
            &body,
        )
        .await;
    }
}

pub fn list_bookings(
    state: &AppState,
    actor: &Actor,
    query: BookingQuery,
) -> Result<BookingPage, AppError> {
    let query = match actor.role {
        ActorRole::Customer => query.restricted_to(Field::CustomerId, &actor.id),
        ActorRole::Vendor => query.restricted_to(Field::VendorId, &actor.id),
        ActorRole::Admin => query,
        ActorRole::System => {
            return Err(AppError::Forbidden("system actor cannot list".to_string()))
        }
    };

    let conn = state.conn()?;
    Ok(queries::find_bookings(&conn, &query)?)
}

pub fn get_booking(state: &AppState, actor: &Actor, booking_id: &str) -> Result<Booking, AppError> {
    let conn = state.conn()?;
    let booking = queries::get_booking_by_id(&conn, booking_id)?
        .ok_or_else(|| AppError::NotFound("booking".to_string()))?;

    let visible = match actor.role {
        ActorRole::Customer => booking.customer_id == actor.id,
        ActorRole::Vendor => booking.vendor_id == actor.id,
        ActorRole::Admin | ActorRole::System => true,
    };
    if !visible {
        return Err(AppError::Forbidden(format!(
            "{} {} is not party to booking {}",
            actor.role.as_str(),
            actor.id,
            booking.id
        )));
    }

    Ok(booking)
}

pub fn check_availability(
    state: &AppState,
    bike_id: &str,
    start: &NaiveDate,
    end: &NaiveDate,
) -> Result<bool, AppError> {
    let conn = state.conn()?;
    availability::is_available(&conn, bike_id, start, end)
}

pub fn quote(
    state: &AppState,
    bike_id: &str,
    start: &NaiveDate,
    end: &NaiveDate,
) -> Result<Quote, AppError> {
    let conn = state.conn()?;
    let bike = queries::get_bike(&conn, bike_id)?
        .ok_or_else(|| AppError::NotFound("bike".to_string()))?;

    pricing::price(
        bike.daily_rate,
        start,
        end,
        &state.config.booking_policy().pricing,
    )
}
