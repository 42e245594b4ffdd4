use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::db::queries::{self, BookingPatch, UpdateOutcome};
use crate::errors::{AppError, ConflictKind};
use crate::models::money::{from_minor_units, to_minor_units};
use crate::models::{Actor, ActorRole, Booking, BookingStatus, PaymentRecord, StatusChange};
use crate::services::bookings::notify_parties;
use crate::services::payments::{hmac_sha256_hex_matches, GatewayPayment};
use crate::services::projection;
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfirmation {
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentOrder {
    pub booking_id: String,
    pub order_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub key_id: String,
}

#[derive(Debug)]
pub enum WebhookOutcome {
    Reconciled(Booking),
    Ignored,
}

fn load(state: &AppState, booking_id: &str) -> Result<Booking, AppError> {
    let conn = state.conn()?;
    queries::get_booking_by_id(&conn, booking_id)?
        .ok_or_else(|| AppError::NotFound("booking".to_string()))
}

fn already_recorded(booking: &Booking, payment_id: &str) -> Result<bool, AppError> {
    match &booking.payment {
        Some(p) if p.transaction_id == payment_id => Ok(true),
        Some(_) => Err(AppError::Conflict(ConflictKind::AlreadyPaid)),
        None => Ok(false),
    }
}

fn ensure_payable(booking: &Booking) -> Result<(), AppError> {
    if !matches!(
        booking.status,
        BookingStatus::Pending | BookingStatus::Confirmed
    ) {
        return Err(AppError::InvalidTransition(format!(
            "booking {} is {} and cannot be paid",
            booking.id,
            booking.status.as_str()
        )));
    }
    Ok(())
}

// A booking with an open order only accepts payments made against it.
fn ensure_order(booking: &Booking, order_id: &str) -> Result<(), AppError> {
    match &booking.payment_order_id {
        Some(expected) if expected != order_id => Err(AppError::InvalidSignature(format!(
            "order {order_id} does not belong to booking {}",
            booking.id
        ))),
        _ => Ok(()),
    }
}

pub async fn create_payment_order(
    state: &AppState,
    actor: &Actor,
    booking_id: &str,
    now: NaiveDateTime,
) -> Result<PaymentOrder, AppError> {
    let booking = load(state, booking_id)?;

    let may_pay = match actor.role {
        ActorRole::Customer => booking.customer_id == actor.id,
        ActorRole::Admin => true,
        ActorRole::Vendor | ActorRole::System => false,
    };
    if !may_pay {
        return Err(AppError::Forbidden(format!(
            "{} {} may not pay for booking {}",
            actor.role.as_str(),
            actor.id,
            booking.id
        )));
    }
    if booking.payment.is_some() {
        return Err(AppError::Conflict(ConflictKind::AlreadyPaid));
    }
    ensure_payable(&booking)?;

    let amount_minor = to_minor_units(booking.total_amount)?;
    let currency = state.config.currency.clone();

    // An open order stays the only one, so a checkout started on it can still be verified.
    if let Some(order_id) = &booking.payment_order_id {
        tracing::debug!(booking_id = %booking.id, order_id = %order_id, "reusing open payment order");
        return Ok(PaymentOrder {
            booking_id: booking.id.clone(),
            order_id: order_id.clone(),
            amount_minor,
            currency,
            key_id: state.config.razorpay_key_id.clone(),
        });
    }

    let order = match tokio::time::timeout(
        state.config.gateway_timeout(),
        state
            .payments
            .create_order(amount_minor, &currency, &booking.id),
    )
    .await
    {
        Ok(Ok(order)) => order,
        Ok(Err(e)) => {
            tracing::error!(booking_id = %booking.id, error = %e, "failed to create payment order");
            return Err(AppError::Upstream(e.to_string()));
        }
        Err(_) => {
            tracing::warn!(booking_id = %booking.id, "payment order creation timed out");
            return Err(AppError::UpstreamTimeout("create order".to_string()));
        }
    };

    let outcome = {
        let conn = state.conn()?;
        let mut patch = BookingPatch::new(now);
        patch.payment_order_id = Some(order.id.clone());
        queries::update_booking_if_status(&conn, &booking.id, booking.status, &patch)?
    };

    let order_id = match outcome {
        UpdateOutcome::Updated(_) => {
            tracing::info!(booking_id = %booking.id, order_id = %order.id, amount_minor, "payment order created");
            order.id
        }
        // A concurrent request opened one first; hand out that one.
        UpdateOutcome::OrderOpen(open) => {
            tracing::debug!(booking_id = %booking.id, order_id = %open, unused = %order.id, "payment order already open");
            open
        }
        UpdateOutcome::Missing => return Err(AppError::NotFound("booking".to_string())),
        UpdateOutcome::PaymentInUse => return Err(AppError::Conflict(ConflictKind::AlreadyPaid)),
        UpdateOutcome::StatusChanged(_) | UpdateOutcome::Overlap => {
            return Err(AppError::Conflict(ConflictKind::StaleWrite))
        }
    };

    Ok(PaymentOrder {
        booking_id: booking.id,
        order_id,
        amount_minor,
        currency,
        key_id: state.config.razorpay_key_id.clone(),
    })
}

pub async fn reconcile_payment(
    state: &AppState,
    booking_id: &str,
    confirmation: &PaymentConfirmation,
    now: NaiveDateTime,
) -> Result<Booking, AppError> {
    let booking = load(state, booking_id)?;

    if already_recorded(&booking, &confirmation.payment_id)? {
        tracing::debug!(booking_id, payment_id = %confirmation.payment_id, "payment already recorded");
        return Ok(booking);
    }
    ensure_payable(&booking)?;
    ensure_order(&booking, &confirmation.order_id)?;

    if !state.payments.verify_signature(
        &confirmation.order_id,
        &confirmation.payment_id,
        &confirmation.signature,
    ) {
        tracing::warn!(booking_id, order_id = %confirmation.order_id, "checkout signature mismatch");
        return Err(AppError::InvalidSignature("checkout signature".to_string()));
    }

    settle(state, booking, &confirmation.order_id, &confirmation.payment_id, now).await
}

#[derive(Debug, Deserialize)]
struct GatewayEvent {
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

pub async fn handle_gateway_event(
    state: &AppState,
    body: &[u8],
    signature: &str,
    now: NaiveDateTime,
) -> Result<WebhookOutcome, AppError> {
    let secret = &state.config.razorpay_webhook_secret;
    if secret.is_empty() || !hmac_sha256_hex_matches(secret, body, signature) {
        tracing::warn!("webhook signature mismatch");
        return Err(AppError::InvalidSignature("webhook signature".to_string()));
    }

    let event: GatewayEvent = serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("malformed webhook body: {e}")))?;

    if !matches!(event.event.as_str(), "payment.captured" | "payment.authorized") {
        tracing::debug!(event = %event.event, "webhook event ignored");
        return Ok(WebhookOutcome::Ignored);
    }

    let entity = &event.payload["payment"]["entity"];
    let (Some(payment_id), Some(order_id)) = (entity["id"].as_str(), entity["order_id"].as_str())
    else {
        return Err(AppError::Validation(
            "webhook payment is missing id or order_id".to_string(),
        ));
    };

    let found = {
        let conn = state.conn()?;
        queries::get_booking_by_order_id(&conn, order_id)?
    };
    let Some(booking) = found else {
        tracing::warn!(order_id, payment_id, "webhook for unknown order");
        return Ok(WebhookOutcome::Ignored);
    };

    if already_recorded(&booking, payment_id)? {
        tracing::debug!(booking_id = %booking.id, payment_id, "duplicate webhook delivery");
        return Ok(WebhookOutcome::Reconciled(booking));
    }
    ensure_payable(&booking)?;
    ensure_order(&booking, order_id)?;

    let booking = settle(state, booking, order_id, payment_id, now).await?;
    Ok(WebhookOutcome::Reconciled(booking))
}

async fn fetch_payment(state: &AppState, payment_id: &str) -> Result<GatewayPayment, AppError> {
    match tokio::time::timeout(
        state.config.gateway_timeout(),
        state.payments.fetch_payment(payment_id),
    )
    .await
    {
        Ok(Ok(payment)) => Ok(payment),
        Ok(Err(e)) => {
            tracing::error!(payment_id, error = %e, "failed to fetch payment");
            Err(AppError::Upstream(e.to_string()))
        }
        Err(_) => {
            tracing::warn!(payment_id, "payment fetch timed out");
            Err(AppError::UpstreamTimeout("fetch payment".to_string()))
        }
    }
}

fn check_payment(
    booking: &Booking,
    payment: &GatewayPayment,
    order_id: &str,
    currency: &str,
) -> Result<(), AppError> {
    if !payment.is_settled() {
        return Err(AppError::Validation(format!(
            "payment {} is {}",
            payment.id, payment.status
        )));
    }
    if let Some(paid_order) = &payment.order_id {
        if paid_order != order_id {
            return Err(AppError::InvalidSignature(format!(
                "payment {} belongs to order {paid_order}",
                payment.id
            )));
        }
    }

    let expected = to_minor_units(booking.total_amount)?;
    if payment.amount_minor != expected || !payment.currency.eq_ignore_ascii_case(currency) {
        tracing::warn!(
            booking_id = %booking.id,
            payment_id = %payment.id,
            expected,
            actual = payment.amount_minor,
            currency = %payment.currency,
            "payment amount mismatch"
        );
        return Err(AppError::AmountMismatch {
            expected: format!("{expected} {currency}"),
            actual: format!("{} {}", payment.amount_minor, payment.currency),
        });
    }
    Ok(())
}

async fn settle(
    state: &AppState,
    booking: Booking,
    order_id: &str,
    payment_id: &str,
    now: NaiveDateTime,
) -> Result<Booking, AppError> {
    let payment = fetch_payment(state, payment_id).await?;
    check_payment(&booking, &payment, order_id, &state.config.currency)?;

    let record = PaymentRecord {
        transaction_id: payment.id.clone(),
        order_id: order_id.to_string(),
        method: payment.method.clone().unwrap_or_else(|| "unknown".to_string()),
        amount: from_minor_units(payment.amount_minor),
        paid_at: now,
    };

    let (updated, fresh) = {
        let conn = state.conn()?;
        let (updated, fresh) = record_payment(&conn, &booking, &record, now)?;
        if fresh {
            projection::refresh_quietly(&conn, &updated.bike_id, now);
        }
        (updated, fresh)
    };

    if fresh {
        tracing::info!(
            booking_id = %updated.id,
            payment_id = %record.transaction_id,
            amount = %record.amount,
            status = updated.status.as_str(),
            "payment recorded"
        );
        notify_parties(state, &updated, &Actor::payment_system()).await;
    }

    Ok(updated)
}

// Conditional write of the payment. A pending booking is confirmed in the
// same statement. Returns the stored booking and whether this call wrote it.
fn record_payment(
    conn: &rusqlite::Connection,
    booking: &Booking,
    record: &PaymentRecord,
    now: NaiveDateTime,
) -> Result<(Booking, bool), AppError> {
    let system = Actor::payment_system();
    let mut expected = booking.status;

    // One retry covers a vendor approving the booking while the payment was in flight.
    for _ in 0..2 {
        let mut patch = BookingPatch::new(now);
        patch.payment = Some(record.clone());
        if expected == BookingStatus::Pending {
            patch.status = Some(BookingStatus::Confirmed);
            patch.history = Some(StatusChange {
                status: BookingStatus::Confirmed,
                actor_id: system.id.clone(),
                actor_role: system.role,
                changed_at: now,
            });
        }

        match queries::update_booking_if_status(conn, &booking.id, expected, &patch)? {
            UpdateOutcome::Updated(updated) => return Ok((updated, true)),
            UpdateOutcome::Missing => return Err(AppError::NotFound("booking".to_string())),
            UpdateOutcome::Overlap => return Err(AppError::Conflict(ConflictKind::Overlap)),
            UpdateOutcome::StatusChanged(_)
            | UpdateOutcome::PaymentInUse
            | UpdateOutcome::OrderOpen(_) => {
                let current = queries::get_booking_by_id(conn, &booking.id)?
                    .ok_or_else(|| AppError::NotFound("booking".to_string()))?;
                if already_recorded(&current, &record.transaction_id)? {
                    return Ok((current, false));
                }
                if current.status == expected {
                    // Same status, no payment on this booking: the id is used elsewhere.
                    return Err(AppError::Conflict(ConflictKind::AlreadyPaid));
                }
                ensure_payable(&current)?;
                expected = current.status;
            }
        }
    }

    Err(AppError::Conflict(ConflictKind::StaleWrite))
}
