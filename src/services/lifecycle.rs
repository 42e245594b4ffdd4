use chrono::{Duration, NaiveDateTime};
use rusqlite::Connection;

use crate::db::queries::{self, BookingPatch, UpdateOutcome};
use crate::errors::{AppError, ConflictKind};
use crate::models::{Actor, ActorRole, Booking, BookingStatus, StatusChange};
use crate::services::pricing::PricingPolicy;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookingPolicy {
    pub pricing: PricingPolicy,
    // How long before the rental day starts a customer may still cancel.
    // Zero lifts the restriction.
    pub cancellation_cutoff: Duration,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            pricing: PricingPolicy::default(),
            cancellation_cutoff: Duration::hours(24),
        }
    }
}

impl BookingPolicy {
    pub fn cancellation_open(&self, booking: &Booking, now: NaiveDateTime) -> bool {
        if self.cancellation_cutoff == Duration::zero() {
            return true;
        }
        let rental_starts = booking.start_date.and_time(chrono::NaiveTime::MIN);
        now <= rental_starts - self.cancellation_cutoff
    }
}

fn permitted_targets(role: ActorRole) -> &'static [BookingStatus] {
    match role {
        ActorRole::Customer => &[BookingStatus::Cancelled],
        ActorRole::Vendor => &[
            BookingStatus::Confirmed,
            BookingStatus::Rejected,
            BookingStatus::Completed,
        ],
        ActorRole::System => &[BookingStatus::Confirmed],
        ActorRole::Admin => &BookingStatus::ALL,
    }
}

fn permitted_sources(role: ActorRole, target: BookingStatus) -> &'static [BookingStatus] {
    match (role, target) {
        (ActorRole::Customer, BookingStatus::Cancelled) => {
            &[BookingStatus::Pending, BookingStatus::Confirmed]
        }
        (ActorRole::Vendor, BookingStatus::Confirmed) => &[BookingStatus::Pending],
        (ActorRole::Vendor, BookingStatus::Rejected) => &[BookingStatus::Pending],
        (ActorRole::Vendor, BookingStatus::Completed) => &[BookingStatus::Confirmed],
        (ActorRole::System, BookingStatus::Confirmed) => &[BookingStatus::Pending],
        _ => &[],
    }
}

pub fn check_transition(
    booking: &Booking,
    target: BookingStatus,
    actor: &Actor,
    policy: &BookingPolicy,
    now: NaiveDateTime,
) -> Result<(), AppError> {
    let from = booking.status;

    if from == target {
        return Err(AppError::InvalidTransition(format!(
            "booking is already {}",
            target.as_str()
        )));
    }

    if actor.role == ActorRole::Admin {
        return Ok(());
    }

    if !permitted_targets(actor.role).contains(&target) {
        return Err(AppError::Forbidden(format!(
            "{} may not set status {}",
            actor.role.as_str(),
            target.as_str()
        )));
    }

    let is_party = match actor.role {
        ActorRole::Customer => booking.customer_id == actor.id,
        ActorRole::Vendor => booking.vendor_id == actor.id,
        ActorRole::System | ActorRole::Admin => true,
    };
    if !is_party {
        return Err(AppError::Forbidden(format!(
            "{} {} is not party to booking {}",
            actor.role.as_str(),
            actor.id,
            booking.id
        )));
    }

    if !permitted_sources(actor.role, target).contains(&from) {
        return Err(AppError::InvalidTransition(format!(
            "{}: {} -> {}",
            actor.role.as_str(),
            from.as_str(),
            target.as_str()
        )));
    }

    if actor.role == ActorRole::Customer
        && target == BookingStatus::Cancelled
        && !policy.cancellation_open(booking, now)
    {
        return Err(AppError::InvalidTransition(format!(
            "cancellation window closed for booking {}",
            booking.id
        )));
    }

    Ok(())
}

pub fn transition(
    conn: &Connection,
    booking_id: &str,
    target: BookingStatus,
    actor: &Actor,
    policy: &BookingPolicy,
    now: NaiveDateTime,
) -> Result<Booking, AppError> {
    let booking = queries::get_booking_by_id(conn, booking_id)?
        .ok_or_else(|| AppError::NotFound("booking".to_string()))?;

    check_transition(&booking, target, actor, policy, now)?;

    let mut patch = BookingPatch::new(now);
    patch.status = Some(target);
    patch.history = Some(StatusChange {
        status: target,
        actor_id: actor.id.clone(),
        actor_role: actor.role,
        changed_at: now,
    });

    let updated = apply_patch(conn, booking_id, booking.status, &patch)?;

    tracing::info!(
        booking_id = %booking_id,
        from = booking.status.as_str(),
        to = target.as_str(),
        actor_id = %actor.id,
        role = actor.role.as_str(),
        "booking status changed"
    );

    Ok(updated)
}

pub fn apply_patch(
    conn: &Connection,
    booking_id: &str,
    expected: BookingStatus,
    patch: &BookingPatch,
) -> Result<Booking, AppError> {
    match queries::update_booking_if_status(conn, booking_id, expected, patch)? {
        UpdateOutcome::Updated(booking) => Ok(booking),
        UpdateOutcome::StatusChanged(actual) => {
            tracing::warn!(
                booking_id = %booking_id,
                expected = expected.as_str(),
                actual = actual.as_str(),
                "lost status race"
            );
            Err(AppError::Conflict(ConflictKind::StaleWrite))
        }
        UpdateOutcome::Missing => Err(AppError::NotFound("booking".to_string())),
        UpdateOutcome::Overlap => Err(AppError::Conflict(ConflictKind::Overlap)),
        UpdateOutcome::PaymentInUse => Err(AppError::Conflict(ConflictKind::AlreadyPaid)),
        UpdateOutcome::OrderOpen(_) => Err(AppError::Conflict(ConflictKind::StaleWrite)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentStatus;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn booking_in(status: BookingStatus) -> Booking {
        Booking {
            id: "b-1".to_string(),
            customer_id: "cust-1".to_string(),
            bike_id: "bike-1".to_string(),
            vendor_id: "vendor-1".to_string(),
            start_date: NaiveDate::from_ymd_opt(2025, 6, 10).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 6, 12).unwrap(),
            duration_days: 2,
            base_amount: Decimal::new(1000, 0),
            tax_amount: Decimal::new(180, 0),
            security_deposit: Decimal::ZERO,
            total_amount: Decimal::new(1180, 0),
            status,
            payment_status: PaymentStatus::Unpaid,
            payment_order_id: None,
            payment: None,
            status_history: vec![],
            created_at: ts("2025-06-01 10:00:00"),
            updated_at: ts("2025-06-01 10:00:00"),
        }
    }

    fn owner_for(role: ActorRole) -> Actor {
        match role {
            ActorRole::Customer => Actor::customer("cust-1"),
            ActorRole::Vendor => Actor::vendor("vendor-1"),
            ActorRole::Admin => Actor::admin("admin-1"),
            ActorRole::System => Actor::payment_system(),
        }
    }

    fn in_table(role: ActorRole, from: BookingStatus, to: BookingStatus) -> bool {
        use BookingStatus::*;
        match role {
            ActorRole::Admin => from != to,
            ActorRole::Customer => matches!((from, to), (Pending | Confirmed, Cancelled)),
            ActorRole::Vendor => matches!(
                (from, to),
                (Pending, Confirmed) | (Pending, Rejected) | (Confirmed, Completed)
            ),
            ActorRole::System => matches!((from, to), (Pending, Confirmed)),
        }
    }

    #[test]
    fn test_transition_table_is_complete() {
        let policy = BookingPolicy::default();
        let now = ts("2025-06-01 12:00:00");

        for role in ActorRole::ALL {
            let actor = owner_for(role);
            for from in BookingStatus::ALL {
                for to in BookingStatus::ALL {
                    let result = check_transition(&booking_in(from), to, &actor, &policy, now);
                    if in_table(role, from, to) {
                        assert!(
                            result.is_ok(),
                            "{role:?} {from:?} -> {to:?} should be allowed: {result:?}"
                        );
                    } else {
                        assert!(
                            matches!(
                                result,
                                Err(AppError::Forbidden(_)) | Err(AppError::InvalidTransition(_))
                            ),
                            "{role:?} {from:?} -> {to:?} should be refused: {result:?}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_wrong_role_is_forbidden_wrong_source_is_invalid() {
        let policy = BookingPolicy::default();
        let now = ts("2025-06-01 12:00:00");

        let err = check_transition(
            &booking_in(BookingStatus::Pending),
            BookingStatus::Confirmed,
            &Actor::customer("cust-1"),
            &policy,
            now,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = check_transition(
            &booking_in(BookingStatus::Pending),
            BookingStatus::Completed,
            &Actor::vendor("vendor-1"),
            &policy,
            now,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }

    #[test]
    fn test_only_parties_may_act() {
        let policy = BookingPolicy::default();
        let now = ts("2025-06-01 12:00:00");

        let err = check_transition(
            &booking_in(BookingStatus::Pending),
            BookingStatus::Cancelled,
            &Actor::customer("someone-else"),
            &policy,
            now,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = check_transition(
            &booking_in(BookingStatus::Pending),
            BookingStatus::Confirmed,
            &Actor::vendor("rival-vendor"),
            &policy,
            now,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn test_cancellation_cutoff() {
        let policy = BookingPolicy::default();
        let booking = booking_in(BookingStatus::Confirmed);
        let customer = Actor::customer("cust-1");

        // Rental starts 2025-06-10 00:00; the 24h cutoff is 2025-06-09 00:00.
        assert!(check_transition(
            &booking,
            BookingStatus::Cancelled,
            &customer,
            &policy,
            ts("2025-06-09 00:00:00")
        )
        .is_ok());

        let err = check_transition(
            &booking,
            BookingStatus::Cancelled,
            &customer,
            &policy,
            ts("2025-06-09 00:00:01"),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));

        // Admins are not bound by the cutoff.
        assert!(check_transition(
            &booking,
            BookingStatus::Cancelled,
            &Actor::admin("admin-1"),
            &policy,
            ts("2025-06-11 09:00:00")
        )
        .is_ok());
    }

    #[test]
    fn test_zero_cutoff_allows_late_cancellation() {
        let policy = BookingPolicy {
            cancellation_cutoff: Duration::zero(),
            ..BookingPolicy::default()
        };
        assert!(check_transition(
            &booking_in(BookingStatus::Pending),
            BookingStatus::Cancelled,
            &Actor::customer("cust-1"),
            &policy,
            ts("2025-06-10 18:00:00")
        )
        .is_ok());
    }
}
