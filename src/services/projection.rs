use chrono::NaiveDateTime;
use rusqlite::Connection;

use crate::db::queries;
use crate::models::BikeStatus;

// Only flips between available and rented; a bike the vendor took off the
// road keeps its status.
pub fn refresh_bike_status(
    conn: &Connection,
    bike_id: &str,
    now: NaiveDateTime,
) -> anyhow::Result<Option<BikeStatus>> {
    let Some(bike) = queries::get_bike(conn, bike_id)? else {
        return Ok(None);
    };
    if !matches!(bike.status, BikeStatus::Available | BikeStatus::Rented) {
        return Ok(Some(bike.status));
    }

    let derived = if queries::has_confirmed_booking_on(conn, bike_id, &now.date())? {
        BikeStatus::Rented
    } else {
        BikeStatus::Available
    };

    if derived != bike.status {
        queries::set_bike_status(conn, bike_id, derived, &now)?;
        tracing::debug!(bike_id, status = derived.as_str(), "bike status refreshed");
    }

    Ok(Some(derived))
}

pub fn refresh_quietly(conn: &Connection, bike_id: &str, now: NaiveDateTime) {
    if let Err(e) = refresh_bike_status(conn, bike_id, now) {
        tracing::warn!(bike_id, error = %e, "failed to refresh bike status");
    }
}
