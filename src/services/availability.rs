use chrono::NaiveDate;
use rusqlite::Connection;

use crate::db::queries;
use crate::errors::AppError;

// Read-only. The booking table is the source of truth; the bike's own
// status only matters when the vendor has taken it off the road.
pub fn is_available(
    conn: &Connection,
    bike_id: &str,
    start: &NaiveDate,
    end: &NaiveDate,
) -> Result<bool, AppError> {
    validate_window(start, end)?;

    let bike = queries::get_bike(conn, bike_id)?
        .ok_or_else(|| AppError::NotFound("bike".to_string()))?;
    if !bike.accepts_bookings() {
        return Ok(false);
    }

    let overlapping = queries::count_overlapping(conn, bike_id, start, end, None)?;
    Ok(overlapping == 0)
}

pub fn validate_window(start: &NaiveDate, end: &NaiveDate) -> Result<(), AppError> {
    if start >= end {
        return Err(AppError::Validation(
            "end date must be after start date".to_string(),
        ));
    }
    Ok(())
}
