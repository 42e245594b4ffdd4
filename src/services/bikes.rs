use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::db::queries::{self, BikeDeletion};
use crate::errors::{AppError, ConflictKind};
use crate::models::money::to_minor_units;
use crate::models::{Actor, ActorRole, Bike, BikeStatus};
use crate::services::projection;
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBikeRequest {
    pub name: String,
    pub daily_rate: Decimal,
    #[serde(default)]
    pub security_deposit: Decimal,
    #[serde(default)]
    pub vendor_id: Option<String>,
}

fn owning_vendor(actor: &Actor, requested: Option<&str>) -> Result<String, AppError> {
    match actor.role {
        ActorRole::Vendor => match requested {
            Some(id) if id != actor.id => Err(AppError::Forbidden(
                "vendors may only list their own bikes".to_string(),
            )),
            _ => Ok(actor.id.clone()),
        },
        ActorRole::Admin => requested
            .filter(|id| !id.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| AppError::Validation("vendor_id is required".to_string())),
        ActorRole::Customer | ActorRole::System => Err(AppError::Forbidden(format!(
            "{} may not manage bikes",
            actor.role.as_str()
        ))),
    }
}

fn ensure_manages(actor: &Actor, bike: &Bike) -> Result<(), AppError> {
    match actor.role {
        ActorRole::Admin => Ok(()),
        ActorRole::Vendor if bike.vendor_id == actor.id => Ok(()),
        _ => Err(AppError::Forbidden(format!(
            "{} {} does not manage bike {}",
            actor.role.as_str(),
            actor.id,
            bike.id
        ))),
    }
}

pub fn create_bike(
    state: &AppState,
    actor: &Actor,
    req: CreateBikeRequest,
    now: NaiveDateTime,
) -> Result<Bike, AppError> {
    let vendor_id = owning_vendor(actor, req.vendor_id.as_deref())?;

    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("name is required".to_string()));
    }
    if req.daily_rate <= Decimal::ZERO {
        return Err(AppError::Validation("daily rate must be positive".to_string()));
    }
    if req.security_deposit < Decimal::ZERO {
        return Err(AppError::Validation(
            "security deposit cannot be negative".to_string(),
        ));
    }
    if to_minor_units(req.daily_rate).is_err() || to_minor_units(req.security_deposit).is_err() {
        return Err(AppError::Validation("amount is too large".to_string()));
    }

    let bike = Bike {
        id: uuid::Uuid::new_v4().to_string(),
        vendor_id,
        name: name.to_string(),
        daily_rate: req.daily_rate,
        security_deposit: req.security_deposit,
        status: BikeStatus::Available,
        created_at: now,
        updated_at: now,
    };

    let conn = state.conn()?;
    queries::insert_bike(&conn, &bike)?;

    tracing::info!(bike_id = %bike.id, vendor_id = %bike.vendor_id, "bike listed");
    Ok(bike)
}

pub fn get_bike(state: &AppState, bike_id: &str) -> Result<Bike, AppError> {
    let conn = state.conn()?;
    queries::get_bike(&conn, bike_id)?.ok_or_else(|| AppError::NotFound("bike".to_string()))
}

pub fn set_bike_status(
    state: &AppState,
    actor: &Actor,
    bike_id: &str,
    status: BikeStatus,
    now: NaiveDateTime,
) -> Result<Bike, AppError> {
    if !status.is_vendor_settable() {
        return Err(AppError::Validation(format!(
            "{} is derived from bookings and cannot be set",
            status.as_str()
        )));
    }

    let conn = state.conn()?;
    let bike = queries::get_bike(&conn, bike_id)?
        .ok_or_else(|| AppError::NotFound("bike".to_string()))?;
    ensure_manages(actor, &bike)?;

    queries::set_bike_status(&conn, bike_id, status, &now)?;
    if status == BikeStatus::Available {
        // Back on the road; a confirmed booking covering today makes it rented.
        projection::refresh_quietly(&conn, bike_id, now);
    }

    let bike = queries::get_bike(&conn, bike_id)?
        .ok_or_else(|| AppError::NotFound("bike".to_string()))?;

    tracing::info!(bike_id, status = bike.status.as_str(), actor_id = %actor.id, "bike status set");
    Ok(bike)
}

pub fn delete_bike(state: &AppState, actor: &Actor, bike_id: &str) -> Result<(), AppError> {
    let conn = state.conn()?;
    let bike = queries::get_bike(&conn, bike_id)?
        .ok_or_else(|| AppError::NotFound("bike".to_string()))?;
    ensure_manages(actor, &bike)?;

    match queries::delete_bike_if_idle(&conn, bike_id)? {
        BikeDeletion::Deleted => {
            tracing::info!(bike_id, actor_id = %actor.id, "bike deleted");
            Ok(())
        }
        BikeDeletion::Missing => Err(AppError::NotFound("bike".to_string())),
        BikeDeletion::HasActiveBookings => Err(AppError::Conflict(ConflictKind::ActiveBookings)),
    }
}
