use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bike {
    pub id: String,
    pub vendor_id: String,
    pub name: String,
    pub daily_rate: Decimal,
    pub security_deposit: Decimal,
    pub status: BikeStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Bike {
    // Maintenance and unavailable bikes take no new bookings. A rented bike
    // can still be booked for windows that do not collide.
    pub fn accepts_bookings(&self) -> bool {
        matches!(self.status, BikeStatus::Available | BikeStatus::Rented)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BikeStatus {
    Available,
    Rented,
    Maintenance,
    Unavailable,
}

impl BikeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BikeStatus::Available => "available",
            BikeStatus::Rented => "rented",
            BikeStatus::Maintenance => "maintenance",
            BikeStatus::Unavailable => "unavailable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(BikeStatus::Available),
            "rented" => Some(BikeStatus::Rented),
            "maintenance" => Some(BikeStatus::Maintenance),
            "unavailable" => Some(BikeStatus::Unavailable),
            _ => None,
        }
    }

    pub fn is_vendor_settable(&self) -> bool {
        !matches!(self, BikeStatus::Rented)
    }
}
