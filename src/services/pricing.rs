use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::errors::AppError;
use crate::models::money::{round_money, to_minor_units};

pub fn default_gst_rate() -> Decimal {
    Decimal::new(18, 2)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingPolicy {
    pub tax_rate: Decimal,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            tax_rate: default_gst_rate(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Quote {
    pub duration_days: i64,
    pub base_amount: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
}

pub fn duration_days(start: &NaiveDate, end: &NaiveDate) -> i64 {
    (*end - *start).num_days().max(1)
}

pub fn price(
    daily_rate: Decimal,
    start: &NaiveDate,
    end: &NaiveDate,
    policy: &PricingPolicy,
) -> Result<Quote, AppError> {
    if end <= start {
        return Err(AppError::Validation(
            "end date must be after start date".to_string(),
        ));
    }
    if daily_rate <= Decimal::ZERO {
        return Err(AppError::Validation("daily rate must be positive".to_string()));
    }

    let too_large = || AppError::Validation("rental total is too large".to_string());

    let duration_days = duration_days(start, end);
    let base_amount = daily_rate
        .checked_mul(Decimal::from(duration_days))
        .map(round_money)
        .ok_or_else(too_large)?;
    let tax_amount = base_amount
        .checked_mul(policy.tax_rate)
        .map(round_money)
        .ok_or_else(too_large)?;
    let total_amount = base_amount.checked_add(tax_amount).ok_or_else(too_large)?;

    // Totals must fit the stored minor-unit column.
    to_minor_units(total_amount).map_err(|_| too_large())?;

    Ok(Quote {
        duration_days,
        base_amount,
        tax_amount,
        total_amount,
    })
}
