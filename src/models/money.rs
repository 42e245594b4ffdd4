use rust_decimal::{Decimal, RoundingStrategy};

// Half-up to two decimals, applied once when an amount is computed.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

// Amounts are stored and compared against the gateway in minor units (paise).
pub fn to_minor_units(amount: Decimal) -> anyhow::Result<i64> {
    let mut rounded = round_money(amount);
    rounded.rescale(2);
    i64::try_from(rounded.mantissa())
        .map_err(|_| anyhow::anyhow!("amount {amount} is out of range"))
}

pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}
