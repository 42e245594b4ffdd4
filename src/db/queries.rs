use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, ErrorCode, OptionalExtension, Transaction,
    TransactionBehavior,
};
use serde::Serialize;

use crate::models::money::{from_minor_units, to_minor_units};
use crate::models::query::{BookingQuery, FilterValue};
use crate::models::{
    ActorRole, Bike, BikeStatus, Booking, BookingStatus, PaymentRecord, PaymentStatus,
    StatusChange,
};

pub const DATE_FMT: &str = "%Y-%m-%d";
pub const TS_FMT: &str = "%Y-%m-%d %H:%M:%S";

// Message raised by the overlap triggers in `0002_booking_guards.sql`.
const OVERLAP_GUARD: &str = "booking_overlap";
const PAYMENT_GUARD: &str = "payment_already_recorded";

fn fmt_date(date: &NaiveDate) -> String {
    date.format(DATE_FMT).to_string()
}

fn fmt_ts(ts: &NaiveDateTime) -> String {
    ts.format(TS_FMT).to_string()
}

fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FMT).with_context(|| format!("bad stored date: {s}"))
}

fn parse_ts(s: &str) -> anyhow::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TS_FMT).with_context(|| format!("bad stored timestamp: {s}"))
}

fn raised_by_guard(err: &rusqlite::Error, guard: &str) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains(guard))
}

fn is_unique_violation(err: &rusqlite::Error, column: &str) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, Some(msg))
            if e.code == ErrorCode::ConstraintViolation && msg.contains(column)
    )
}

// ── Bikes ──

const BIKE_COLUMNS: &str =
    "id, vendor_id, name, daily_rate_minor, deposit_minor, status, created_at, updated_at";

pub fn insert_bike(conn: &Connection, bike: &Bike) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO bikes (id, vendor_id, name, daily_rate_minor, deposit_minor, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            bike.id,
            bike.vendor_id,
            bike.name,
            to_minor_units(bike.daily_rate)?,
            to_minor_units(bike.security_deposit)?,
            bike.status.as_str(),
            fmt_ts(&bike.created_at),
            fmt_ts(&bike.updated_at),
        ],
    )
    .context("failed to insert bike")?;
    Ok(())
}

pub fn get_bike(conn: &Connection, id: &str) -> anyhow::Result<Option<Bike>> {
    let result = conn.query_row(
        &format!("SELECT {BIKE_COLUMNS} FROM bikes WHERE id = ?1"),
        params![id],
        |row| Ok(parse_bike_row(row)),
    );

    match result {
        Ok(bike) => Ok(Some(bike?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn set_bike_status(
    conn: &Connection,
    id: &str,
    status: BikeStatus,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bikes SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), fmt_ts(now), id],
    )?;
    Ok(count > 0)
}

#[derive(Debug, PartialEq, Eq)]
pub enum BikeDeletion {
    Deleted,
    Missing,
    HasActiveBookings,
}

pub fn delete_bike_if_idle(conn: &Connection, id: &str) -> anyhow::Result<BikeDeletion> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let active: i64 = tx.query_row(
        "SELECT COUNT(*) FROM bookings WHERE bike_id = ?1 AND status IN ('pending', 'confirmed')",
        params![id],
        |row| row.get(0),
    )?;
    if active > 0 {
        return Ok(BikeDeletion::HasActiveBookings);
    }

    let count = tx.execute("DELETE FROM bikes WHERE id = ?1", params![id])?;
    tx.commit()?;

    Ok(if count > 0 {
        BikeDeletion::Deleted
    } else {
        BikeDeletion::Missing
    })
}

fn parse_bike_row(row: &rusqlite::Row) -> anyhow::Result<Bike> {
    let status_str: String = row.get(5)?;
    let created_at_str: String = row.get(6)?;
    let updated_at_str: String = row.get(7)?;

    Ok(Bike {
        id: row.get(0)?,
        vendor_id: row.get(1)?,
        name: row.get(2)?,
        daily_rate: from_minor_units(row.get(3)?),
        security_deposit: from_minor_units(row.get(4)?),
        status: BikeStatus::parse(&status_str)
            .with_context(|| format!("unknown bike status: {status_str}"))?,
        created_at: parse_ts(&created_at_str)?,
        updated_at: parse_ts(&updated_at_str)?,
    })
}

// ── Bookings ──

const BOOKING_COLUMNS: &str = "id, customer_id, bike_id, vendor_id, start_date, end_date, duration_days, \
     base_minor, tax_minor, deposit_minor, total_minor, status, payment_status, payment_order_id, \
     payment_txn_id, payment_method, payment_amount_minor, paid_at, created_at, updated_at";

pub fn count_overlapping(
    conn: &Connection,
    bike_id: &str,
    start: &NaiveDate,
    end: &NaiveDate,
    exclude_id: Option<&str>,
) -> anyhow::Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM bookings
         WHERE bike_id = ?1
           AND status NOT IN ('cancelled', 'rejected')
           AND start_date <= ?3
           AND end_date >= ?2
           AND id != ?4",
        params![bike_id, fmt_date(start), fmt_date(end), exclude_id.unwrap_or("")],
        |row| row.get(0),
    )?;
    Ok(count)
}

#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    BikeMissing,
    Unavailable,
}

// Availability re-check and insert under one write lock. Two racing
// requests for the same window cannot both get past the overlap count.
pub fn insert_booking_if_available(
    conn: &Connection,
    booking: &Booking,
) -> anyhow::Result<InsertOutcome> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .context("failed to begin booking transaction")?;

    match get_bike(&tx, &booking.bike_id)? {
        None => return Ok(InsertOutcome::BikeMissing),
        Some(bike) if !bike.accepts_bookings() => return Ok(InsertOutcome::Unavailable),
        Some(_) => {}
    }

    if count_overlapping(&tx, &booking.bike_id, &booking.start_date, &booking.end_date, None)? > 0 {
        return Ok(InsertOutcome::Unavailable);
    }

    let inserted = tx.execute(
        &format!(
            "INSERT INTO bookings ({BOOKING_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, NULL, NULL, NULL, NULL, ?15, ?16)"
        ),
        params![
            booking.id,
            booking.customer_id,
            booking.bike_id,
            booking.vendor_id,
            fmt_date(&booking.start_date),
            fmt_date(&booking.end_date),
            booking.duration_days,
            to_minor_units(booking.base_amount)?,
            to_minor_units(booking.tax_amount)?,
            to_minor_units(booking.security_deposit)?,
            to_minor_units(booking.total_amount)?,
            booking.status.as_str(),
            booking.payment_status.as_str(),
            booking.payment_order_id,
            fmt_ts(&booking.created_at),
            fmt_ts(&booking.updated_at),
        ],
    );
    match inserted {
        Ok(_) => {}
        Err(e) if raised_by_guard(&e, OVERLAP_GUARD) => return Ok(InsertOutcome::Unavailable),
        Err(e) => return Err(e).context("failed to insert booking"),
    }

    for change in &booking.status_history {
        insert_history(&tx, &booking.id, change)?;
    }

    tx.commit().context("failed to commit booking")?;
    Ok(InsertOutcome::Inserted)
}

pub fn get_booking_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let result = conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
        params![id],
        |row| Ok(parse_booking_row(row)),
    );

    match result {
        Ok(booking) => Ok(Some(with_history(conn, booking?)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn get_booking_by_order_id(conn: &Connection, order_id: &str) -> anyhow::Result<Option<Booking>> {
    let result = conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE payment_order_id = ?1 LIMIT 1"),
        params![order_id],
        |row| Ok(parse_booking_row(row)),
    );

    match result {
        Ok(booking) => Ok(Some(with_history(conn, booking?)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Serialize)]
pub struct BookingPage {
    pub items: Vec<Booking>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

pub fn find_bookings(conn: &Connection, query: &BookingQuery) -> anyhow::Result<BookingPage> {
    let mut clauses = Vec::with_capacity(query.filters.len());
    let mut values: Vec<Value> = Vec::new();

    for filter in &query.filters {
        let column = filter.field.column();
        match &filter.value {
            FilterValue::List(items) => {
                let placeholders = vec!["?"; items.len()].join(", ");
                clauses.push(format!("{column} IN ({placeholders})"));
                values.extend(items.iter().map(filter_value));
            }
            value => {
                clauses.push(format!("{column} {} ?", filter.op.sql()));
                values.push(filter_value(value));
            }
        }
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM bookings {where_sql}"),
        params_from_iter(values.iter()),
        |row| row.get(0),
    )?;

    let direction = if query.sort.descending { "DESC" } else { "ASC" };
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings {where_sql} ORDER BY {} {direction}, id ASC LIMIT ? OFFSET ?",
        query.sort.key.column()
    );
    values.push(Value::Integer(i64::from(query.limit)));
    values.push(Value::Integer(query.offset() as i64));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), |row| Ok(parse_booking_row(row)))?;

    let mut items = vec![];
    for row in rows {
        items.push(with_history(conn, row??)?);
    }

    Ok(BookingPage {
        items,
        total: total as u64,
        page: query.page,
        limit: query.limit,
    })
}

fn filter_value(value: &FilterValue) -> Value {
    match value {
        FilterValue::Text(s) => Value::Text(s.clone()),
        FilterValue::Integer(n) => Value::Integer(*n),
        // Lists are expanded by the caller.
        FilterValue::List(_) => Value::Null,
    }
}

#[derive(Debug, Clone)]
pub struct BookingPatch {
    pub status: Option<BookingStatus>,
    pub payment: Option<PaymentRecord>,
    pub payment_order_id: Option<String>,
    pub history: Option<StatusChange>,
    pub updated_at: NaiveDateTime,
}

impl BookingPatch {
    pub fn new(updated_at: NaiveDateTime) -> Self {
        Self {
            status: None,
            payment: None,
            payment_order_id: None,
            history: None,
            updated_at,
        }
    }
}

#[derive(Debug)]
pub enum UpdateOutcome {
    Updated(Booking),
    StatusChanged(BookingStatus),
    Missing,
    Overlap,
    PaymentInUse,
    OrderOpen(String),
}

// Apply `patch` only if the booking is still in `expected`. The status
// change and its history entry commit together or not at all.
pub fn update_booking_if_status(
    conn: &Connection,
    id: &str,
    expected: BookingStatus,
    patch: &BookingPatch,
) -> anyhow::Result<UpdateOutcome> {
    let mut sets = vec!["updated_at = ?"];
    let mut values: Vec<Value> = vec![Value::Text(fmt_ts(&patch.updated_at))];

    if let Some(status) = patch.status {
        sets.push("status = ?");
        values.push(Value::Text(status.as_str().to_string()));
    }

    let order_id = patch
        .payment
        .as_ref()
        .map(|p| p.order_id.clone())
        .or_else(|| patch.payment_order_id.clone());
    if let Some(order_id) = order_id {
        sets.push("payment_order_id = ?");
        values.push(Value::Text(order_id));
    }

    if let Some(payment) = &patch.payment {
        sets.push("payment_status = ?");
        values.push(Value::Text(PaymentStatus::Paid.as_str().to_string()));
        sets.push("payment_txn_id = ?");
        values.push(Value::Text(payment.transaction_id.clone()));
        sets.push("payment_method = ?");
        values.push(Value::Text(payment.method.clone()));
        sets.push("payment_amount_minor = ?");
        values.push(Value::Integer(to_minor_units(payment.amount)?));
        sets.push("paid_at = ?");
        values.push(Value::Text(fmt_ts(&payment.paid_at)));
    }

    values.push(Value::Text(id.to_string()));
    values.push(Value::Text(expected.as_str().to_string()));

    // A payment is written once; an order is opened once.
    let guard = if patch.payment.is_some() {
        " AND payment_txn_id IS NULL"
    } else if patch.payment_order_id.is_some() {
        " AND payment_order_id IS NULL"
    } else {
        ""
    };
    let sql = format!(
        "UPDATE bookings SET {} WHERE id = ? AND status = ?{guard}",
        sets.join(", ")
    );

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .context("failed to begin update transaction")?;

    let changed = match tx.execute(&sql, params_from_iter(values.iter())) {
        Ok(n) => n,
        Err(e) if raised_by_guard(&e, OVERLAP_GUARD) => return Ok(UpdateOutcome::Overlap),
        Err(e) if is_unique_violation(&e, "payment_txn_id") || raised_by_guard(&e, PAYMENT_GUARD) => {
            return Ok(UpdateOutcome::PaymentInUse)
        }
        Err(e) => return Err(e).context("failed to update booking"),
    };

    if changed == 0 {
        let current: Option<(String, Option<String>)> = tx
            .query_row(
                "SELECT status, payment_order_id FROM bookings WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((status, open_order)) = current else {
            return Ok(UpdateOutcome::Missing);
        };
        let status =
            BookingStatus::parse(&status).with_context(|| format!("unknown booking status: {status}"))?;
        if status != expected {
            return Ok(UpdateOutcome::StatusChanged(status));
        }
        if patch.payment.is_some() {
            return Ok(UpdateOutcome::PaymentInUse);
        }
        return Ok(match open_order {
            Some(order_id) if patch.payment_order_id.is_some() => UpdateOutcome::OrderOpen(order_id),
            _ => UpdateOutcome::StatusChanged(status),
        });
    }

    if let Some(change) = &patch.history {
        insert_history(&tx, id, change)?;
    }

    tx.commit().context("failed to commit booking update")?;

    let booking = get_booking_by_id(conn, id)?.context("booking disappeared after update")?;
    Ok(UpdateOutcome::Updated(booking))
}

pub fn has_confirmed_booking_on(
    conn: &Connection,
    bike_id: &str,
    date: &NaiveDate,
) -> anyhow::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM bookings
         WHERE bike_id = ?1 AND status = 'confirmed' AND start_date <= ?2 AND end_date >= ?2",
        params![bike_id, fmt_date(date)],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn insert_history(conn: &Connection, booking_id: &str, change: &StatusChange) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO booking_status_history (booking_id, status, actor_id, actor_role, changed_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            booking_id,
            change.status.as_str(),
            change.actor_id,
            change.actor_role.as_str(),
            fmt_ts(&change.changed_at),
        ],
    )
    .context("failed to record status change")?;
    Ok(())
}

fn with_history(conn: &Connection, mut booking: Booking) -> anyhow::Result<Booking> {
    let mut stmt = conn.prepare(
        "SELECT status, actor_id, actor_role, changed_at
         FROM booking_status_history WHERE booking_id = ?1 ORDER BY id ASC",
    )?;

    let rows = stmt.query_map(params![booking.id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    for row in rows {
        let (status, actor_id, actor_role, changed_at) = row?;
        booking.status_history.push(StatusChange {
            status: BookingStatus::parse(&status)
                .with_context(|| format!("unknown status in history: {status}"))?,
            actor_id,
            actor_role: ActorRole::parse(&actor_role)
                .with_context(|| format!("unknown actor role in history: {actor_role}"))?,
            changed_at: parse_ts(&changed_at)?,
        });
    }

    Ok(booking)
}

fn parse_booking_row(row: &rusqlite::Row) -> anyhow::Result<Booking> {
    let start_date_str: String = row.get(4)?;
    let end_date_str: String = row.get(5)?;
    let status_str: String = row.get(11)?;
    let payment_status_str: String = row.get(12)?;
    let payment_order_id: Option<String> = row.get(13)?;
    let payment_txn_id: Option<String> = row.get(14)?;
    let created_at_str: String = row.get(18)?;
    let updated_at_str: String = row.get(19)?;

    let payment = match payment_txn_id {
        Some(transaction_id) => {
            let paid_at_str: Option<String> = row.get(17)?;
            Some(PaymentRecord {
                transaction_id,
                order_id: payment_order_id.clone().unwrap_or_default(),
                method: row.get::<_, Option<String>>(15)?.unwrap_or_default(),
                amount: from_minor_units(row.get::<_, Option<i64>>(16)?.unwrap_or(0)),
                paid_at: parse_ts(paid_at_str.as_deref().unwrap_or_default())?,
            })
        }
        None => None,
    };

    Ok(Booking {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        bike_id: row.get(2)?,
        vendor_id: row.get(3)?,
        start_date: parse_date(&start_date_str)?,
        end_date: parse_date(&end_date_str)?,
        duration_days: row.get(6)?,
        base_amount: from_minor_units(row.get(7)?),
        tax_amount: from_minor_units(row.get(8)?),
        security_deposit: from_minor_units(row.get(9)?),
        total_amount: from_minor_units(row.get(10)?),
        status: BookingStatus::parse(&status_str)
            .with_context(|| format!("unknown booking status: {status_str}"))?,
        payment_status: PaymentStatus::parse(&payment_status_str)
            .with_context(|| format!("unknown payment status: {payment_status_str}"))?,
        payment_order_id,
        payment,
        status_history: Vec::new(),
        created_at: parse_ts(&created_at_str)?,
        updated_at: parse_ts(&updated_at_str)?,
    })
}
