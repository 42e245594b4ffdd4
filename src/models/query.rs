use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;

use super::booking::{BookingStatus, PaymentStatus};
use super::money::to_minor_units;
use crate::errors::AppError;

pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Status,
    PaymentStatus,
    BikeId,
    CustomerId,
    VendorId,
    StartDate,
    EndDate,
    TotalAmount,
    CreatedAt,
}

impl Field {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "status" => Some(Field::Status),
            "payment_status" => Some(Field::PaymentStatus),
            "bike_id" => Some(Field::BikeId),
            "customer_id" => Some(Field::CustomerId),
            "vendor_id" => Some(Field::VendorId),
            "start_date" => Some(Field::StartDate),
            "end_date" => Some(Field::EndDate),
            "total_amount" => Some(Field::TotalAmount),
            "created_at" => Some(Field::CreatedAt),
            _ => None,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            Field::Status => "status",
            Field::PaymentStatus => "payment_status",
            Field::BikeId => "bike_id",
            Field::CustomerId => "customer_id",
            Field::VendorId => "vendor_id",
            Field::StartDate => "start_date",
            Field::EndDate => "end_date",
            Field::TotalAmount => "total_minor",
            Field::CreatedAt => "created_at",
        }
    }

    fn supports(&self, op: Op) -> bool {
        match self {
            Field::Status
            | Field::PaymentStatus
            | Field::BikeId
            | Field::CustomerId
            | Field::VendorId => matches!(op, Op::Eq | Op::Ne | Op::In),
            Field::StartDate | Field::EndDate | Field::TotalAmount | Field::CreatedAt => {
                !matches!(op, Op::In)
            }
        }
    }

    fn parse_value(&self, raw: &str) -> Result<FilterValue, AppError> {
        let raw = raw.trim();
        match self {
            Field::Status => BookingStatus::parse(raw)
                .map(|s| FilterValue::Text(s.as_str().to_string()))
                .ok_or_else(|| AppError::Validation(format!("unknown booking status: {raw}"))),
            Field::PaymentStatus => PaymentStatus::parse(raw)
                .map(|s| FilterValue::Text(s.as_str().to_string()))
                .ok_or_else(|| AppError::Validation(format!("unknown payment status: {raw}"))),
            Field::BikeId | Field::CustomerId | Field::VendorId => {
                if raw.is_empty() {
                    return Err(AppError::Validation("empty id filter".to_string()));
                }
                Ok(FilterValue::Text(raw.to_string()))
            }
            Field::StartDate | Field::EndDate => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(|d| FilterValue::Text(d.format("%Y-%m-%d").to_string()))
                .map_err(|_| AppError::Validation(format!("invalid date: {raw}"))),
            Field::TotalAmount => Decimal::from_str(raw)
                .ok()
                .and_then(|d| to_minor_units(d).ok())
                .map(FilterValue::Integer)
                .ok_or_else(|| AppError::Validation(format!("invalid amount: {raw}"))),
            // Timestamps are stored as text; a bare date compares as its midnight.
            Field::CreatedAt => NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .or_else(|_| {
                    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map(|d| d.and_time(NaiveTime::MIN))
                })
                .map(|ts| FilterValue::Text(ts.format("%Y-%m-%d %H:%M:%S").to_string()))
                .map_err(|_| AppError::Validation(format!("invalid timestamp: {raw}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

impl Op {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "eq" => Some(Op::Eq),
            "ne" => Some(Op::Ne),
            "gt" => Some(Op::Gt),
            "gte" => Some(Op::Gte),
            "lt" => Some(Op::Lt),
            "lte" => Some(Op::Lte),
            "in" => Some(Op::In),
            _ => None,
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::Lt => "<",
            Op::Lte => "<=",
            Op::In => "IN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Text(String),
    Integer(i64),
    List(Vec<FilterValue>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub field: Field,
    pub op: Op,
    pub value: FilterValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    StartDate,
    EndDate,
    TotalAmount,
    CreatedAt,
}

impl SortKey {
    pub fn column(&self) -> &'static str {
        match self {
            SortKey::StartDate => "start_date",
            SortKey::EndDate => "end_date",
            SortKey::TotalAmount => "total_minor",
            SortKey::CreatedAt => "created_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub key: SortKey,
    pub descending: bool,
}

impl Sort {
    fn parse(raw: &str) -> Result<Self, AppError> {
        let (descending, name) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let key = match name {
            "start_date" => SortKey::StartDate,
            "end_date" => SortKey::EndDate,
            "total_amount" => SortKey::TotalAmount,
            "created_at" => SortKey::CreatedAt,
            _ => return Err(AppError::Validation(format!("cannot sort by: {name}"))),
        };
        Ok(Sort { key, descending })
    }
}

impl Default for Sort {
    fn default() -> Self {
        Sort {
            key: SortKey::CreatedAt,
            descending: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingQuery {
    pub filters: Vec<Filter>,
    pub sort: Sort,
    pub page: u32,
    pub limit: u32,
}

impl Default for BookingQuery {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            sort: Sort::default(),
            page: 1,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl BookingQuery {
    pub fn from_params(params: &[(String, String)]) -> Result<Self, AppError> {
        let mut query = BookingQuery::default();

        for (key, raw) in params {
            match key.as_str() {
                "sort" => query.sort = Sort::parse(raw.trim())?,
                "page" => {
                    query.page = raw
                        .trim()
                        .parse()
                        .ok()
                        .filter(|p: &u32| *p >= 1)
                        .ok_or_else(|| AppError::Validation(format!("invalid page: {raw}")))?;
                }
                "limit" => {
                    query.limit = raw
                        .trim()
                        .parse()
                        .ok()
                        .filter(|l: &u32| (1..=MAX_LIMIT).contains(l))
                        .ok_or_else(|| {
                            AppError::Validation(format!("limit must be between 1 and {MAX_LIMIT}"))
                        })?;
                }
                _ => query.filters.push(parse_filter(key, raw)?),
            }
        }

        Ok(query)
    }

    pub fn with_filter(mut self, field: Field, op: Op, value: FilterValue) -> Self {
        self.filters.push(Filter { field, op, value });
        self
    }

    pub fn restricted_to(self, field: Field, id: &str) -> Self {
        self.with_filter(field, Op::Eq, FilterValue::Text(id.to_string()))
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

fn parse_filter(key: &str, raw: &str) -> Result<Filter, AppError> {
    let (name, op) = match key.split_once('[') {
        Some((name, rest)) => {
            let op_name = rest
                .strip_suffix(']')
                .ok_or_else(|| AppError::Validation(format!("malformed filter key: {key}")))?;
            let op = Op::parse(op_name)
                .ok_or_else(|| AppError::Validation(format!("unknown operator: {op_name}")))?;
            (name, op)
        }
        None => (key, Op::Eq),
    };

    let field =
        Field::parse(name).ok_or_else(|| AppError::Validation(format!("unknown filter: {name}")))?;
    if !field.supports(op) {
        return Err(AppError::Validation(format!(
            "operator {} not allowed on {name}",
            op.sql()
        )));
    }

    let value = if op == Op::In {
        let items = raw
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| field.parse_value(s))
            .collect::<Result<Vec<_>, _>>()?;
        if items.is_empty() {
            return Err(AppError::Validation(format!("empty list for {name}")));
        }
        FilterValue::List(items)
    } else {
        field.parse_value(raw)?
    };

    Ok(Filter { field, op, value })
}
