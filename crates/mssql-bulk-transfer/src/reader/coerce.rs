//! Read-time coercion from driver values to semantic cells.
//!
//! Coercion is all-or-nothing per column and window: if any value in a column
//! cannot be represented in the column's semantic type, the whole column is
//! re-rendered as raw text for that window and a [`CoercionFailure`] is
//! reported. Other columns are unaffected.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

use crate::core::schema::{ColumnTypeMap, RowWindow, SemanticType};
use crate::core::traits::RawWindow;
use crate::core::value::{Cell, RecordBatch, SqlValue};
use crate::error::{Result, TransferError};

/// Text formats accepted for timestamp columns, tried in order.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y%m%d %H:%M:%S",
];

/// A column that fell back to raw text for one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoercionFailure {
    pub window: RowWindow,
    pub column: String,
    /// Type the column was declared as before falling back.
    pub declared: SemanticType,
    /// First value that failed, rendered as text.
    pub sample: String,
    /// Number of values in the window that failed.
    pub failed_values: usize,
}

/// Coerce one value. `None` means the value does not fit the type.
pub fn coerce_value(value: &SqlValue, ty: SemanticType) -> Option<Cell> {
    if value.is_null() {
        return Some(Cell::Null);
    }

    match ty {
        SemanticType::NullableInt64 => to_int64(value).map(Cell::Int64),
        SemanticType::Float64 => to_float64(value).map(Cell::Float64),
        SemanticType::Bool => to_bool(value).map(Cell::Bool),
        SemanticType::Timestamp => to_timestamp(value).map(Cell::Timestamp),
        SemanticType::String | SemanticType::RawString => Some(to_text(value)),
    }
}

fn to_int64(value: &SqlValue) -> Option<i64> {
    match value {
        SqlValue::Bool(v) => Some(i64::from(*v)),
        SqlValue::U8(v) => Some(i64::from(*v)),
        SqlValue::I16(v) => Some(i64::from(*v)),
        SqlValue::I32(v) => Some(i64::from(*v)),
        SqlValue::I64(v) => Some(*v),
        SqlValue::F32(v) => exact_integer(f64::from(*v)),
        SqlValue::F64(v) => exact_integer(*v),
        SqlValue::Decimal(d) if d.fract().is_zero() => d.to_i64(),
        SqlValue::Text(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Accept a float only when it holds an integer exactly.
fn exact_integer(v: f64) -> Option<i64> {
    // 2^63 is exactly representable; anything at or above it overflows i64.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if v.is_finite() && v.fract() == 0.0 && v >= -LIMIT && v < LIMIT {
        Some(v as i64)
    } else {
        None
    }
}

fn to_float64(value: &SqlValue) -> Option<f64> {
    match value {
        SqlValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
        SqlValue::U8(v) => Some(f64::from(*v)),
        SqlValue::I16(v) => Some(f64::from(*v)),
        SqlValue::I32(v) => Some(f64::from(*v)),
        SqlValue::I64(v) => Some(*v as f64),
        SqlValue::F32(v) => Some(f64::from(*v)),
        SqlValue::F64(v) => Some(*v),
        SqlValue::Decimal(d) => d.to_f64(),
        SqlValue::Text(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn to_bool(value: &SqlValue) -> Option<bool> {
    match value {
        SqlValue::Bool(v) => Some(*v),
        SqlValue::U8(v) => int_to_bool(i64::from(*v)),
        SqlValue::I16(v) => int_to_bool(i64::from(*v)),
        SqlValue::I32(v) => int_to_bool(i64::from(*v)),
        SqlValue::I64(v) => int_to_bool(*v),
        SqlValue::Text(s) => match s.trim().to_lowercase().as_str() {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn int_to_bool(v: i64) -> Option<bool> {
    match v {
        0 => Some(false),
        1 => Some(true),
        _ => None,
    }
}

fn to_timestamp(value: &SqlValue) -> Option<NaiveDateTime> {
    match value {
        SqlValue::DateTime(v) => Some(*v),
        SqlValue::DateTimeOffset(v) => Some(v.naive_utc()),
        SqlValue::Date(v) => v.and_hms_opt(0, 0, 0),
        SqlValue::Text(s) => parse_timestamp(s.trim()),
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    for fmt in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ts);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.naive_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn to_text(value: &SqlValue) -> Cell {
    match value {
        SqlValue::Text(s) => Cell::Text(s.clone()),
        other => other.render().map(Cell::Text).unwrap_or(Cell::Null),
    }
}

/// Coerce a fetched window into a record batch.
///
/// Fails only when a row's width does not match the column map.
pub fn coerce_window(
    table: &str,
    column_map: &ColumnTypeMap,
    window: RowWindow,
    raw: RawWindow,
) -> Result<(RecordBatch, Vec<CoercionFailure>)> {
    let width = column_map.len();
    if let Some(bad) = raw.rows.iter().position(|row| row.len() != width) {
        return Err(TransferError::transfer(
            table,
            format!(
                "window {} row {} has {} values, expected {}",
                window,
                bad,
                raw.rows[bad].len(),
                width
            ),
        ));
    }

    let mut rows: Vec<Vec<Cell>> = (0..raw.rows.len())
        .map(|_| Vec::with_capacity(width))
        .collect();
    let mut column_types = Vec::with_capacity(width);
    let mut failures = Vec::new();

    for (idx, (name, ty)) in column_map.iter().enumerate() {
        let mut coerced = Vec::with_capacity(raw.rows.len());
        let mut first_bad: Option<&SqlValue> = None;
        let mut failed_values = 0usize;

        for row in &raw.rows {
            match coerce_value(&row[idx], ty) {
                Some(cell) => coerced.push(cell),
                None => {
                    failed_values += 1;
                    if first_bad.is_none() {
                        first_bad = Some(&row[idx]);
                    }
                }
            }
        }

        if let Some(sample) = first_bad {
            failures.push(CoercionFailure {
                window,
                column: name.to_string(),
                declared: ty,
                sample: sample.render().unwrap_or_default(),
                failed_values,
            });
            coerced = raw.rows.iter().map(|row| to_text(&row[idx])).collect();
            column_types.push(SemanticType::RawString);
        } else {
            column_types.push(ty);
        }

        for (row, cell) in rows.iter_mut().zip(coerced) {
            row.push(cell);
        }
    }

    let batch = RecordBatch::new(window, column_map.columns(), column_types, rows);
    Ok((batch, failures))
}
