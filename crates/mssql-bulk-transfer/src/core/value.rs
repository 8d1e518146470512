//! Value representations on both sides of the coercion layer.
//!
//! [`SqlValue`] is what the driver hands back for a fetched cell, one variant
//! per wire type. [`Cell`] is the canonical tagged union produced once at read
//! time and consumed uniformly by the writer. [`RecordBatch`] carries cells for
//! one window between the reader and the writer.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::schema::{RowWindow, SemanticType};

/// A fetched cell in the driver's native representation.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,

    /// Boolean value (bit).
    Bool(bool),

    /// 8-bit unsigned integer (tinyint).
    U8(u8),

    /// 16-bit signed integer (smallint).
    I16(i16),

    /// 32-bit signed integer (int).
    I32(i32),

    /// 64-bit signed integer (bigint).
    I64(i64),

    /// 32-bit floating point (real).
    F32(f32),

    /// 64-bit floating point (float).
    F64(f64),

    /// Exact numeric (decimal, numeric, money, smallmoney).
    Decimal(Decimal),

    Text(String),

    Bytes(Vec<u8>),

    /// uniqueidentifier.
    Uuid(Uuid),

    /// Timestamp without timezone.
    DateTime(NaiveDateTime),

    /// Timestamp with timezone offset.
    DateTimeOffset(DateTime<FixedOffset>),

    /// Date without time component.
    Date(NaiveDate),

    /// Time without date component.
    Time(NaiveTime),
}

impl SqlValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Render the value as text, as the source would display it.
    ///
    /// Returns `None` for NULL.
    pub fn render(&self) -> Option<String> {
        Some(match self {
            SqlValue::Null => return None,
            SqlValue::Bool(v) => if *v { "1" } else { "0" }.to_string(),
            SqlValue::U8(v) => v.to_string(),
            SqlValue::I16(v) => v.to_string(),
            SqlValue::I32(v) => v.to_string(),
            SqlValue::I64(v) => v.to_string(),
            SqlValue::F32(v) => v.to_string(),
            SqlValue::F64(v) => v.to_string(),
            SqlValue::Decimal(v) => v.to_string(),
            SqlValue::Text(v) => v.clone(),
            SqlValue::Bytes(v) => {
                let mut hex = String::with_capacity(2 + v.len() * 2);
                hex.push_str("0x");
                for b in v {
                    hex.push_str(&format!("{:02X}", b));
                }
                hex
            }
            SqlValue::Uuid(v) => v.to_string().to_uppercase(),
            SqlValue::DateTime(v) => v.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            SqlValue::DateTimeOffset(v) => v.format("%Y-%m-%d %H:%M:%S%.f %:z").to_string(),
            SqlValue::Date(v) => v.format("%Y-%m-%d").to_string(),
            SqlValue::Time(v) => v.format("%H:%M:%S%.f").to_string(),
        })
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::F64(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

/// A coerced cell, tagged by semantic type.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Int64(i64),
    Float64(f64),
    Bool(bool),
    Timestamp(NaiveDateTime),
    Text(String),
}

impl Cell {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => f.write_str("NULL"),
            Cell::Int64(v) => write!(f, "{}", v),
            Cell::Float64(v) => write!(f, "{}", v),
            Cell::Bool(v) => write!(f, "{}", v),
            Cell::Timestamp(v) => write!(f, "{}", v),
            Cell::Text(v) => write!(f, "{:?}", v),
        }
    }
}

/// Coerced rows for one window, aligned to a fixed column list.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBatch {
    /// Window the rows were fetched for.
    pub window: RowWindow,

    /// Column names in write order.
    pub columns: Vec<String>,

    /// Semantic type per column, after any coercion fallback.
    pub column_types: Vec<SemanticType>,

    /// Rows in rank order.
    pub rows: Vec<Vec<Cell>>,
}

impl RecordBatch {
    pub fn new(
        window: RowWindow,
        columns: Vec<String>,
        column_types: Vec<SemanticType>,
        rows: Vec<Vec<Cell>>,
    ) -> Self {
        Self {
            window,
            columns,
            column_types,
            rows,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}
