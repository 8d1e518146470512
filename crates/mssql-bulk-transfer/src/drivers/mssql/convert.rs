//! Conversions between tiberius wire values and the crate's value types.

use std::borrow::Cow;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tiberius::{ColumnData, FromSql, IntoSql, ToSql};

use crate::core::value::{Cell, SqlValue};

/// Convert one fetched column into a [`SqlValue`].
///
/// Temporal and numeric types go through tiberius' own `FromSql` impls so the
/// wire encodings (day counts, scaled integers) are decoded in one place.
pub fn column_to_value(data: ColumnData<'static>) -> tiberius::Result<SqlValue> {
    let value = match &data {
        ColumnData::U8(v) => v.map(SqlValue::U8),
        ColumnData::I16(v) => v.map(SqlValue::I16),
        ColumnData::I32(v) => v.map(SqlValue::I32),
        ColumnData::I64(v) => v.map(SqlValue::I64),
        ColumnData::F32(v) => v.map(SqlValue::F32),
        ColumnData::F64(v) => v.map(SqlValue::F64),
        ColumnData::Bit(v) => v.map(SqlValue::Bool),
        ColumnData::String(v) => v.as_ref().map(|s| SqlValue::Text(s.to_string())),
        ColumnData::Guid(v) => v.map(SqlValue::Uuid),
        ColumnData::Binary(v) => v.as_ref().map(|b| SqlValue::Bytes(b.to_vec())),
        ColumnData::Xml(v) => v
            .as_ref()
            .map(|x| SqlValue::Text(x.clone().into_owned().into_string())),
        ColumnData::Numeric(_) => Decimal::from_sql(&data)?.map(SqlValue::Decimal),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(&data)?.map(SqlValue::DateTime)
        }
        ColumnData::Date(_) => NaiveDate::from_sql(&data)?.map(SqlValue::Date),
        ColumnData::Time(_) => NaiveTime::from_sql(&data)?.map(SqlValue::Time),
        ColumnData::DateTimeOffset(_) => {
            DateTime::<FixedOffset>::from_sql(&data)?.map(SqlValue::DateTimeOffset)
        }
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

/// Bind a cell as a query parameter.
pub fn cell_to_param(cell: &Cell) -> Box<dyn ToSql> {
    match cell {
        Cell::Null => Box::new(Option::<String>::None),
        Cell::Int64(v) => Box::new(*v),
        Cell::Float64(v) => Box::new(*v),
        Cell::Bool(v) => Box::new(*v),
        Cell::Timestamp(v) => Box::new(*v),
        Cell::Text(v) => Box::new(v.clone()),
    }
}

/// Destination column types a TDS bulk load can encode without server-side
/// conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkKind {
    BigInt,
    Int,
    SmallInt,
    TinyInt,
    Bit,
    Float,
    Real,
    /// nvarchar/nchar with a byte limit.
    NVarChar(usize),
    /// datetime2 at the default scale of 7.
    DateTime2,
}

impl BulkKind {
    /// Classify a destination column from `sys.columns`.
    ///
    /// Returns `None` for types that are written with INSERT statements.
    pub fn classify(type_name: &str, max_length: i16, scale: u8) -> Option<Self> {
        let kind = match type_name.to_lowercase().as_str() {
            "bigint" => BulkKind::BigInt,
            "int" => BulkKind::Int,
            "smallint" => BulkKind::SmallInt,
            "tinyint" => BulkKind::TinyInt,
            "bit" => BulkKind::Bit,
            "float" => BulkKind::Float,
            "real" => BulkKind::Real,
            // max_length is -1 for (max) columns.
            "nvarchar" | "nchar" if max_length > 0 => BulkKind::NVarChar(max_length as usize),
            "datetime2" if scale == 7 => BulkKind::DateTime2,
            _ => return None,
        };
        Some(kind)
    }
}

/// Encode a cell for a bulk load into a column of `kind`.
///
/// Returns `None` when the value does not fit the column as-is; such rows are
/// inserted with statements so SQL Server applies its own conversion rules.
pub fn cell_to_column_data(cell: &Cell, kind: BulkKind) -> Option<ColumnData<'static>> {
    let data = match (kind, cell) {
        (BulkKind::BigInt, Cell::Null) => ColumnData::I64(None),
        (BulkKind::BigInt, Cell::Int64(v)) => ColumnData::I64(Some(*v)),
        (BulkKind::Int, Cell::Null) => ColumnData::I32(None),
        (BulkKind::Int, Cell::Int64(v)) => ColumnData::I32(Some(i32::try_from(*v).ok()?)),
        (BulkKind::SmallInt, Cell::Null) => ColumnData::I16(None),
        (BulkKind::SmallInt, Cell::Int64(v)) => ColumnData::I16(Some(i16::try_from(*v).ok()?)),
        (BulkKind::TinyInt, Cell::Null) => ColumnData::U8(None),
        (BulkKind::TinyInt, Cell::Int64(v)) => ColumnData::U8(Some(u8::try_from(*v).ok()?)),
        (BulkKind::Bit, Cell::Null) => ColumnData::Bit(None),
        (BulkKind::Bit, Cell::Bool(v)) => ColumnData::Bit(Some(*v)),
        (BulkKind::Float, Cell::Null) => ColumnData::F64(None),
        (BulkKind::Float, Cell::Float64(v)) if v.is_finite() => ColumnData::F64(Some(*v)),
        (BulkKind::Real, Cell::Null) => ColumnData::F32(None),
        (BulkKind::Real, Cell::Float64(v)) if v.is_finite() => ColumnData::F32(Some(*v as f32)),
        (BulkKind::NVarChar(_), Cell::Null) => ColumnData::String(None),
        (BulkKind::NVarChar(limit), Cell::Text(s)) => {
            let utf16_bytes: usize = s.chars().map(|c| c.len_utf16() * 2).sum();
            if utf16_bytes > limit {
                return None;
            }
            ColumnData::String(Some(Cow::Owned(s.clone())))
        }
        (BulkKind::DateTime2, Cell::Null) => ColumnData::DateTime2(None),
        (BulkKind::DateTime2, Cell::Timestamp(v)) => (*v).into_sql(),
        _ => return None,
    };
    Some(data)
}
