//! Table identity, semantic types and the per-table column type map.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::identifier::{qualify_mssql, validate_identifier};
use crate::error::{Result, TransferError};

/// Conventional default schema on SQL Server.
pub const DEFAULT_SCHEMA: &str = "dbo";

/// Identifies a relational table by schema and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Schema name.
    pub schema: String,

    /// Table name.
    pub name: String,
}

impl TableDescriptor {
    /// Create a descriptor in an explicit schema.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Create a descriptor in the default schema.
    pub fn in_default_schema(name: impl Into<String>) -> Self {
        Self::new(DEFAULT_SCHEMA, name)
    }

    /// Parse `schema.table` or a bare `table` (default schema).
    pub fn parse(qualified: &str) -> Result<Self> {
        let descriptor = match qualified.split_once('.') {
            Some((schema, name)) => Self::new(schema.trim(), name.trim()),
            None => Self::in_default_schema(qualified.trim()),
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Check both parts are non-empty, valid identifiers.
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.schema)
            .map_err(|e| TransferError::Config(format!("invalid schema for {}: {}", self, e)))?;
        validate_identifier(&self.name)
            .map_err(|e| TransferError::Config(format!("invalid table for {}: {}", self, e)))?;
        Ok(())
    }

    /// Get the fully qualified, unquoted name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Get the fully qualified, bracket-quoted name.
    pub fn quoted(&self) -> Result<String> {
        qualify_mssql(&self.schema, &self.name)
    }
}

impl fmt::Display for TableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Canonical in-memory classification of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SemanticType {
    /// 64-bit integer, nulls allowed.
    NullableInt64,
    Float64,
    Bool,
    String,
    Timestamp,
    /// Text kept verbatim from the source rendering (no parsing attempted).
    RawString,
}

impl SemanticType {
    /// Whether the normalizer treats this column as text by default.
    pub fn is_string_like(&self) -> bool {
        matches!(self, SemanticType::String | SemanticType::RawString)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::NullableInt64 => "nullable-int64",
            SemanticType::Float64 => "float64",
            SemanticType::Bool => "bool",
            SemanticType::String => "string",
            SemanticType::Timestamp => "timestamp",
            SemanticType::RawString => "raw-string",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SemanticType {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "nullable-int64" | "int64" => Ok(SemanticType::NullableInt64),
            "float64" => Ok(SemanticType::Float64),
            "bool" | "boolean" => Ok(SemanticType::Bool),
            "string" => Ok(SemanticType::String),
            "timestamp" => Ok(SemanticType::Timestamp),
            "raw-string" => Ok(SemanticType::RawString),
            other => Err(TransferError::Config(format!(
                "Unknown semantic type '{}'. Expected one of: nullable-int64, float64, bool, string, timestamp, raw-string",
                other
            ))),
        }
    }
}

/// A column as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogColumn {
    pub name: String,
    /// Declared type name, e.g. "nvarchar" or "datetime2".
    pub declared_type: String,
    /// 1-based physical position.
    pub ordinal: i32,
}

/// Ordered column name to semantic type mapping for one table.
///
/// Immutable once built; shared between reader tasks behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnTypeMap {
    entries: Vec<(String, SemanticType)>,
}

impl ColumnTypeMap {
    /// Build from ordered entries. Column names must be unique.
    pub fn new(entries: Vec<(String, SemanticType)>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(entries.len());
        for (name, _) in &entries {
            if !seen.insert(name.as_str()) {
                return Err(TransferError::Config(format!(
                    "duplicate column '{}' in column type map",
                    name
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Semantic type of a column, if present.
    pub fn get(&self, column: &str) -> Option<SemanticType> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, ty)| *ty)
    }

    /// Column names in physical order.
    pub fn columns(&self) -> Vec<String> {
        self.entries.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Semantic types in physical order.
    pub fn types(&self) -> Vec<SemanticType> {
        self.entries.iter().map(|(_, ty)| *ty).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, SemanticType)> {
        self.entries.iter().map(|(name, ty)| (name.as_str(), *ty))
    }
}

/// Inclusive, 1-based range of row ranks fetched as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowWindow {
    pub start: i64,
    pub end: i64,
}

impl RowWindow {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Number of ranks covered.
    pub fn len(&self) -> i64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn contains(&self, rank: i64) -> bool {
        rank >= self.start && rank <= self.end
    }
}

impl fmt::Display for RowWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}
