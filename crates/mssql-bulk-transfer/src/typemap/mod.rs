//! Mapping from declared SQL Server type names to semantic types.
//!
//! The lookup table is an immutable value. A [`TypeMapper`] holds it behind an
//! `Arc`, so callers can build a table with overrides once and share it across
//! transfers without copying.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::schema::SemanticType;

/// Semantic type for any declared type missing from the table.
pub const FALLBACK_TYPE: SemanticType = SemanticType::String;

/// Case-insensitive declared type → semantic type table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeTable {
    entries: HashMap<String, SemanticType>,
}

impl TypeTable {
    /// An empty table; every lookup falls back to string.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// The SQL Server table.
    pub fn mssql_default() -> Self {
        use SemanticType::*;

        let pairs: &[(&str, SemanticType)] = &[
            // Integer family
            ("tinyint", NullableInt64),
            ("smallint", NullableInt64),
            ("int", NullableInt64),
            ("bigint", NullableInt64),
            // Exact and approximate numerics
            ("decimal", Float64),
            ("numeric", Float64),
            ("float", Float64),
            ("real", Float64),
            ("money", Float64),
            ("smallmoney", Float64),
            ("bit", Bool),
            // Character data
            ("char", String),
            ("nchar", String),
            ("varchar", String),
            ("nvarchar", String),
            ("text", String),
            ("ntext", String),
            // Date/time. Offsets are normalized to UTC on read.
            ("date", Timestamp),
            ("datetime", Timestamp),
            ("datetime2", Timestamp),
            ("smalldatetime", Timestamp),
            ("datetimeoffset", Timestamp),
            // Time of day has no date part to anchor a timestamp
            ("time", RawString),
        ];

        Self {
            entries: pairs
                .iter()
                .map(|(name, ty)| (name.to_string(), *ty))
                .collect(),
        }
    }

    /// Return a copy with one entry added or replaced.
    #[must_use]
    pub fn with_override(mut self, declared_type: &str, semantic: SemanticType) -> Self {
        self.entries.insert(normalize_type_name(declared_type), semantic);
        self
    }

    /// Return a copy with every override applied.
    #[must_use]
    pub fn with_overrides<'a, I>(self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a SemanticType)>,
    {
        overrides
            .into_iter()
            .fold(self, |table, (name, ty)| table.with_override(name, *ty))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, declared_type: &str) -> Option<SemanticType> {
        self.entries.get(&normalize_type_name(declared_type)).copied()
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::mssql_default()
    }
}

/// Lowercase, trim and drop any length/precision suffix: `NVARCHAR(50)` → `nvarchar`.
fn normalize_type_name(declared_type: &str) -> String {
    let base = match declared_type.find('(') {
        Some(idx) => &declared_type[..idx],
        None => declared_type,
    };
    base.trim().to_lowercase()
}

/// Total, pure mapping from declared type to semantic type.
#[derive(Debug, Clone)]
pub struct TypeMapper {
    table: Arc<TypeTable>,
}

impl TypeMapper {
    pub fn new(table: Arc<TypeTable>) -> Self {
        Self { table }
    }

    /// Map a declared type. Unknown types map to [`FALLBACK_TYPE`].
    pub fn map(&self, declared_type: &str) -> SemanticType {
        self.table.lookup(declared_type).unwrap_or(FALLBACK_TYPE)
    }

    /// Whether the declared type is listed, rather than falling back.
    pub fn is_known(&self, declared_type: &str) -> bool {
        self.table.lookup(declared_type).is_some()
    }

    pub fn table(&self) -> &TypeTable {
        &self.table
    }
}

impl Default for TypeMapper {
    fn default() -> Self {
        Self::new(Arc::new(TypeTable::mssql_default()))
    }
}
