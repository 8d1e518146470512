//! Identifier validation and quoting for generated SQL.
//!
//! Schema, table and column names cannot be bound as statement parameters, so
//! every identifier that reaches generated SQL goes through this module:
//!
//! 1. Reject empty names, null bytes and names longer than SQL Server allows
//! 2. Wrap in brackets, doubling any embedded closing bracket
//!
//! Catalog lookups bind schema and table as parameters instead (see
//! `drivers::mssql::catalog`), so a table that survives introspection is
//! known to exist under exactly the quoted name.

use crate::error::{TransferError, Result};

/// SQL Server `sysname` limit in characters.
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier before it is quoted.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TransferError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(TransferError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    let len = name.chars().count();
    if len > MAX_IDENTIFIER_LENGTH {
        return Err(TransferError::Config(format!(
            "Identifier exceeds maximum length of {} characters (got {}): {:?}",
            MAX_IDENTIFIER_LENGTH, len, name
        )));
    }

    Ok(())
}

/// Quote a SQL Server identifier using brackets.
///
/// ```
/// use mssql_bulk_transfer::core::identifier::quote_mssql;
///
/// assert_eq!(quote_mssql("users").unwrap(), "[users]");
/// assert_eq!(quote_mssql("odd]name").unwrap(), "[odd]]name]");
/// ```
pub fn quote_mssql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("[{}]", name.replace(']', "]]")))
}

/// Qualify a SQL Server table name with its schema, both quoted.
pub fn qualify_mssql(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_mssql(schema)?, quote_mssql(table)?))
}

/// Quote and comma-join a list of column names.
pub fn quote_column_list(columns: &[String]) -> Result<String> {
    let quoted = columns
        .iter()
        .map(|c| quote_mssql(c))
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(", "))
}
