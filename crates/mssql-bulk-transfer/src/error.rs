//! Error types for the bulk transfer library.

use std::time::Duration;

use thiserror::Error;

/// Main error type for transfer operations.
#[derive(Error, Debug)]
pub enum TransferError {
    /// Configuration error (invalid YAML, missing fields, bad identifiers, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// The table/schema pair has no visible columns.
    #[error("Table {schema}.{table} not found (no columns visible to this connection)")]
    SchemaNotFound { schema: String, table: String },

    /// A fetch or write round-trip failed.
    ///
    /// `rows_committed` is the number of rows of the failing writer call that
    /// were committed before the failure and remain in the destination.
    #[error("Connection failure during {context}: {message} ({rows_committed} rows remain committed)")]
    ConnectionFailure {
        context: String,
        message: String,
        rows_committed: u64,
    },

    /// Driver error outside of a batch submission
    #[error("Database error: {0}")]
    Database(#[from] tiberius::error::Error),

    /// A window fetch or batch submission exceeded its deadline.
    #[error("Timed out after {limit:?} during {operation}")]
    Timeout { operation: String, limit: Duration },

    /// Transfer-level invariant violated for a specific table
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// Transfer was cancelled (SIGINT, etc.)
    #[error("Transfer cancelled")]
    Cancelled,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TransferError {
    /// Create a Pool error with context about where it occurred.
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        TransferError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Transfer error.
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        TransferError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a ConnectionFailure with nothing committed.
    pub fn connection(context: impl Into<String>, message: impl ToString) -> Self {
        TransferError::ConnectionFailure {
            context: context.into(),
            message: message.to_string(),
            rows_committed: 0,
        }
    }

    /// Whether the caller may reasonably retry the same invocation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::ConnectionFailure { .. }
                | TransferError::Timeout { .. }
                | TransferError::Pool { .. }
                | TransferError::Database(_)
        )
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            TransferError::Config(_) | TransferError::Yaml(_) | TransferError::Json(_) => 1,
            TransferError::SchemaNotFound { .. } => 2,
            TransferError::ConnectionFailure { .. }
            | TransferError::Pool { .. }
            | TransferError::Database(_) => 3,
            TransferError::Transfer { .. } => 4,
            TransferError::Timeout { .. } => 5,
            TransferError::Io(_) => 7,
            TransferError::Cancelled => 130,
        }
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, TransferError>;
