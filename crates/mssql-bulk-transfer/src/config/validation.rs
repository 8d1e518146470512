//! Configuration validation.

use super::{Config, ConnectionConfig};
use crate::core::identifier::validate_identifier;
use crate::error::{Result, TransferError};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_connection("source", &config.source)?;
    validate_connection("destination", &config.destination)?;

    let transfer = &config.transfer;
    if transfer.window_size == 0 {
        return Err(TransferError::Config(
            "transfer.window_size must be at least 1".into(),
        ));
    }
    if transfer.batch_size == 0 {
        return Err(TransferError::Config(
            "transfer.batch_size must be at least 1".into(),
        ));
    }

    // Concurrency settings - only check if explicitly set
    if let Some(0) = transfer.parallel_readers {
        return Err(TransferError::Config(
            "transfer.parallel_readers must be at least 1".into(),
        ));
    }
    if let Some(0) = transfer.parallel_writers {
        return Err(TransferError::Config(
            "transfer.parallel_writers must be at least 1".into(),
        ));
    }
    if let Some(0) = transfer.read_ahead {
        return Err(TransferError::Config(
            "transfer.read_ahead must be at least 1".into(),
        ));
    }
    if let Some(0) = transfer.fetch_timeout_secs {
        return Err(TransferError::Config(
            "transfer.fetch_timeout_secs must be at least 1".into(),
        ));
    }
    if let Some(0) = transfer.write_timeout_secs {
        return Err(TransferError::Config(
            "transfer.write_timeout_secs must be at least 1".into(),
        ));
    }

    for column in transfer
        .order_by
        .iter()
        .chain(transfer.string_columns.iter().flatten())
    {
        validate_identifier(column)
            .map_err(|e| TransferError::Config(format!("transfer column list: {}", e)))?;
    }

    Ok(())
}

fn validate_connection(section: &str, conn: &ConnectionConfig) -> Result<()> {
    if conn.host.is_empty() {
        return Err(TransferError::Config(format!("{}.host is required", section)));
    }
    if conn.database.is_empty() {
        return Err(TransferError::Config(format!(
            "{}.database is required",
            section
        )));
    }
    if conn.user.is_empty() {
        return Err(TransferError::Config(format!("{}.user is required", section)));
    }
    if conn.driver_name.trim().is_empty() {
        return Err(TransferError::Config(format!(
            "{}.driver_name cannot be empty",
            section
        )));
    }
    Ok(())
}
