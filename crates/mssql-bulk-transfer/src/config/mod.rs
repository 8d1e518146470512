//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::transfer::TransferOptions;
use crate::typemap::{TypeMapper, TypeTable};

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

impl TransferConfig {
    /// Engine options with the effective (possibly auto-tuned) values.
    pub fn to_options(&self) -> TransferOptions {
        TransferOptions {
            window_size: self.window_size,
            batch_size: self.batch_size,
            string_columns: self.string_columns.clone(),
            order_by: self.order_by.clone(),
            parallel_readers: self.get_parallel_readers(),
            parallel_writers: self.get_parallel_writers(),
            read_ahead: self.get_read_ahead(),
            fetch_timeout: Some(self.get_fetch_timeout()),
            write_timeout: Some(self.get_write_timeout()),
        }
    }

    /// Built-in type table with the configured overrides applied.
    pub fn type_mapper(&self) -> TypeMapper {
        let table = TypeTable::mssql_default().with_overrides(&self.type_overrides);
        TypeMapper::new(Arc::new(table))
    }
}
