//! Configuration type definitions with auto-tuning based on system resources.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::info;

use crate::core::schema::SemanticType;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in bytes.
    pub total_memory_bytes: u64,
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu();

        let total_memory_bytes = sys.total_memory();
        let total_memory_gb = total_memory_bytes as f64 / (1024.0 * 1024.0 * 1024.0);
        let cpu_cores = sys.cpus().len().max(1);

        Self {
            total_memory_bytes,
            total_memory_gb,
            cpu_cores,
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database the rows are read from.
    pub source: ConnectionConfig,

    /// Database the rows are inserted into.
    pub destination: ConnectionConfig,

    /// Transfer behavior.
    #[serde(default)]
    pub transfer: TransferConfig,
}

impl Config {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that weren't explicitly set in the config file.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.transfer = self.transfer.with_auto_tuning(&resources);
        self
    }
}

/// SQL Server connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,

    /// TCP port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    pub database: String,

    pub user: String,

    #[serde(skip_serializing)]
    pub password: String,

    /// ODBC driver name carried over from DSN-style configs (default:
    /// "ODBC Driver 18 for SQL Server"). The native TDS client does not use it.
    #[serde(default = "default_driver_name")]
    pub driver_name: String,

    /// Accept the server certificate without verifying it (default: true).
    #[serde(default = "default_true")]
    pub trust_unverified_tls: bool,

    /// Require an encrypted connection (default: true).
    #[serde(default = "default_true")]
    pub encrypt: bool,

    /// Application name reported to the server.
    #[serde(default = "default_application_name")]
    pub application_name: String,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("driver_name", &self.driver_name)
            .field("trust_unverified_tls", &self.trust_unverified_tls)
            .field("encrypt", &self.encrypt)
            .field("application_name", &self.application_name)
            .finish()
    }
}

impl ConnectionConfig {
    /// `host:port/database`, for logs.
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

/// Transfer behavior configuration.
/// Concurrency and timeout fields use Option<T> to distinguish between
/// "not set" (use auto-tuned default) and "explicitly set" (use provided value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Rows per fetched window (default: 50000).
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Rows per insert batch (default: 10000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Columns to trim and null-if-empty. Defaults to every string-like column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_columns: Option<Vec<String>>,

    /// Columns that fix the rank order. Falls back to the primary key.
    #[serde(default)]
    pub order_by: Vec<String>,

    /// Declared type → semantic type entries added to the built-in table.
    #[serde(default)]
    pub type_overrides: BTreeMap<String, SemanticType>,

    /// Parallel window readers. Auto-tuned based on CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_readers: Option<usize>,

    /// Parallel batch writers. Auto-tuned based on CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_writers: Option<usize>,

    /// Windows buffered between readers and writers. Auto-tuned based on RAM if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_ahead: Option<usize>,

    /// Seconds allowed per window fetch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_timeout_secs: Option<u64>,

    /// Seconds allowed per batch submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_timeout_secs: Option<u64>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            batch_size: default_batch_size(),
            string_columns: None,
            order_by: Vec::new(),
            type_overrides: BTreeMap::new(),
            parallel_readers: None,
            parallel_writers: None,
            read_ahead: None,
            fetch_timeout_secs: None,
            write_timeout_secs: None,
        }
    }
}

impl TransferConfig {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that are None (not explicitly set).
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        let ram_gb = resources.total_memory_gb;
        let cores = resources.cpu_cores;

        // Readers and writers: scale with cores, 1-8 range
        if self.parallel_readers.is_none() {
            self.parallel_readers = Some((cores / 4).clamp(1, 8));
        }
        if self.parallel_writers.is_none() {
            self.parallel_writers = Some((cores / 4).clamp(1, 8));
        }

        // Read-ahead: one buffered window per 2 GB, 2-16 range
        if self.read_ahead.is_none() {
            self.read_ahead = Some(((ram_gb / 2.0) as usize).clamp(2, 16));
        }

        if self.fetch_timeout_secs.is_none() {
            self.fetch_timeout_secs = Some(DEFAULT_FETCH_TIMEOUT_SECS);
        }
        if self.write_timeout_secs.is_none() {
            self.write_timeout_secs = Some(DEFAULT_WRITE_TIMEOUT_SECS);
        }

        info!(
            "Auto-tuned config: parallel_readers={}, parallel_writers={}, read_ahead={}, \
             window_size={}, batch_size={}",
            self.get_parallel_readers(),
            self.get_parallel_writers(),
            self.get_read_ahead(),
            self.window_size,
            self.batch_size,
        );

        self
    }

    // Accessor methods that return the effective value (with fallback defaults)
    // These are used when the config hasn't been auto-tuned yet

    pub fn get_parallel_readers(&self) -> usize {
        self.parallel_readers.unwrap_or(2)
    }

    pub fn get_parallel_writers(&self) -> usize {
        self.parallel_writers.unwrap_or(2)
    }

    pub fn get_read_ahead(&self) -> usize {
        self.read_ahead.unwrap_or(4)
    }

    pub fn get_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS))
    }

    pub fn get_write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs.unwrap_or(DEFAULT_WRITE_TIMEOUT_SECS))
    }

    /// Source pool size: one per reader plus the snapshot owner.
    pub fn source_pool_size(&self) -> u32 {
        (self.get_parallel_readers() + 1) as u32
    }

    /// Destination pool size: one per writer plus the catalog lookups.
    pub fn destination_pool_size(&self) -> u32 {
        (self.get_parallel_writers() + 1) as u32
    }
}

const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 300;
const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 300;

// Default value functions for serde
fn default_mssql_port() -> u16 {
    1433
}

fn default_driver_name() -> String {
    "ODBC Driver 18 for SQL Server".to_string()
}

fn default_application_name() -> String {
    "mssql-bulk-transfer".to_string()
}

fn default_window_size() -> usize {
    50_000
}

fn default_batch_size() -> usize {
    10_000
}

fn default_true() -> bool {
    true
}
