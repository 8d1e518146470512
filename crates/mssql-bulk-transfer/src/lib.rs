//! # mssql-bulk-transfer
//!
//! Paginated, type-coercing bulk table transfer between SQL Server databases.
//!
//! A transfer:
//!
//! - **Introspects** the source table and maps each declared column type to a
//!   semantic type
//! - **Snapshots** the source once into a ranked temporary table
//! - **Reads** fixed-size rank windows in parallel and coerces every value,
//!   falling back to raw text per column and window when coercion fails
//! - **Normalizes** string columns (trim, empty becomes NULL)
//! - **Writes** each window as parameterized multi-row inserts in batches,
//!   committing once per window
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mssql_bulk_transfer::{Config, MssqlPool, TableDescriptor, TransferEngine};
//!
//! #[tokio::main]
//! async fn main() -> mssql_bulk_transfer::Result<()> {
//!     let config = Config::load("config.yaml")?.with_auto_tuning();
//!     let transfer = &config.transfer;
//!
//!     let source = MssqlPool::connect(&config.source, "source", transfer.source_pool_size()).await?;
//!     let destination =
//!         MssqlPool::connect(&config.destination, "destination", transfer.destination_pool_size())
//!             .await?;
//!
//!     let engine = TransferEngine::new(Arc::new(source), Arc::new(destination), transfer.to_options())
//!         .with_type_mapper(transfer.type_mapper());
//!     let table = TableDescriptor::parse("dbo.orders")?;
//!     let report = engine.run(&table, &table).await?;
//!     println!("Transferred {} rows", report.result.rows_transferred);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod introspect;
pub mod normalize;
pub mod reader;
pub mod transfer;
pub mod typemap;
pub mod writer;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use config::{Config, ConnectionConfig, TransferConfig};
pub use crate::core::{
    Cell, ColumnTypeMap, RecordBatch, RowWindow, SemanticType, SqlValue, TableDescriptor,
};
pub use drivers::MssqlPool;
pub use error::{Result, TransferError};
pub use reader::{CoercionFailure, PaginatedReader, WindowPlan};
pub use transfer::{TransferEngine, TransferOptions, TransferReport, TransferResult, TransferStats};
pub use typemap::{TypeMapper, TypeTable};
pub use writer::BatchedWriter;
