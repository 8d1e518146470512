//! Microsoft SQL Server driver.
//!
//! [`MssqlPool`] is a bb8 pool of tiberius clients. It implements
//! [`CatalogReader`](crate::core::CatalogReader) for both sides,
//! [`RankedSource`](crate::core::RankedSource) for the source and
//! [`SinkProvider`](crate::core::SinkProvider) for the destination.

mod catalog;
mod connection;
mod convert;
mod sink;
mod snapshot;

pub use connection::{MssqlClient, MssqlPool, TiberiusConnectionManager};
pub use convert::{cell_to_column_data, cell_to_param, column_to_value, BulkKind};
pub use sink::MssqlSink;
pub use snapshot::{MssqlSnapshot, RANK_COLUMN};
