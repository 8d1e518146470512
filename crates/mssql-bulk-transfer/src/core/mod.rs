//! Core types shared by the transfer pipeline and the driver.
//!
//! - [`schema`]: table identity, semantic types, column type maps, windows
//! - [`value`]: driver values, coerced cells and record batches
//! - [`identifier`]: identifier validation and bracket quoting
//! - [`traits`]: catalog, snapshot and sink seams implemented by drivers

pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{
    CatalogColumn, ColumnTypeMap, RowWindow, SemanticType, TableDescriptor, DEFAULT_SCHEMA,
};
pub use traits::{
    CatalogReader, InsertSink, RankedSnapshot, RankedSource, RawWindow, SinkProvider,
    SnapshotRequest,
};
pub use value::{Cell, RecordBatch, SqlValue};
