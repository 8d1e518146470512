//! Seams between the transfer core and a database driver.
//!
//! - [`CatalogReader`]: column and primary key metadata
//! - [`RankedSource`] / [`RankedSnapshot`]: a ranked row set materialized once,
//!   fetched window by window
//! - [`SinkProvider`] / [`InsertSink`]: a destination session that submits
//!   parameterized batches inside one transaction
//!
//! The SQL Server implementations live in `drivers::mssql`. Tests drive the
//! core through in-memory implementations instead.

use async_trait::async_trait;

use crate::error::Result;
use crate::writer::InsertStatement;

use super::schema::{CatalogColumn, RowWindow, TableDescriptor};
use super::value::{Cell, SqlValue};

/// Read table metadata from a database catalog.
#[async_trait]
pub trait CatalogReader: Send + Sync {
    /// Columns of a table ordered by physical position.
    ///
    /// Returns an empty list when the table is not visible.
    async fn columns(&self, table: &TableDescriptor) -> Result<Vec<CatalogColumn>>;

    /// Primary key columns in key order, empty when the table has none.
    async fn primary_key(&self, table: &TableDescriptor) -> Result<Vec<String>>;
}

/// What to rank and how.
#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    /// Table to snapshot.
    pub table: TableDescriptor,

    /// Projected columns, in output order.
    pub columns: Vec<String>,

    /// Rank ordering columns. Empty means the source's unordered numbering.
    pub order_by: Vec<String>,
}

/// A source that can materialize a ranked snapshot of a table.
#[async_trait]
pub trait RankedSource: CatalogReader {
    type Snapshot: RankedSnapshot + 'static;

    /// Rank every row once and keep the ranked set for windowed fetches.
    async fn snapshot(&self, request: &SnapshotRequest) -> Result<Self::Snapshot>;
}

/// Rows fetched for one window, still in driver representation.
#[derive(Debug, Clone, Default)]
pub struct RawWindow {
    /// Rank of each row, parallel to `rows`.
    pub ranks: Vec<i64>,

    /// Projected values per row, rank column already removed.
    pub rows: Vec<Vec<SqlValue>>,
}

impl RawWindow {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A ranked row set fixed at creation time.
#[async_trait]
pub trait RankedSnapshot: Send + Sync {
    /// Total ranked rows, counted once when the snapshot was taken.
    fn row_count(&self) -> i64;

    /// Rows whose rank lies in `window`, in rank order.
    async fn fetch_window(&self, window: RowWindow) -> Result<RawWindow>;

    /// Drop the materialized set. Safe to call more than once.
    async fn release(&self) -> Result<()>;
}

/// Provides destination sessions for batched inserts.
#[async_trait]
pub trait SinkProvider: CatalogReader {
    type Sink: InsertSink;

    /// Check out a dedicated session.
    async fn acquire(&self) -> Result<Self::Sink>;
}

/// A destination session holding at most one open transaction.
///
/// Each [`submit`](InsertSink::submit) opens a savepoint first. After a failed
/// or abandoned submit the caller undoes that batch with
/// [`rollback_batch`](InsertSink::rollback_batch); rows from earlier batches
/// stay pending in the open transaction.
#[async_trait]
pub trait InsertSink: Send {
    async fn begin(&mut self) -> Result<()>;

    /// Insert one batch of rows.
    ///
    /// May be dropped part way through, leaving some of the batch applied.
    async fn submit(&mut self, statement: &InsertStatement, rows: &[Vec<Cell>]) -> Result<()>;

    /// Undo everything since the savepoint of the most recent submit.
    async fn rollback_batch(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    /// Return the session, rolling back anything still open.
    async fn release(&mut self) -> Result<()>;
}
