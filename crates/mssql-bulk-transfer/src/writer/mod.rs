//! Batched, parameterized inserts into a destination table.
//!
//! One [`BatchedWriter::write`] call builds a single insert statement from the
//! record batches' column order, opens one transaction, submits the rows in
//! fixed-size batches and commits once at the end. The sink decides how a
//! batch reaches the table (bulk load or the statement's multi-row INSERT).
//!
//! If a batch fails or times out, it is rolled back to its savepoint and the
//! batches submitted before it in the same call are committed. When that
//! rollback cannot be confirmed nothing is committed. The returned
//! [`TransferError::ConnectionFailure`] carries how many rows remain.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::core::identifier::{quote_column_list, quote_mssql};
use crate::core::schema::TableDescriptor;
use crate::core::traits::{InsertSink, SinkProvider};
use crate::core::value::{Cell, RecordBatch};
use crate::error::{Result, TransferError};

/// SQL Server's limit on parameters in one request.
pub const MAX_PARAMS_PER_STATEMENT: usize = 2100;

/// SQL Server's limit on row constructors in one VALUES clause.
pub const MAX_ROWS_PER_STATEMENT: usize = 1000;

/// The destination column list of one write, and its multi-row INSERT form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    table: TableDescriptor,
    columns: Vec<String>,
    prefix: String,
}

impl InsertStatement {
    pub fn new(table: &TableDescriptor, columns: &[String]) -> Result<Self> {
        if columns.is_empty() {
            return Err(TransferError::transfer(
                table.full_name(),
                "Cannot insert with zero columns",
            ));
        }
        for column in columns {
            quote_mssql(column)?;
        }

        let prefix = format!(
            "INSERT INTO {} ({}) VALUES ",
            table.quoted()?,
            quote_column_list(columns)?
        );

        Ok(Self {
            table: table.clone(),
            columns: columns.to_vec(),
            prefix,
        })
    }

    pub fn table(&self) -> &TableDescriptor {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Most rows one round trip can carry for this column count.
    pub fn rows_per_statement(&self) -> usize {
        (MAX_PARAMS_PER_STATEMENT / self.columns.len()).clamp(1, MAX_ROWS_PER_STATEMENT)
    }

    /// SQL text for `rows` row constructors, parameters numbered `@P1..`.
    pub fn sql(&self, rows: usize) -> String {
        let cols = self.columns.len();
        let mut sql = String::with_capacity(self.prefix.len() + rows * cols * 6);
        sql.push_str(&self.prefix);

        let mut param = 1;
        for r in 0..rows {
            if r > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            for c in 0..cols {
                if c > 0 {
                    sql.push_str(", ");
                }
                sql.push_str("@P");
                sql.push_str(&param.to_string());
                param += 1;
            }
            sql.push(')');
        }
        sql
    }
}

/// Normalize a cell just before it is bound as a parameter.
///
/// Non-finite floats have no SQL representation and become NULL.
pub fn prepare_value(cell: &Cell) -> Cell {
    match cell {
        Cell::Float64(v) if !v.is_finite() => Cell::Null,
        other => other.clone(),
    }
}

/// Writes record batches through a [`SinkProvider`].
#[derive(Debug, Clone)]
pub struct BatchedWriter {
    batch_size: usize,
    submit_timeout: Option<Duration>,
}

impl BatchedWriter {
    pub fn new(batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(TransferError::Config(
                "batch_size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            batch_size,
            submit_timeout: None,
        })
    }

    /// Bound each batch submission and the final commit.
    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = Some(timeout);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Insert every row of `batches` into `destination`, returning the row count.
    ///
    /// Empty input returns 0 without acquiring a session.
    pub async fn write<P, I>(
        &self,
        provider: &P,
        destination: &TableDescriptor,
        batches: I,
    ) -> Result<u64>
    where
        P: SinkProvider + ?Sized,
        I: IntoIterator<Item = RecordBatch>,
    {
        let batches: Vec<RecordBatch> = batches.into_iter().filter(|b| !b.is_empty()).collect();
        let Some(first) = batches.first() else {
            return Ok(0);
        };

        if let Some(other) = batches.iter().find(|b| b.columns != first.columns) {
            return Err(TransferError::transfer(
                destination.full_name(),
                format!(
                    "record batches disagree on columns: [{}] vs [{}]",
                    first.columns.join(", "),
                    other.columns.join(", ")
                ),
            ));
        }

        let statement = InsertStatement::new(destination, &first.columns)?;

        let mut sink = provider.acquire().await?;
        let outcome = self.submit_all(&mut sink, &statement, &batches).await;

        if let Err(e) = sink.release().await {
            warn!("{}: failed to release destination session: {}", destination, e);
        }

        outcome
    }

    async fn submit_all<K: InsertSink>(
        &self,
        sink: &mut K,
        statement: &InsertStatement,
        batches: &[RecordBatch],
    ) -> Result<u64> {
        let table = statement.table();
        let started = Instant::now();

        sink.begin()
            .await
            .map_err(|e| TransferError::connection(format!("begin transaction on {}", table), e))?;

        let mut pending: u64 = 0;
        let mut batch_no = 0usize;

        for record_batch in batches {
            for chunk in record_batch.rows.chunks(self.batch_size) {
                batch_no += 1;
                let rows: Vec<Vec<Cell>> = chunk
                    .iter()
                    .map(|row| row.iter().map(prepare_value).collect())
                    .collect();

                let submitted = self
                    .bounded(
                        format!("batch {} into {}", batch_no, table),
                        sink.submit(statement, &rows),
                    )
                    .await;

                if let Err(e) = submitted {
                    let rows_committed = self.salvage(sink, table, batch_no, pending).await;
                    return Err(TransferError::ConnectionFailure {
                        context: format!("batch {} into {}", batch_no, table),
                        message: e.to_string(),
                        rows_committed,
                    });
                }

                pending += rows.len() as u64;
                debug!(
                    "{}: batch {} submitted ({} rows, window {})",
                    table,
                    batch_no,
                    rows.len(),
                    record_batch.window
                );
            }
        }

        self.bounded(format!("commit into {}", table), sink.commit())
            .await
            .map_err(|e| TransferError::ConnectionFailure {
                context: format!("commit into {}", table),
                message: e.to_string(),
                rows_committed: 0,
            })?;

        debug!(
            "{}: committed {} rows in {} batches ({:?})",
            table,
            pending,
            batch_no,
            started.elapsed()
        );
        Ok(pending)
    }

    /// Undo the failing batch, then commit the batches that succeeded before it.
    ///
    /// A timed-out submit may have applied part of its batch, so nothing is
    /// committed unless the rollback to its savepoint succeeds.
    async fn salvage<K: InsertSink>(
        &self,
        sink: &mut K,
        table: &TableDescriptor,
        batch_no: usize,
        pending: u64,
    ) -> u64 {
        if let Err(e) = self
            .bounded(
                format!("rollback of batch {} into {}", batch_no, table),
                sink.rollback_batch(),
            )
            .await
        {
            warn!(
                "{}: could not undo batch {}, discarding the whole transaction: {}",
                table, batch_no, e
            );
            return 0;
        }
        if pending == 0 {
            return 0;
        }
        match self
            .bounded(format!("commit of earlier batches into {}", table), sink.commit())
            .await
        {
            Ok(()) => {
                warn!(
                    "{}: {} rows from earlier batches were committed before the failure",
                    table, pending
                );
                pending
            }
            Err(e) => {
                warn!("{}: could not commit earlier batches: {}", table, e);
                0
            }
        }
    }

    async fn bounded<F>(&self, operation: String, fut: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        match self.submit_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| TransferError::Timeout {
                    operation,
                    limit,
                })?,
            None => fut.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{RowWindow, SemanticType};
    use crate::testing::MemoryDestination;

    fn people() -> TableDescriptor {
        TableDescriptor::new("dbo", "people")
    }

    fn rows(n: i64) -> RecordBatch {
        RecordBatch::new(
            RowWindow::new(1, n.max(1)),
            vec!["id".into(), "name".into()],
            vec![SemanticType::NullableInt64, SemanticType::String],
            (1..=n)
                .map(|i| vec![Cell::Int64(i), Cell::Text(format!("p{}", i))])
                .collect(),
        )
    }

    #[test]
    fn test_insert_statement_sql() {
        let stmt = InsertStatement::new(&people(), &["id".into(), "full name".into()]).unwrap();
        assert_eq!(
            stmt.sql(2),
            "INSERT INTO [dbo].[people] ([id], [full name]) VALUES (@P1, @P2), (@P3, @P4)"
        );
    }

    #[test]
    fn test_insert_statement_rejects_zero_columns() {
        assert!(InsertStatement::new(&people(), &[]).is_err());
    }

    #[test]
    fn test_rows_per_statement() {
        let cols = |n: usize| (0..n).map(|i| format!("c{}", i)).collect::<Vec<_>>();
        assert_eq!(InsertStatement::new(&people(), &cols(1)).unwrap().rows_per_statement(), 1000);
        assert_eq!(InsertStatement::new(&people(), &cols(10)).unwrap().rows_per_statement(), 210);
        assert_eq!(InsertStatement::new(&people(), &cols(3000)).unwrap().rows_per_statement(), 1);
    }

    #[test]
    fn test_prepare_value() {
        assert_eq!(prepare_value(&Cell::Float64(f64::NAN)), Cell::Null);
        assert_eq!(prepare_value(&Cell::Float64(f64::INFINITY)), Cell::Null);
        assert_eq!(prepare_value(&Cell::Float64(1.5)), Cell::Float64(1.5));
        assert_eq!(prepare_value(&Cell::Int64(3)), Cell::Int64(3));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(BatchedWriter::new(0).is_err());
    }

    #[tokio::test]
    async fn test_empty_input_issues_nothing() {
        let dest = MemoryDestination::new().with_table(&people(), &[("id", "int"), ("name", "nvarchar")]);
        let writer = BatchedWriter::new(10).unwrap();

        let written = writer.write(&dest, &people(), Vec::new()).await.unwrap();
        assert_eq!(written, 0);

        let written = writer.write(&dest, &people(), vec![rows(0)]).await.unwrap();
        assert_eq!(written, 0);

        let log = dest.log();
        assert_eq!(log.acquired, 0);
        assert!(log.statements.is_empty());
    }

    #[tokio::test]
    async fn test_batches_and_single_commit() {
        let dest = MemoryDestination::new().with_table(&people(), &[("id", "int"), ("name", "nvarchar")]);
        let writer = BatchedWriter::new(2).unwrap();

        let written = writer.write(&dest, &people(), vec![rows(5)]).await.unwrap();
        assert_eq!(written, 5);

        let log = dest.log();
        assert_eq!(log.submits, 3);
        assert_eq!(log.commits, 1);
        assert_eq!(log.acquired, 1);
        assert_eq!(log.released, 1);
        assert_eq!(log.committed.len(), 5);
        assert_eq!(log.committed[4][0], Cell::Int64(5));
        assert!(log.statements[0].starts_with("INSERT INTO [dbo].[people] ([id], [name])"));
    }

    #[tokio::test]
    async fn test_failure_on_second_of_three_batches() {
        let dest = MemoryDestination::new()
            .with_table(&people(), &[("id", "int"), ("name", "nvarchar")])
            .fail_on_submit(2);
        let writer = BatchedWriter::new(2).unwrap();

        let err = writer.write(&dest, &people(), vec![rows(6)]).await.unwrap_err();
        match err {
            TransferError::ConnectionFailure { rows_committed, .. } => {
                assert_eq!(rows_committed, 2)
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let log = dest.log();
        assert_eq!(log.rollbacks, 1);
        assert_eq!(log.committed.len(), 2);
        assert_eq!(log.committed[0][0], Cell::Int64(1));
        assert_eq!(log.committed[1][0], Cell::Int64(2));
        assert_eq!(log.released, 1);
    }

    #[tokio::test]
    async fn test_failure_on_first_batch_commits_nothing() {
        let dest = MemoryDestination::new()
            .with_table(&people(), &[("id", "int"), ("name", "nvarchar")])
            .fail_on_submit(1);
        let writer = BatchedWriter::new(2).unwrap();

        let err = writer.write(&dest, &people(), vec![rows(3)]).await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::ConnectionFailure {
                rows_committed: 0,
                ..
            }
        ));
        let log = dest.log();
        assert_eq!(log.commits, 0);
        assert!(log.committed.is_empty());
        assert_eq!(log.released, 1);
    }

    #[tokio::test]
    async fn test_timeout_mid_batch_rolls_back_partial_rows() {
        let dest = MemoryDestination::new()
            .with_table(&people(), &[("id", "int"), ("name", "nvarchar")])
            .with_chunk_rows(2)
            .stall_on_submit(2);
        let writer = BatchedWriter::new(4)
            .unwrap()
            .with_submit_timeout(Duration::from_millis(50));

        let err = writer.write(&dest, &people(), vec![rows(12)]).await.unwrap_err();
        match err {
            TransferError::ConnectionFailure {
                message,
                rows_committed,
                ..
            } => {
                assert_eq!(rows_committed, 4);
                assert!(message.contains("50ms"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let log = dest.log();
        assert_eq!(log.rollbacks, 1);
        assert_eq!(log.commits, 1);
        let ids: Vec<Cell> = log.committed.iter().map(|row| row[0].clone()).collect();
        assert_eq!(
            ids,
            vec![Cell::Int64(1), Cell::Int64(2), Cell::Int64(3), Cell::Int64(4)]
        );
        assert_eq!(log.released, 1);
    }

    #[tokio::test]
    async fn test_failed_rollback_commits_nothing() {
        let dest = MemoryDestination::new()
            .with_table(&people(), &[("id", "int"), ("name", "nvarchar")])
            .fail_on_submit(2)
            .fail_rollback();
        let writer = BatchedWriter::new(2).unwrap();

        let err = writer.write(&dest, &people(), vec![rows(6)]).await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::ConnectionFailure {
                rows_committed: 0,
                ..
            }
        ));
        let log = dest.log();
        assert_eq!(log.commits, 0);
        assert!(log.committed.is_empty());
        assert_eq!(log.released, 1);
    }

    #[tokio::test]
    async fn test_mismatched_columns_rejected() {
        let dest = MemoryDestination::new().with_table(&people(), &[("id", "int"), ("name", "nvarchar")]);
        let writer = BatchedWriter::new(2).unwrap();
        let mut other = rows(1);
        other.columns = vec!["name".into(), "id".into()];

        assert!(writer.write(&dest, &people(), vec![rows(1), other]).await.is_err());
        assert_eq!(dest.log().acquired, 0);
    }

    #[tokio::test]
    async fn test_nan_written_as_null() {
        let dest = MemoryDestination::new().with_table(&people(), &[("score", "float")]);
        let writer = BatchedWriter::new(10).unwrap();
        let batch = RecordBatch::new(
            RowWindow::new(1, 1),
            vec!["score".into()],
            vec![SemanticType::Float64],
            vec![vec![Cell::Float64(f64::NAN)]],
        );

        writer.write(&dest, &people(), vec![batch]).await.unwrap();
        assert_eq!(dest.log().committed[0][0], Cell::Null);
    }
}
