//! Table transfer engine with a parallel read-ahead/write-behind pipeline.
//!
//! One run:
//! - introspects source and destination
//! - materializes a ranked snapshot of the source once
//! - spawns reader tasks that fetch, coerce and normalize windows into a
//!   bounded channel
//! - spawns writer tasks that drain the channel, one batched write (and one
//!   commit) per window
//!
//! The first failure cancels every task. Windows already committed stay
//! committed.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::schema::{ColumnTypeMap, TableDescriptor};
use crate::core::traits::{RankedSnapshot, RankedSource, SinkProvider, SnapshotRequest};
use crate::core::value::RecordBatch;
use crate::error::{Result, TransferError};
use crate::introspect::introspect;
use crate::normalize::normalize_strings;
use crate::reader::{CoercionFailure, PaginatedReader};
use crate::typemap::TypeMapper;
use crate::writer::BatchedWriter;

/// Engine settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOptions {
    /// Rows per fetched window.
    pub window_size: usize,
    /// Rows per insert batch.
    pub batch_size: usize,
    /// Columns to normalize; `None` means every string-like column.
    pub string_columns: Option<Vec<String>>,
    /// Rank ordering columns; empty means the primary key.
    pub order_by: Vec<String>,
    pub parallel_readers: usize,
    pub parallel_writers: usize,
    /// Windows buffered between readers and writers.
    pub read_ahead: usize,
    pub fetch_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            window_size: 50_000,
            batch_size: 10_000,
            string_columns: None,
            order_by: Vec::new(),
            parallel_readers: 2,
            parallel_writers: 2,
            read_ahead: 4,
            fetch_timeout: None,
            write_timeout: None,
        }
    }
}

impl TransferOptions {
    fn validate(&self) -> Result<()> {
        let checks = [
            ("window_size", self.window_size),
            ("batch_size", self.batch_size),
            ("parallel_readers", self.parallel_readers),
            ("parallel_writers", self.parallel_writers),
            ("read_ahead", self.read_ahead),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(TransferError::Config(format!("{} must be at least 1", name)));
            }
        }
        Ok(())
    }
}

/// The externally visible outcome of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransferResult {
    pub rows_transferred: i64,
}

/// Statistics from a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferStats {
    /// Windows fetched.
    pub windows: u64,

    /// Insert batches submitted.
    pub batches: u64,

    /// Columns that fell back to raw-string, per window.
    pub coercion_failures: Vec<CoercionFailure>,

    /// Cumulative time spent fetching windows.
    #[serde(with = "duration_ms")]
    pub read_time: Duration,

    /// Cumulative time spent writing windows.
    #[serde(with = "duration_ms")]
    pub write_time: Duration,

    /// Wall-clock time of the run.
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

/// Result plus statistics, as printed by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub source_table: String,
    pub destination_table: String,
    #[serde(flatten)]
    pub result: TransferResult,
    pub stats: TransferStats,
}

impl TransferReport {
    pub fn rows_per_second(&self) -> i64 {
        let secs = self.stats.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.result.rows_transferred as f64 / secs) as i64
        } else {
            0
        }
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[derive(Debug, Default)]
struct ReaderTally {
    windows: u64,
    failures: Vec<CoercionFailure>,
    read_time: Duration,
}

#[derive(Debug, Default)]
struct WriterTally {
    rows: u64,
    batches: u64,
    write_time: Duration,
}

/// First error wins; recording it cancels the run.
#[derive(Clone)]
struct FailureSlot {
    first: Arc<Mutex<Option<TransferError>>>,
    token: CancellationToken,
}

impl FailureSlot {
    fn new(token: CancellationToken) -> Self {
        Self {
            first: Arc::new(Mutex::new(None)),
            token,
        }
    }

    fn record(&self, err: TransferError) {
        if let Ok(mut slot) = self.first.lock() {
            if slot.is_none() {
                *slot = Some(err);
            } else {
                debug!("Suppressed follow-on error: {}", err);
            }
        }
        self.token.cancel();
    }

    fn take(&self) -> Option<TransferError> {
        self.first.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Moves one table's rows from a ranked source to an insert sink.
pub struct TransferEngine<S, D> {
    source: Arc<S>,
    destination: Arc<D>,
    mapper: TypeMapper,
    options: TransferOptions,
    cancel: CancellationToken,
}

impl<S, D> TransferEngine<S, D>
where
    S: RankedSource + 'static,
    D: SinkProvider + 'static,
{
    pub fn new(source: Arc<S>, destination: Arc<D>, options: TransferOptions) -> Self {
        Self {
            source,
            destination,
            mapper: TypeMapper::default(),
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Use a type table other than the built-in one.
    pub fn with_type_mapper(mut self, mapper: TypeMapper) -> Self {
        self.mapper = mapper;
        self
    }

    /// Stop the run when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    /// Transfer every row of `source_table` into `destination_table`.
    pub async fn run(
        &self,
        source_table: &TableDescriptor,
        destination_table: &TableDescriptor,
    ) -> Result<TransferReport> {
        self.options.validate()?;
        source_table.validate()?;
        destination_table.validate()?;

        let started = Instant::now();
        info!(
            "Starting transfer {} -> {} (window: {}, batch: {}, readers: {}, writers: {})",
            source_table,
            destination_table,
            self.options.window_size,
            self.options.batch_size,
            self.options.parallel_readers,
            self.options.parallel_writers,
        );

        let column_map = introspect(self.source.as_ref(), source_table, &self.mapper).await?;
        let destination_map =
            introspect(self.destination.as_ref(), destination_table, &self.mapper).await?;
        for column in column_map.columns() {
            if destination_map.get(&column).is_none() {
                warn!(
                    "{}: column {} is not in {}; the insert will likely fail",
                    source_table, column, destination_table
                );
            }
        }

        let order_by = self.rank_order(source_table, &column_map).await?;
        let request = SnapshotRequest {
            table: source_table.clone(),
            columns: column_map.columns(),
            order_by,
        };
        let snapshot = Arc::new(self.source.snapshot(&request).await?);
        let total = snapshot.row_count();
        info!("{}: snapshot holds {} rows", source_table, total);

        let outcome = self
            .pump(
                Arc::clone(&snapshot),
                source_table,
                destination_table,
                column_map,
            )
            .await;

        if let Err(e) = snapshot.release().await {
            warn!("{}: failed to release snapshot: {}", source_table, e);
        }

        let (rows, mut stats) = outcome?;
        stats.elapsed = started.elapsed();

        if rows as i64 != total {
            return Err(TransferError::transfer(
                source_table.full_name(),
                format!(
                    "wrote {} rows but the snapshot held {}",
                    rows, total
                ),
            ));
        }

        let report = TransferReport {
            source_table: source_table.full_name(),
            destination_table: destination_table.full_name(),
            result: TransferResult {
                rows_transferred: total,
            },
            stats,
        };

        info!(
            "{} -> {}: transferred {} rows in {:?} ({} rows/sec, read: {:?}, write: {:?}, coercion fallbacks: {})",
            source_table,
            destination_table,
            report.result.rows_transferred,
            report.stats.elapsed,
            report.rows_per_second(),
            report.stats.read_time,
            report.stats.write_time,
            report.stats.coercion_failures.len()
        );

        Ok(report)
    }

    /// Configured order, else the primary key, else none.
    async fn rank_order(
        &self,
        table: &TableDescriptor,
        column_map: &ColumnTypeMap,
    ) -> Result<Vec<String>> {
        if !self.options.order_by.is_empty() {
            if let Some(missing) = self
                .options
                .order_by
                .iter()
                .find(|c| column_map.get(c).is_none())
            {
                return Err(TransferError::Config(format!(
                    "order_by column '{}' is not a column of {}",
                    missing, table
                )));
            }
            return Ok(self.options.order_by.clone());
        }

        let key = self.source.primary_key(table).await?;
        if key.is_empty() {
            warn!(
                "{}: no order_by and no primary key; rows are ranked in arbitrary order \
                 (consistent within this run only)",
                table
            );
        } else {
            debug!("{}: ranking by primary key {:?}", table, key);
        }
        Ok(key)
    }

    async fn pump(
        &self,
        snapshot: Arc<S::Snapshot>,
        source_table: &TableDescriptor,
        destination_table: &TableDescriptor,
        column_map: ColumnTypeMap,
    ) -> Result<(u64, TransferStats)> {
        let token = self.cancel.child_token();
        let failures = FailureSlot::new(token.clone());

        let mut reader = PaginatedReader::new(
            snapshot,
            source_table.clone(),
            Arc::new(column_map),
            self.options.window_size,
        )?;
        if let Some(limit) = self.options.fetch_timeout {
            reader = reader.with_fetch_timeout(limit);
        }

        let mut writer = BatchedWriter::new(self.options.batch_size)?;
        if let Some(limit) = self.options.write_timeout {
            writer = writer.with_submit_timeout(limit);
        }

        let (tx, rx) = async_channel::bounded::<RecordBatch>(self.options.read_ahead);

        let reader_handles: Vec<JoinHandle<ReaderTally>> = (0..self.options.parallel_readers)
            .map(|reader_id| {
                let reader = reader.fork();
                let tx = tx.clone();
                let token = token.clone();
                let failures = failures.clone();
                let string_columns = self.options.string_columns.clone();

                tokio::spawn(async move {
                    let mut tally = ReaderTally::default();
                    loop {
                        let next = tokio::select! {
                            _ = token.cancelled() => break,
                            next = reader.next_window() => next,
                        };
                        let mut fetched = match next {
                            Ok(Some(fetched)) => fetched,
                            Ok(None) => break,
                            Err(e) => {
                                failures.record(e);
                                break;
                            }
                        };

                        tally.windows += 1;
                        tally.read_time += fetched.fetch_time;
                        tally.failures.append(&mut fetched.failures);

                        if let Err(e) =
                            normalize_strings(&mut fetched.batch, string_columns.as_deref())
                        {
                            failures.record(e);
                            break;
                        }

                        let sent = tokio::select! {
                            _ = token.cancelled() => break,
                            sent = tx.send(fetched.batch) => sent,
                        };
                        if sent.is_err() {
                            break;
                        }
                    }
                    debug!("Reader {}: done after {} windows", reader_id, tally.windows);
                    tally
                })
            })
            .collect();
        drop(tx);

        let writer_handles: Vec<JoinHandle<WriterTally>> = (0..self.options.parallel_writers)
            .map(|writer_id| {
                let rx = rx.clone();
                let token = token.clone();
                let failures = failures.clone();
                let writer = writer.clone();
                let destination = Arc::clone(&self.destination);
                let table = destination_table.clone();

                tokio::spawn(async move {
                    let mut tally = WriterTally::default();
                    loop {
                        let batch = tokio::select! {
                            _ = token.cancelled() => break,
                            received = rx.recv() => match received {
                                Ok(batch) => batch,
                                Err(_) => break,
                            },
                        };

                        let window = batch.window;
                        let batches = batch.len().div_ceil(writer.batch_size()) as u64;
                        let started = Instant::now();
                        match writer.write(destination.as_ref(), &table, [batch]).await {
                            Ok(rows) => {
                                tally.rows += rows;
                                tally.batches += batches;
                                tally.write_time += started.elapsed();
                                debug!(
                                    "Writer {}: window {} committed ({} rows, total {})",
                                    writer_id, window, rows, tally.rows
                                );
                            }
                            Err(e) => {
                                failures.record(e);
                                break;
                            }
                        }
                    }
                    tally
                })
            })
            .collect();
        drop(rx);

        let mut stats = TransferStats::default();
        let mut rows = 0u64;

        for joined in join_all(reader_handles).await {
            match joined {
                Ok(tally) => {
                    stats.windows += tally.windows;
                    stats.read_time += tally.read_time;
                    stats.coercion_failures.extend(tally.failures);
                }
                Err(e) => failures.record(TransferError::transfer(
                    source_table.full_name(),
                    format!("reader task panicked: {}", e),
                )),
            }
        }

        for joined in join_all(writer_handles).await {
            match joined {
                Ok(tally) => {
                    rows += tally.rows;
                    stats.batches += tally.batches;
                    stats.write_time += tally.write_time;
                }
                Err(e) => failures.record(TransferError::transfer(
                    destination_table.full_name(),
                    format!("writer task panicked: {}", e),
                )),
            }
        }

        if let Some(err) = failures.take() {
            return Err(err);
        }
        if self.cancel.is_cancelled() {
            warn!(
                "{} -> {}: cancelled after {} rows",
                source_table, destination_table, rows
            );
            return Err(TransferError::Cancelled);
        }

        stats.coercion_failures.sort_by_key(|f| f.window.start);
        Ok((rows, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::SemanticType;
    use crate::core::value::{Cell, SqlValue};
    use crate::testing::{MemoryDestination, MemorySource};

    fn people() -> TableDescriptor {
        TableDescriptor::new("dbo", "people")
    }

    fn people_source() -> MemorySource {
        MemorySource::new().with_table(
            &people(),
            &[("id", "int"), ("name", "nvarchar")],
            vec![
                vec![SqlValue::I32(1), SqlValue::from("  Bob  ")],
                vec![SqlValue::I32(2), SqlValue::from("")],
                vec![SqlValue::I32(3), SqlValue::from("Ann")],
            ],
        )
    }

    fn people_destination() -> MemoryDestination {
        MemoryDestination::new().with_table(&people(), &[("id", "int"), ("name", "nvarchar")])
    }

    fn options(window_size: usize, batch_size: usize) -> TransferOptions {
        TransferOptions {
            window_size,
            batch_size,
            parallel_readers: 1,
            parallel_writers: 1,
            read_ahead: 2,
            ..TransferOptions::default()
        }
    }

    fn committed_sorted(dest: &MemoryDestination) -> Vec<Vec<Cell>> {
        let mut rows = dest.log().committed;
        rows.sort_by_key(|r| match r[0] {
            Cell::Int64(v) => v,
            _ => i64::MAX,
        });
        rows
    }

    #[tokio::test]
    async fn test_trims_and_nulls_end_to_end() {
        let source = Arc::new(people_source());
        let dest = Arc::new(people_destination());
        let engine = TransferEngine::new(Arc::clone(&source), Arc::clone(&dest), options(2, 10));

        let report = engine.run(&people(), &people()).await.unwrap();

        assert_eq!(report.result.rows_transferred, 3);
        assert_eq!(report.stats.windows, 2);
        assert_eq!(source.snapshots_taken(), 1);
        assert!(source.snapshot_released());

        let rows = committed_sorted(&dest);
        assert_eq!(
            rows,
            vec![
                vec![Cell::Int64(1), Cell::Text("Bob".into())],
                vec![Cell::Int64(2), Cell::Null],
                vec![Cell::Int64(3), Cell::Text("Ann".into())],
            ]
        );
        // one commit per window
        assert_eq!(dest.log().commits, 2);
    }

    #[tokio::test]
    async fn test_money_text_becomes_float() {
        let prices = TableDescriptor::new("dbo", "prices");
        let source = Arc::new(MemorySource::new().with_table(
            &prices,
            &[("sku", "varchar"), ("price", "money")],
            vec![vec![SqlValue::from("A-1"), SqlValue::from("19.99")]],
        ));
        let dest = Arc::new(
            MemoryDestination::new().with_table(&prices, &[("sku", "varchar"), ("price", "money")]),
        );
        let engine = TransferEngine::new(source, Arc::clone(&dest), options(10, 10));

        let report = engine.run(&prices, &prices).await.unwrap();

        assert_eq!(report.result.rows_transferred, 1);
        assert!(report.stats.coercion_failures.is_empty());
        assert_eq!(dest.log().committed[0][1], Cell::Float64(19.99));
    }

    #[tokio::test]
    async fn test_coercion_failure_is_reported_not_fatal() {
        let stock = TableDescriptor::new("dbo", "stock");
        let source = Arc::new(MemorySource::new().with_table(
            &stock,
            &[("id", "int"), ("qty", "int")],
            vec![
                vec![SqlValue::I32(1), SqlValue::from("12")],
                vec![SqlValue::I32(2), SqlValue::from("a dozen")],
            ],
        ));
        let dest = Arc::new(MemoryDestination::new().with_table(&stock, &[("id", "int"), ("qty", "int")]));
        let engine = TransferEngine::new(source, Arc::clone(&dest), options(10, 10));

        let report = engine.run(&stock, &stock).await.unwrap();

        assert_eq!(report.result.rows_transferred, 2);
        assert_eq!(report.stats.coercion_failures.len(), 1);
        assert_eq!(report.stats.coercion_failures[0].column, "qty");
        assert_eq!(
            report.stats.coercion_failures[0].declared,
            SemanticType::NullableInt64
        );
        assert_eq!(dest.log().committed[1][1], Cell::Text("a dozen".into()));
    }

    #[tokio::test]
    async fn test_missing_source_table() {
        let engine = TransferEngine::new(
            Arc::new(MemorySource::new()),
            Arc::new(people_destination()),
            options(10, 10),
        );
        let err = engine.run(&people(), &people()).await.unwrap_err();
        assert!(matches!(err, TransferError::SchemaNotFound { .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_missing_destination_table() {
        let source = Arc::new(people_source());
        let engine = TransferEngine::new(
            Arc::clone(&source),
            Arc::new(MemoryDestination::new()),
            options(10, 10),
        );
        let err = engine.run(&people(), &people()).await.unwrap_err();
        assert!(matches!(err, TransferError::SchemaNotFound { .. }));
        assert_eq!(source.snapshots_taken(), 0);
    }

    #[tokio::test]
    async fn test_empty_table() {
        let empty = TableDescriptor::new("dbo", "empty");
        let source = Arc::new(MemorySource::new().with_table(&empty, &[("id", "int")], vec![]));
        let dest = Arc::new(MemoryDestination::new().with_table(&empty, &[("id", "int")]));
        let engine = TransferEngine::new(source, Arc::clone(&dest), options(10, 10));

        let report = engine.run(&empty, &empty).await.unwrap();
        assert_eq!(report.result.rows_transferred, 0);
        assert_eq!(dest.log().acquired, 0);
    }

    #[tokio::test]
    async fn test_parallel_pipeline_moves_every_row_once() {
        let big = TableDescriptor::new("dbo", "big");
        let rows: Vec<Vec<SqlValue>> = (1..=1000)
            .map(|i| vec![SqlValue::I64(i), SqlValue::from(format!(" v{} ", i))])
            .collect();
        let source = Arc::new(
            MemorySource::new()
                .with_table(&big, &[("id", "bigint"), ("v", "varchar")], rows)
                .with_primary_key(&big, &["id"]),
        );
        let dest = Arc::new(MemoryDestination::new().with_table(&big, &[("id", "bigint"), ("v", "varchar")]));
        let engine = TransferEngine::new(
            Arc::clone(&source),
            Arc::clone(&dest),
            TransferOptions {
                window_size: 37,
                batch_size: 10,
                parallel_readers: 4,
                parallel_writers: 3,
                read_ahead: 2,
                ..TransferOptions::default()
            },
        );

        let report = engine.run(&big, &big).await.unwrap();
        assert_eq!(report.result.rows_transferred, 1000);
        assert_eq!(report.stats.windows, 28);
        assert_eq!(
            source.last_request().unwrap().order_by,
            vec!["id".to_string()]
        );

        let committed = committed_sorted(&dest);
        assert_eq!(committed.len(), 1000);
        for (i, row) in committed.iter().enumerate() {
            let id = i as i64 + 1;
            assert_eq!(row[0], Cell::Int64(id));
            assert_eq!(row[1], Cell::Text(format!("v{}", id)));
        }
    }

    #[tokio::test]
    async fn test_order_by_must_name_a_column() {
        let engine = TransferEngine::new(
            Arc::new(people_source()),
            Arc::new(people_destination()),
            TransferOptions {
                order_by: vec!["missing".into()],
                ..options(10, 10)
            },
        );
        let err = engine.run(&people(), &people()).await.unwrap_err();
        assert!(matches!(err, TransferError::Config(_)));
    }

    #[tokio::test]
    async fn test_writer_failure_stops_readers() {
        let rows: Vec<Vec<SqlValue>> = (1..=50)
            .map(|i| vec![SqlValue::I32(i), SqlValue::from("x")])
            .collect();
        let source = Arc::new(
            MemorySource::new()
                .with_table(&people(), &[("id", "int"), ("name", "nvarchar")], rows)
                .with_fetch_delay(Duration::from_millis(5)),
        );
        let dest = Arc::new(people_destination().fail_on_submit(2));
        let engine = TransferEngine::new(Arc::clone(&source), Arc::clone(&dest), options(5, 5));

        let err = engine.run(&people(), &people()).await.unwrap_err();

        assert!(matches!(err, TransferError::ConnectionFailure { .. }));
        assert!(source.snapshot_released());
        // the first window was committed before the failure
        assert_eq!(dest.log().committed.len(), 5);
        assert!(dest.log().submits < 10);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_surfaced() {
        let source = Arc::new(people_source().fail_on_window(3));
        let dest = Arc::new(people_destination());
        let engine = TransferEngine::new(Arc::clone(&source), dest, options(2, 10));

        let err = engine.run(&people(), &people()).await.unwrap_err();
        assert!(matches!(err, TransferError::ConnectionFailure { .. }));
        assert!(source.snapshot_released());
    }

    #[tokio::test]
    async fn test_write_timeout() {
        let source = Arc::new(people_source());
        let dest = Arc::new(people_destination().with_submit_delay(Duration::from_millis(200)));
        let engine = TransferEngine::new(
            source,
            dest,
            TransferOptions {
                write_timeout: Some(Duration::from_millis(10)),
                ..options(10, 10)
            },
        );

        let err = engine.run(&people(), &people()).await.unwrap_err();
        match err {
            TransferError::ConnectionFailure { message, .. } => {
                assert!(message.contains("Timed out"))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_external_cancellation() {
        let source = Arc::new(people_source().with_fetch_delay(Duration::from_millis(500)));
        let token = CancellationToken::new();
        let engine = TransferEngine::new(Arc::clone(&source), Arc::new(people_destination()), options(1, 1))
            .with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let err = engine.run(&people(), &people()).await.unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, TransferError::Cancelled));
        assert!(source.snapshot_released());
    }

    #[tokio::test]
    async fn test_explicit_string_columns() {
        let source = Arc::new(people_source());
        let dest = Arc::new(people_destination());
        let engine = TransferEngine::new(
            source,
            Arc::clone(&dest),
            TransferOptions {
                string_columns: Some(vec!["id".into()]),
                ..options(10, 10)
            },
        );

        engine.run(&people(), &people()).await.unwrap();
        let rows = committed_sorted(&dest);
        assert_eq!(rows[0][1], Cell::Text("  Bob  ".into()));
        assert_eq!(rows[1][1], Cell::Text("".into()));
    }

    #[test]
    fn test_zero_options_rejected() {
        let opts = TransferOptions {
            parallel_writers: 0,
            ..TransferOptions::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_report_serializes_rows_transferred() {
        let report = TransferReport {
            source_table: "dbo.a".into(),
            destination_table: "dbo.b".into(),
            result: TransferResult {
                rows_transferred: 3,
            },
            stats: TransferStats::default(),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["rows_transferred"], 3);
        assert_eq!(json["stats"]["windows"], 0);
    }
}
