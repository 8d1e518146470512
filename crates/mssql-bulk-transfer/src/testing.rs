//! In-memory catalog, snapshot and sink doubles for pipeline tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::core::schema::{CatalogColumn, RowWindow, TableDescriptor};
use crate::core::traits::{
    CatalogReader, InsertSink, RankedSnapshot, RankedSource, RawWindow, SinkProvider,
    SnapshotRequest,
};
use crate::core::value::{Cell, SqlValue};
use crate::error::{Result, TransferError};
use crate::writer::InsertStatement;

fn catalog_columns(columns: &[(&str, &str)]) -> Vec<CatalogColumn> {
    columns
        .iter()
        .enumerate()
        .map(|(i, (name, ty))| CatalogColumn {
            name: name.to_string(),
            declared_type: ty.to_string(),
            ordinal: i as i32 + 1,
        })
        .collect()
}

/// A ranked row set held in memory.
pub struct MemorySnapshot {
    rows: Vec<Vec<SqlValue>>,
    fetch_delay: Option<Duration>,
    fail_on_window: Option<i64>,
    fetched: Mutex<Vec<RowWindow>>,
    released: Arc<AtomicBool>,
}

impl MemorySnapshot {
    pub fn new(rows: Vec<Vec<SqlValue>>) -> Self {
        Self {
            rows,
            fetch_delay: None,
            fail_on_window: None,
            fetched: Mutex::new(Vec::new()),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub fn fetched(&self) -> Vec<RowWindow> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl RankedSnapshot for MemorySnapshot {
    fn row_count(&self) -> i64 {
        self.rows.len() as i64
    }

    async fn fetch_window(&self, window: RowWindow) -> Result<RawWindow> {
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_on_window == Some(window.start) {
            return Err(TransferError::connection(
                format!("fetch window {}", window),
                "connection reset by peer",
            ));
        }
        self.fetched.lock().unwrap().push(window);

        let mut raw = RawWindow::default();
        for rank in window.start..=window.end {
            if let Some(row) = self.rows.get((rank - 1) as usize) {
                raw.ranks.push(rank);
                raw.rows.push(row.clone());
            }
        }
        Ok(raw)
    }

    async fn release(&self) -> Result<()> {
        self.released.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryTable {
    columns: Vec<CatalogColumn>,
    primary_key: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
}

/// Source tables held in memory, snapshot in insertion order.
#[derive(Default)]
pub struct MemorySource {
    tables: HashMap<TableDescriptor, MemoryTable>,
    fail_on_window: Option<i64>,
    fetch_delay: Option<Duration>,
    snapshots: AtomicUsize,
    released: Arc<AtomicBool>,
    last_request: Mutex<Option<SnapshotRequest>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(
        mut self,
        table: &TableDescriptor,
        columns: &[(&str, &str)],
        rows: Vec<Vec<SqlValue>>,
    ) -> Self {
        self.tables.insert(
            table.clone(),
            MemoryTable {
                columns: catalog_columns(columns),
                primary_key: Vec::new(),
                rows,
            },
        );
        self
    }

    pub fn with_primary_key(mut self, table: &TableDescriptor, key: &[&str]) -> Self {
        if let Some(t) = self.tables.get_mut(table) {
            t.primary_key = key.iter().map(|k| k.to_string()).collect();
        }
        self
    }

    pub fn fail_on_window(mut self, start: i64) -> Self {
        self.fail_on_window = Some(start);
        self
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub fn snapshots_taken(&self) -> usize {
        self.snapshots.load(Ordering::SeqCst)
    }

    pub fn snapshot_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<SnapshotRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl CatalogReader for MemorySource {
    async fn columns(&self, table: &TableDescriptor) -> Result<Vec<CatalogColumn>> {
        Ok(self
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    async fn primary_key(&self, table: &TableDescriptor) -> Result<Vec<String>> {
        Ok(self
            .tables
            .get(table)
            .map(|t| t.primary_key.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl RankedSource for MemorySource {
    type Snapshot = MemorySnapshot;

    async fn snapshot(&self, request: &SnapshotRequest) -> Result<MemorySnapshot> {
        let table = self.tables.get(&request.table).ok_or_else(|| {
            TransferError::SchemaNotFound {
                schema: request.table.schema.clone(),
                table: request.table.name.clone(),
            }
        })?;
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());

        let positions: Vec<usize> = request
            .columns
            .iter()
            .map(|c| {
                table.columns.iter().position(|tc| &tc.name == c).ok_or_else(|| {
                    TransferError::transfer(request.table.full_name(), format!("no column {}", c))
                })
            })
            .collect::<Result<_>>()?;

        let rows = table
            .rows
            .iter()
            .map(|row| positions.iter().map(|&p| row[p].clone()).collect())
            .collect();

        let mut snapshot = MemorySnapshot::new(rows);
        snapshot.fail_on_window = self.fail_on_window;
        snapshot.fetch_delay = self.fetch_delay;
        snapshot.released = Arc::clone(&self.released);
        Ok(snapshot)
    }
}

/// What the destination saw, across all sessions.
#[derive(Debug, Clone, Default)]
pub struct SinkLog {
    pub acquired: usize,
    pub released: usize,
    pub submits: usize,
    pub rollbacks: usize,
    pub commits: usize,
    pub statements: Vec<String>,
    pub committed: Vec<Vec<Cell>>,
}

/// Destination tables held in memory.
#[derive(Default)]
pub struct MemoryDestination {
    tables: HashMap<TableDescriptor, Vec<CatalogColumn>>,
    fail_on_submit: Option<usize>,
    stall_on_submit: Option<usize>,
    fail_rollback: bool,
    chunk_rows: Option<usize>,
    submit_delay: Option<Duration>,
    log: Arc<Mutex<SinkLog>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: &TableDescriptor, columns: &[(&str, &str)]) -> Self {
        self.tables.insert(table.clone(), catalog_columns(columns));
        self
    }

    /// Fail the n-th submission (1-based, counted across sessions).
    pub fn fail_on_submit(mut self, n: usize) -> Self {
        self.fail_on_submit = Some(n);
        self
    }

    /// Hang the n-th submission (1-based) after its first chunk is applied.
    pub fn stall_on_submit(mut self, n: usize) -> Self {
        self.stall_on_submit = Some(n);
        self
    }

    /// Apply each submission in chunks of `rows`, like multi-statement batches.
    pub fn with_chunk_rows(mut self, rows: usize) -> Self {
        self.chunk_rows = Some(rows);
        self
    }

    pub fn fail_rollback(mut self) -> Self {
        self.fail_rollback = true;
        self
    }

    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = Some(delay);
        self
    }

    pub fn log(&self) -> SinkLog {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl CatalogReader for MemoryDestination {
    async fn columns(&self, table: &TableDescriptor) -> Result<Vec<CatalogColumn>> {
        Ok(self.tables.get(table).cloned().unwrap_or_default())
    }

    async fn primary_key(&self, _table: &TableDescriptor) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl SinkProvider for MemoryDestination {
    type Sink = MemorySink;

    async fn acquire(&self) -> Result<MemorySink> {
        self.log.lock().unwrap().acquired += 1;
        Ok(MemorySink {
            log: Arc::clone(&self.log),
            fail_on_submit: self.fail_on_submit,
            stall_on_submit: self.stall_on_submit,
            fail_rollback: self.fail_rollback,
            chunk_rows: self.chunk_rows,
            submit_delay: self.submit_delay,
            pending: Vec::new(),
            savepoint: 0,
        })
    }
}

pub struct MemorySink {
    log: Arc<Mutex<SinkLog>>,
    fail_on_submit: Option<usize>,
    stall_on_submit: Option<usize>,
    fail_rollback: bool,
    chunk_rows: Option<usize>,
    submit_delay: Option<Duration>,
    pending: Vec<Vec<Cell>>,
    savepoint: usize,
}

#[async_trait]
impl InsertSink for MemorySink {
    async fn begin(&mut self) -> Result<()> {
        self.pending.clear();
        self.savepoint = 0;
        Ok(())
    }

    async fn submit(&mut self, statement: &InsertStatement, rows: &[Vec<Cell>]) -> Result<()> {
        if let Some(delay) = self.submit_delay {
            tokio::time::sleep(delay).await;
        }
        let n = {
            let mut log = self.log.lock().unwrap();
            log.submits += 1;
            log.statements.push(statement.sql(rows.len()));
            log.submits
        };
        self.savepoint = self.pending.len();
        if self.fail_on_submit == Some(n) {
            return Err(TransferError::connection(
                format!("submit {}", n),
                "broken pipe",
            ));
        }
        let chunk = self.chunk_rows.unwrap_or(rows.len()).max(1);
        for (i, part) in rows.chunks(chunk).enumerate() {
            if i > 0 && self.stall_on_submit == Some(n) {
                std::future::pending::<()>().await;
            }
            self.pending.extend_from_slice(part);
        }
        Ok(())
    }

    async fn rollback_batch(&mut self) -> Result<()> {
        self.log.lock().unwrap().rollbacks += 1;
        if self.fail_rollback {
            return Err(TransferError::connection("rollback", "connection is busy"));
        }
        self.pending.truncate(self.savepoint);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        log.commits += 1;
        log.committed.append(&mut self.pending);
        Ok(())
    }

    async fn release(&mut self) -> Result<()> {
        self.pending.clear();
        self.log.lock().unwrap().released += 1;
        Ok(())
    }
}
