//! Windowed extraction over a ranked snapshot.
//!
//! A [`WindowPlan`] hands out contiguous `[start, end]` rank ranges until the
//! snapshot's row count (read once, when the snapshot was taken) is covered.
//! A [`PaginatedReader`] pulls windows from a shared plan, fetches each from
//! the snapshot, checks the ranks that came back, and coerces the rows.
//!
//! Readers forked from the same reader share one plan, so parallel readers
//! never fetch the same window twice. The plan is consumed as it goes and a
//! reader cannot be rewound.

mod coerce;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::stream::{self, Stream};
use tracing::{debug, warn};

pub use coerce::{coerce_value, coerce_window, CoercionFailure};

use crate::core::schema::{ColumnTypeMap, RowWindow, TableDescriptor};
use crate::core::traits::{RankedSnapshot, RawWindow};
use crate::core::value::RecordBatch;
use crate::error::{Result, TransferError};

/// Issues contiguous, non-overlapping windows covering `[1, total]`.
#[derive(Debug, Clone)]
pub struct WindowPlan {
    total: i64,
    window_size: i64,
    next_start: i64,
}

impl WindowPlan {
    pub fn new(total: i64, window_size: usize) -> Result<Self> {
        if window_size == 0 {
            return Err(TransferError::Config(
                "window_size must be at least 1".to_string(),
            ));
        }
        if total < 0 {
            return Err(TransferError::Config(format!(
                "row count cannot be negative (got {})",
                total
            )));
        }
        Ok(Self {
            total,
            window_size: i64::try_from(window_size).unwrap_or(i64::MAX),
            next_start: 1,
        })
    }

    pub fn total(&self) -> i64 {
        self.total
    }

    /// Windows not yet issued.
    pub fn remaining(&self) -> i64 {
        if self.next_start > self.total {
            0
        } else {
            let rows = self.total - self.next_start + 1;
            (rows + self.window_size - 1) / self.window_size
        }
    }
}

impl Iterator for WindowPlan {
    type Item = RowWindow;

    fn next(&mut self) -> Option<RowWindow> {
        if self.next_start > self.total {
            return None;
        }
        let start = self.next_start;
        let end = start.saturating_add(self.window_size - 1).min(self.total);
        self.next_start = end + 1;
        Some(RowWindow::new(start, end))
    }
}

/// A coerced window plus the columns that had to fall back.
#[derive(Debug, Clone)]
pub struct FetchedWindow {
    pub batch: RecordBatch,
    pub failures: Vec<CoercionFailure>,
    pub fetch_time: Duration,
}

/// Fetches and coerces windows from a ranked snapshot.
pub struct PaginatedReader<S> {
    snapshot: Arc<S>,
    table: TableDescriptor,
    column_map: Arc<ColumnTypeMap>,
    plan: Arc<Mutex<WindowPlan>>,
    fetch_timeout: Option<Duration>,
}

impl<S: RankedSnapshot> PaginatedReader<S> {
    pub fn new(
        snapshot: Arc<S>,
        table: TableDescriptor,
        column_map: Arc<ColumnTypeMap>,
        window_size: usize,
    ) -> Result<Self> {
        let plan = WindowPlan::new(snapshot.row_count(), window_size)?;
        Ok(Self {
            snapshot,
            table,
            column_map,
            plan: Arc::new(Mutex::new(plan)),
            fetch_timeout: None,
        })
    }

    /// Bound each window fetch.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// Another reader drawing from the same plan.
    pub fn fork(&self) -> Self {
        Self {
            snapshot: Arc::clone(&self.snapshot),
            table: self.table.clone(),
            column_map: Arc::clone(&self.column_map),
            plan: Arc::clone(&self.plan),
            fetch_timeout: self.fetch_timeout,
        }
    }

    /// Row count of the snapshot.
    pub fn total_rows(&self) -> i64 {
        self.snapshot.row_count()
    }

    fn claim_window(&self) -> Result<Option<RowWindow>> {
        let mut plan = self
            .plan
            .lock()
            .map_err(|_| TransferError::transfer(self.table.full_name(), "window plan poisoned"))?;
        Ok(plan.next())
    }

    /// Fetch the next unclaimed window, or `None` when the table is covered.
    pub async fn next_window(&self) -> Result<Option<FetchedWindow>> {
        let window = match self.claim_window()? {
            Some(w) => w,
            None => return Ok(None),
        };

        let started = Instant::now();
        let raw = match self.fetch_timeout {
            Some(limit) => tokio::time::timeout(limit, self.snapshot.fetch_window(window))
                .await
                .map_err(|_| TransferError::Timeout {
                    operation: format!("fetch window {} of {}", window, self.table),
                    limit,
                })??,
            None => self.snapshot.fetch_window(window).await?,
        };
        let fetch_time = started.elapsed();

        verify_window(&self.table, window, &raw)?;

        let (batch, failures) =
            coerce_window(&self.table.full_name(), &self.column_map, window, raw)?;

        for failure in &failures {
            warn!(
                "{}: column {} window {} could not be read as {} ({} values, e.g. {:?}); kept as raw-string",
                self.table,
                failure.column,
                failure.window,
                failure.declared,
                failure.failed_values,
                failure.sample
            );
        }

        debug!(
            "{}: fetched window {} ({} rows in {:?})",
            self.table,
            window,
            batch.len(),
            fetch_time
        );

        Ok(Some(FetchedWindow {
            batch,
            failures,
            fetch_time,
        }))
    }

    /// Consume the reader as a stream of windows.
    pub fn into_stream(self) -> impl Stream<Item = Result<FetchedWindow>>
    where
        S: 'static,
    {
        stream::try_unfold(self, |reader| async move {
            let next = reader.next_window().await?;
            Ok::<_, TransferError>(next.map(|window| (window, reader)))
        })
    }
}

/// Check a fetch returned exactly the ranks `[start, end]`, in order.
pub fn verify_window(table: &TableDescriptor, window: RowWindow, raw: &RawWindow) -> Result<()> {
    if raw.ranks.len() != raw.rows.len() {
        return Err(TransferError::transfer(
            table.full_name(),
            format!(
                "window {} returned {} ranks for {} rows",
                window,
                raw.ranks.len(),
                raw.rows.len()
            ),
        ));
    }

    let expected = window.len();
    if raw.ranks.len() as i64 != expected {
        return Err(TransferError::transfer(
            table.full_name(),
            format!(
                "window {} returned {} rows, expected {}",
                window,
                raw.ranks.len(),
                expected
            ),
        ));
    }

    for (offset, rank) in raw.ranks.iter().enumerate() {
        let want = window.start + offset as i64;
        if *rank != want {
            return Err(TransferError::transfer(
                table.full_name(),
                format!("window {} has rank {} where {} was expected", window, rank, want),
            ));
        }
    }

    Ok(())
}
