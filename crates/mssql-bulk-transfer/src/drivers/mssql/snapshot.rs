//! Ranked snapshots materialized into a global temporary table.
//!
//! `SELECT ROW_NUMBER() OVER (...) ... INTO ##table` runs once; the rank column
//! gets a unique clustered index so each window is a range seek. The session
//! that created the table is held until [`RankedSnapshot::release`], since a
//! global temporary table lives only as long as its creating session. Windows
//! are read on other pooled connections.

use async_trait::async_trait;
use bb8::PooledConnection;
use tiberius::Query;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::connection::TiberiusConnectionManager;
use super::convert::column_to_value;
use super::MssqlPool;
use crate::core::identifier::{quote_column_list, quote_mssql};
use crate::core::schema::{RowWindow, TableDescriptor};
use crate::core::traits::{RankedSnapshot, RankedSource, RawWindow, SnapshotRequest};
use crate::core::value::SqlValue;
use crate::error::{Result, TransferError};

/// Name of the rank column added to the snapshot table.
pub const RANK_COLUMN: &str = "__transfer_rn";

/// Build the statements that materialize and index a snapshot.
fn materialize_sql(request: &SnapshotRequest, snapshot_table: &str) -> Result<String> {
    let order = if request.order_by.is_empty() {
        "(SELECT NULL)".to_string()
    } else {
        quote_column_list(&request.order_by)?
    };
    let rank = quote_mssql(RANK_COLUMN)?;
    let index = quote_mssql(&format!("ix_{}", snapshot_table.trim_start_matches('#')))?;
    let table = quote_mssql(snapshot_table)?;

    Ok(format!(
        "SELECT ROW_NUMBER() OVER (ORDER BY {order}) AS {rank}, {columns} \
         INTO {table} FROM {source}; \
         CREATE UNIQUE CLUSTERED INDEX {index} ON {table} ({rank});",
        order = order,
        rank = rank,
        columns = quote_column_list(&request.columns)?,
        table = table,
        source = request.table.quoted()?,
        index = index,
    ))
}

fn drop_sql(snapshot_table: &str) -> Result<String> {
    Ok(format!(
        "IF OBJECT_ID('tempdb..{name}') IS NOT NULL DROP TABLE {quoted}",
        name = snapshot_table,
        quoted = quote_mssql(snapshot_table)?
    ))
}

/// The snapshot's COUNT_BIG result; a missing or NULL count is an error.
fn counted_rows(table: &TableDescriptor, snapshot_table: &str, count: Option<i64>) -> Result<i64> {
    count.ok_or_else(|| {
        TransferError::transfer(
            table.full_name(),
            format!("COUNT_BIG over snapshot {} returned no value", snapshot_table),
        )
    })
}

fn window_sql(columns: &[String], snapshot_table: &str) -> Result<String> {
    let rank = quote_mssql(RANK_COLUMN)?;
    Ok(format!(
        "SELECT {rank}, {columns} FROM {table} WHERE {rank} BETWEEN @P1 AND @P2 ORDER BY {rank}",
        rank = rank,
        columns = quote_column_list(columns)?,
        table = quote_mssql(snapshot_table)?,
    ))
}

#[async_trait]
impl RankedSource for MssqlPool {
    type Snapshot = MssqlSnapshot;

    async fn snapshot(&self, request: &SnapshotRequest) -> Result<MssqlSnapshot> {
        if request.columns.iter().any(|c| c == RANK_COLUMN) {
            return Err(TransferError::transfer(
                request.table.full_name(),
                format!("source column name {} is reserved for ranking", RANK_COLUMN),
            ));
        }

        let snapshot_table = format!("##bulk_transfer_{}", Uuid::new_v4().simple());
        let sql = materialize_sql(request, &snapshot_table)?;
        let context = format!("materializing snapshot of {}", request.table);

        let mut owner = self.get_owned().await?;
        owner
            .execute(sql.as_str(), &[])
            .await
            .map_err(|e| TransferError::connection(context.clone(), e))?;

        let count_sql = format!("SELECT COUNT_BIG(*) FROM {}", quote_mssql(&snapshot_table)?);
        let row = owner
            .simple_query(count_sql)
            .await
            .map_err(|e| TransferError::connection(context.clone(), e))?
            .into_row()
            .await
            .map_err(|e| TransferError::connection(context.clone(), e))?;
        let row_count = match counted_rows(
            &request.table,
            &snapshot_table,
            row.and_then(|r| r.get::<i64, _>(0)),
        ) {
            Ok(n) => n,
            Err(e) => {
                let cleanup = drop_sql(&snapshot_table)?;
                if let Err(drop_err) = owner.execute(cleanup.as_str(), &[]).await {
                    warn!("{}: could not drop snapshot {}: {}", request.table, snapshot_table, drop_err);
                }
                return Err(e);
            }
        };

        info!(
            "{}: materialized {} ranked rows into {} (order: {})",
            request.table,
            row_count,
            snapshot_table,
            if request.order_by.is_empty() {
                "unordered".to_string()
            } else {
                request.order_by.join(", ")
            }
        );

        Ok(MssqlSnapshot {
            pool: self.clone(),
            table: request.table.clone(),
            window_sql: window_sql(&request.columns, &snapshot_table)?,
            snapshot_table,
            row_count,
            owner: Mutex::new(Some(owner)),
        })
    }
}

/// A materialized, ranked copy of a source table.
pub struct MssqlSnapshot {
    pool: MssqlPool,
    table: TableDescriptor,
    snapshot_table: String,
    window_sql: String,
    row_count: i64,
    owner: Mutex<Option<PooledConnection<'static, TiberiusConnectionManager>>>,
}

impl MssqlSnapshot {
    pub fn snapshot_table(&self) -> &str {
        &self.snapshot_table
    }
}

#[async_trait]
impl RankedSnapshot for MssqlSnapshot {
    fn row_count(&self) -> i64 {
        self.row_count
    }

    async fn fetch_window(&self, window: RowWindow) -> Result<RawWindow> {
        let context = || format!("fetching window {} of {}", window, self.table);
        let mut conn = self.pool.get().await?;

        let mut query = Query::new(self.window_sql.as_str());
        query.bind(window.start);
        query.bind(window.end);

        let rows = query
            .query(&mut *conn)
            .await
            .map_err(|e| TransferError::connection(context(), e))?
            .into_first_result()
            .await
            .map_err(|e| TransferError::connection(context(), e))?;

        let mut raw = RawWindow {
            ranks: Vec::with_capacity(rows.len()),
            rows: Vec::with_capacity(rows.len()),
        };
        for row in rows {
            let mut cells = row.into_iter();
            let rank = match cells.next().map(column_to_value).transpose() {
                Ok(Some(SqlValue::I64(rank))) => rank,
                Ok(other) => {
                    return Err(TransferError::transfer(
                        self.table.full_name(),
                        format!("unexpected rank value {:?} in window {}", other, window),
                    ))
                }
                Err(e) => return Err(TransferError::connection(context(), e)),
            };
            let values = cells
                .map(column_to_value)
                .collect::<tiberius::Result<Vec<_>>>()
                .map_err(|e| TransferError::connection(context(), e))?;

            raw.ranks.push(rank);
            raw.rows.push(values);
        }

        debug!("{}: window {} returned {} rows", self.table, window, raw.rows.len());
        Ok(raw)
    }

    async fn release(&self) -> Result<()> {
        let mut owner = self.owner.lock().await;
        let Some(mut conn) = owner.take() else {
            return Ok(());
        };

        let sql = drop_sql(&self.snapshot_table)?;
        match conn.execute(sql.as_str(), &[]).await {
            Ok(_) => {
                debug!("{}: dropped snapshot {}", self.table, self.snapshot_table);
                Ok(())
            }
            Err(e) => {
                warn!(
                    "{}: could not drop snapshot {}: {}",
                    self.table, self.snapshot_table, e
                );
                Err(TransferError::connection(
                    format!("dropping snapshot of {}", self.table),
                    e,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(order_by: &[&str]) -> SnapshotRequest {
        SnapshotRequest {
            table: TableDescriptor::new("sales", "orders"),
            columns: vec!["id".to_string(), "note".to_string()],
            order_by: order_by.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn test_materialize_sql_orders_by_key() {
        let sql = materialize_sql(&request(&["id"]), "##bulk_transfer_abc").unwrap();
        assert!(sql.starts_with(
            "SELECT ROW_NUMBER() OVER (ORDER BY [id]) AS [__transfer_rn], [id], [note] \
             INTO [##bulk_transfer_abc] FROM [sales].[orders];"
        ));
        assert!(sql.contains(
            "CREATE UNIQUE CLUSTERED INDEX [ix_bulk_transfer_abc] ON [##bulk_transfer_abc] ([__transfer_rn])"
        ));
    }

    #[test]
    fn test_materialize_sql_without_key() {
        let sql = materialize_sql(&request(&[]), "##t").unwrap();
        assert!(sql.contains("ORDER BY (SELECT NULL)"));
    }

    #[test]
    fn test_missing_count_is_an_error() {
        let table = TableDescriptor::new("sales", "orders");
        assert_eq!(counted_rows(&table, "##t", Some(42)).unwrap(), 42);
        assert_eq!(counted_rows(&table, "##t", Some(0)).unwrap(), 0);

        let err = counted_rows(&table, "##t", None).unwrap_err();
        assert!(matches!(err, TransferError::Transfer { .. }));
        assert!(err.to_string().contains("COUNT_BIG"));
    }

    #[test]
    fn test_drop_sql() {
        assert_eq!(
            drop_sql("##bulk_transfer_abc").unwrap(),
            "IF OBJECT_ID('tempdb..##bulk_transfer_abc') IS NOT NULL DROP TABLE [##bulk_transfer_abc]"
        );
    }

    #[test]
    fn test_window_sql() {
        let sql = window_sql(&["id".to_string()], "##t").unwrap();
        assert_eq!(
            sql,
            "SELECT [__transfer_rn], [id] FROM [##t] WHERE [__transfer_rn] BETWEEN @P1 AND @P2 \
             ORDER BY [__transfer_rn]"
        );
    }
}
