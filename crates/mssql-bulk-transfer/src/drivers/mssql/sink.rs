//! Transactional insert sessions.
//!
//! Each session runs one explicit transaction. Every submitted batch is
//! bracketed by a savepoint so a failing batch can be undone on its own while
//! the batches before it stay pending for the caller to commit.
//!
//! Batches go through a TDS bulk load when the destination's columns line up
//! with the batch and every type has a direct encoding. Everything else, and
//! any row whose values need SQL Server's own conversion, is written with
//! parameterized multi-row INSERT statements.

use async_trait::async_trait;
use bb8::PooledConnection;
use tiberius::{Query, ToSql, TokenRow};
use tracing::{debug, info};

use super::connection::TiberiusConnectionManager;
use super::convert::{cell_to_column_data, cell_to_param, BulkKind};
use super::MssqlPool;
use crate::core::schema::TableDescriptor;
use crate::core::traits::{InsertSink, SinkProvider};
use crate::core::value::Cell;
use crate::error::{Result, TransferError};
use crate::writer::InsertStatement;

const LAYOUT_QUERY: &str = r#"
    SELECT c.name, TYPE_NAME(c.system_type_id), c.max_length, c.scale,
           c.is_identity, c.is_computed
    FROM sys.columns c
    WHERE c.object_id = OBJECT_ID(@P1)
    ORDER BY c.column_id
"#;

#[async_trait]
impl SinkProvider for MssqlPool {
    type Sink = MssqlSink;

    async fn acquire(&self) -> Result<MssqlSink> {
        let conn = self.get_owned().await?;
        Ok(MssqlSink {
            conn,
            savepoints: 0,
            open: false,
            plan: None,
        })
    }
}

/// A destination column as `sys.columns` describes it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DestinationColumn {
    name: String,
    type_name: String,
    max_length: i16,
    scale: u8,
    is_identity: bool,
    is_computed: bool,
}

/// How one session loads rows into one destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LoadPlan {
    /// Per-column bulk encodings; `None` when every row needs INSERT.
    bulk: Option<Vec<BulkKind>>,

    /// Explicit values go into an IDENTITY column.
    identity_insert: bool,
}

impl LoadPlan {
    fn new(columns: &[String], destination: &[DestinationColumn]) -> Self {
        let identity_insert = destination
            .iter()
            .any(|d| d.is_identity && columns.iter().any(|c| c.eq_ignore_ascii_case(&d.name)));

        // A bulk load sends every destination column in order, and cannot keep
        // identity values.
        let same_layout = destination.len() == columns.len()
            && destination
                .iter()
                .zip(columns)
                .all(|(d, c)| d.name.eq_ignore_ascii_case(c) && !d.is_computed);

        let bulk = if identity_insert || !same_layout {
            None
        } else {
            destination
                .iter()
                .map(|d| BulkKind::classify(&d.type_name, d.max_length, d.scale))
                .collect()
        };

        Self {
            bulk,
            identity_insert,
        }
    }
}

/// Encode a row for bulk load, or `None` if any value needs conversion.
fn encode_row(row: &[Cell], kinds: &[BulkKind]) -> Option<TokenRow<'static>> {
    let mut token_row = TokenRow::new();
    for (cell, kind) in row.iter().zip(kinds) {
        token_row.push(cell_to_column_data(cell, *kind)?);
    }
    Some(token_row)
}

fn identity_wrapped(sql: String, table: &str, identity_insert: bool) -> String {
    if identity_insert {
        format!(
            "SET IDENTITY_INSERT {t} ON; {sql}; SET IDENTITY_INSERT {t} OFF;",
            t = table,
            sql = sql
        )
    } else {
        sql
    }
}

/// One pooled connection holding an explicit transaction.
pub struct MssqlSink {
    conn: PooledConnection<'static, TiberiusConnectionManager>,
    savepoints: usize,
    open: bool,
    plan: Option<(TableDescriptor, LoadPlan)>,
}

impl MssqlSink {
    /// Run a parameterless command as a plain SQL batch.
    async fn command(&mut self, sql: &str, context: &str) -> Result<()> {
        self.conn
            .simple_query(sql)
            .await
            .map_err(|e| TransferError::connection(context, e))?
            .into_results()
            .await
            .map_err(|e| TransferError::connection(context, e))?;
        Ok(())
    }

    async fn destination_columns(&mut self, table: &TableDescriptor) -> Result<Vec<DestinationColumn>> {
        let quoted = table.quoted()?;
        let mut query = Query::new(LAYOUT_QUERY);
        query.bind(quoted.as_str());

        let context = || format!("reading column layout of {}", table);
        let rows = query
            .query(&mut *self.conn)
            .await
            .map_err(|e| TransferError::connection(context(), e))?
            .into_first_result()
            .await
            .map_err(|e| TransferError::connection(context(), e))?;

        Ok(rows
            .iter()
            .map(|row| DestinationColumn {
                name: row.get::<&str, _>(0).unwrap_or_default().to_string(),
                type_name: row.get::<&str, _>(1).unwrap_or_default().to_string(),
                max_length: row.get::<i16, _>(2).unwrap_or(0),
                scale: row.get::<u8, _>(3).unwrap_or(0),
                is_identity: row.get::<bool, _>(4).unwrap_or(false),
                is_computed: row.get::<bool, _>(5).unwrap_or(false),
            })
            .collect())
    }

    async fn plan_for(&mut self, statement: &InsertStatement) -> Result<LoadPlan> {
        if let Some((table, plan)) = &self.plan {
            if table == statement.table() {
                return Ok(plan.clone());
            }
        }

        let destination = self.destination_columns(statement.table()).await?;
        let plan = LoadPlan::new(statement.columns(), &destination);
        info!(
            "{}: loading with {}{}",
            statement.table(),
            if plan.bulk.is_some() { "bulk insert" } else { "INSERT statements" },
            if plan.identity_insert { " (IDENTITY_INSERT on)" } else { "" }
        );
        self.plan = Some((statement.table().clone(), plan.clone()));
        Ok(plan)
    }

    async fn bulk_load(&mut self, table: &TableDescriptor, rows: Vec<TokenRow<'static>>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let qualified = table.quoted()?;
        let failed = |stage: &str, e: tiberius::error::Error| {
            TransferError::transfer(table.full_name(), format!("bulk insert {}: {}", stage, e))
        };

        let mut load = self
            .conn
            .bulk_insert(&qualified)
            .await
            .map_err(|e| failed("init", e))?;
        for row in rows {
            load.send(row).await.map_err(|e| failed("send", e))?;
        }
        load.finalize().await.map_err(|e| failed("finalize", e))?;
        Ok(())
    }

    async fn insert(
        &mut self,
        statement: &InsertStatement,
        rows: &[Vec<Cell>],
        identity_insert: bool,
    ) -> Result<()> {
        let table = statement.table().quoted()?;
        for chunk in rows.chunks(statement.rows_per_statement()) {
            let sql = identity_wrapped(statement.sql(chunk.len()), &table, identity_insert);
            let params: Vec<Box<dyn ToSql>> = chunk
                .iter()
                .flat_map(|row| row.iter().map(cell_to_param))
                .collect();
            let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

            self.conn
                .execute(sql.as_str(), &param_refs)
                .await
                .map_err(|e| {
                    TransferError::transfer(statement.table().full_name(), format!("batched INSERT: {}", e))
                })?;
        }
        Ok(())
    }
}

#[async_trait]
impl InsertSink for MssqlSink {
    async fn begin(&mut self) -> Result<()> {
        self.command("BEGIN TRANSACTION", "begin transaction").await?;
        self.open = true;
        self.savepoints = 0;
        Ok(())
    }

    async fn submit(&mut self, statement: &InsertStatement, rows: &[Vec<Cell>]) -> Result<()> {
        // Count first so rollback_batch never targets an earlier batch's savepoint.
        self.savepoints += 1;
        let savepoint = format!("SAVE TRANSACTION [batch_{}]", self.savepoints);
        self.command(&savepoint, "savepoint").await?;

        let plan = self.plan_for(statement).await?;

        let Some(kinds) = plan.bulk else {
            return self.insert(statement, rows, plan.identity_insert).await;
        };

        let mut bulk_rows = Vec::with_capacity(rows.len());
        let mut converted_rows = Vec::new();
        for row in rows {
            match encode_row(row, &kinds) {
                Some(token_row) => bulk_rows.push(token_row),
                None => converted_rows.push(row.clone()),
            }
        }

        self.bulk_load(statement.table(), bulk_rows).await?;
        if !converted_rows.is_empty() {
            debug!(
                "{}: falling back to INSERT for {} rows needing conversion",
                statement.table(),
                converted_rows.len()
            );
            self.insert(statement, &converted_rows, false).await?;
        }
        Ok(())
    }

    async fn rollback_batch(&mut self) -> Result<()> {
        if !self.open || self.savepoints == 0 {
            return Ok(());
        }
        // A doomed transaction cannot return to a savepoint; report it so the
        // caller commits nothing.
        let undo = format!(
            "IF XACT_STATE() = 1 ROLLBACK TRANSACTION [batch_{}] \
             ELSE RAISERROR('transaction can no longer be committed', 16, 1);",
            self.savepoints
        );
        self.command(&undo, "rollback to savepoint").await
    }

    async fn commit(&mut self) -> Result<()> {
        self.command("COMMIT TRANSACTION", "commit").await?;
        self.open = false;
        debug!("Committed after {} batches", self.savepoints);
        Ok(())
    }

    async fn release(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.command(
            "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION",
            "rollback on release",
        )
        .await
    }
}
