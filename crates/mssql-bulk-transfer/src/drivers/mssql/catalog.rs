//! INFORMATION_SCHEMA lookups.

use async_trait::async_trait;
use tiberius::Query;
use tracing::debug;

use super::MssqlPool;
use crate::core::schema::{CatalogColumn, TableDescriptor};
use crate::core::traits::CatalogReader;
use crate::error::{Result, TransferError};

const COLUMNS_QUERY: &str = r#"
    SELECT COLUMN_NAME, DATA_TYPE, ORDINAL_POSITION
    FROM INFORMATION_SCHEMA.COLUMNS
    WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2
    ORDER BY ORDINAL_POSITION
"#;

const PRIMARY_KEY_QUERY: &str = r#"
    SELECT c.COLUMN_NAME
    FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
    JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE c
        ON c.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
        AND c.TABLE_SCHEMA = tc.TABLE_SCHEMA
        AND c.TABLE_NAME = tc.TABLE_NAME
    WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
      AND tc.TABLE_SCHEMA = @P1
      AND tc.TABLE_NAME = @P2
    ORDER BY c.ORDINAL_POSITION
"#;

#[async_trait]
impl CatalogReader for MssqlPool {
    async fn columns(&self, table: &TableDescriptor) -> Result<Vec<CatalogColumn>> {
        table.validate()?;
        let mut conn = self.get().await?;

        let mut query = Query::new(COLUMNS_QUERY);
        query.bind(table.schema.as_str());
        query.bind(table.name.as_str());

        let context = || format!("reading columns of {} ({})", table, self.role());
        let rows = query
            .query(&mut *conn)
            .await
            .map_err(|e| TransferError::connection(context(), e))?
            .into_first_result()
            .await
            .map_err(|e| TransferError::connection(context(), e))?;

        let columns: Vec<CatalogColumn> = rows
            .iter()
            .map(|row| CatalogColumn {
                name: row.get::<&str, _>(0).unwrap_or_default().to_string(),
                declared_type: row.get::<&str, _>(1).unwrap_or_default().to_string(),
                ordinal: row.get::<i32, _>(2).unwrap_or(0),
            })
            .collect();

        debug!("Loaded {} columns for {}", columns.len(), table);
        Ok(columns)
    }

    async fn primary_key(&self, table: &TableDescriptor) -> Result<Vec<String>> {
        table.validate()?;
        let mut conn = self.get().await?;

        let mut query = Query::new(PRIMARY_KEY_QUERY);
        query.bind(table.schema.as_str());
        query.bind(table.name.as_str());

        let context = || format!("reading primary key of {} ({})", table, self.role());
        let rows = query
            .query(&mut *conn)
            .await
            .map_err(|e| TransferError::connection(context(), e))?
            .into_first_result()
            .await
            .map_err(|e| TransferError::connection(context(), e))?;

        let key: Vec<String> = rows
            .iter()
            .filter_map(|row| row.get::<&str, _>(0).map(str::to_string))
            .collect();

        debug!("Primary key for {}: {:?}", table, key);
        Ok(key)
    }
}
