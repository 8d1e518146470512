//! Schema introspection: catalog columns to a [`ColumnTypeMap`].

use tracing::debug;

use crate::core::schema::{ColumnTypeMap, TableDescriptor};
use crate::core::traits::CatalogReader;
use crate::error::{Result, TransferError};
use crate::typemap::TypeMapper;

/// Build the column type map for `table`, ordered by physical position.
///
/// Fails with [`TransferError::SchemaNotFound`] when the catalog reports no
/// columns for the table.
pub async fn introspect<C>(
    catalog: &C,
    table: &TableDescriptor,
    mapper: &TypeMapper,
) -> Result<ColumnTypeMap>
where
    C: CatalogReader + ?Sized,
{
    let mut columns = catalog.columns(table).await?;
    if columns.is_empty() {
        return Err(TransferError::SchemaNotFound {
            schema: table.schema.clone(),
            table: table.name.clone(),
        });
    }
    columns.sort_by_key(|c| c.ordinal);

    let entries = columns
        .into_iter()
        .map(|c| {
            let semantic = mapper.map(&c.declared_type);
            if !mapper.is_known(&c.declared_type) {
                debug!(
                    "{}: column {} has unlisted type '{}', treating as {}",
                    table, c.name, c.declared_type, semantic
                );
            }
            (c.name, semantic)
        })
        .collect();

    let map = ColumnTypeMap::new(entries)?;
    debug!("{}: introspected {} columns", table, map.len());
    Ok(map)
}
