//! Whitespace trimming and empty-string nulling for text columns.

use crate::core::value::{Cell, RecordBatch};
use crate::error::{Result, TransferError};

/// Trim text cells and turn empty strings into nulls.
///
/// With `columns == None` every string-like column of the batch is processed.
/// An explicit subset may name any column; only text cells are touched.
/// Returns the number of cells changed. Applying it twice changes nothing the
/// second time.
pub fn normalize_strings(batch: &mut RecordBatch, columns: Option<&[String]>) -> Result<usize> {
    let targets: Vec<usize> = match columns {
        Some(names) => names
            .iter()
            .map(|name| {
                batch.column_index(name).ok_or_else(|| {
                    TransferError::Config(format!(
                        "string column '{}' is not part of the batch (columns: {})",
                        name,
                        batch.columns.join(", ")
                    ))
                })
            })
            .collect::<Result<_>>()?,
        None => batch
            .column_types
            .iter()
            .enumerate()
            .filter(|(_, ty)| ty.is_string_like())
            .map(|(idx, _)| idx)
            .collect(),
    };

    if targets.is_empty() {
        return Ok(0);
    }

    let mut changed = 0;
    for row in &mut batch.rows {
        for &idx in &targets {
            if let Some(cell) = row.get_mut(idx) {
                if normalize_cell(cell) {
                    changed += 1;
                }
            }
        }
    }
    Ok(changed)
}

fn normalize_cell(cell: &mut Cell) -> bool {
    let Cell::Text(text) = cell else {
        return false;
    };

    let trimmed = text.trim();
    if trimmed.is_empty() {
        *cell = Cell::Null;
        true
    } else if trimmed.len() != text.len() {
        *text = trimmed.to_string();
        true
    } else {
        false
    }
}
