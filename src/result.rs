//! Query results: column metadata and raw row storage with typed access.

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid};
use crate::wire::{FromWire, decode_nullable};

/// Metadata for one result column.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub type_oid: Oid,
    pub format: FormatCode,
}

/// The accumulated result of one query execution.
///
/// Rows hold the raw wire bytes per cell (`None` for SQL NULL); decoding is
/// deferred to [`get`](QueryResult::get), which uses the column's format.
#[derive(Debug, Default)]
pub struct QueryResult {
    columns: Vec<Column>,
    rows: Vec<Vec<Option<Vec<u8>>>>,
    rows_affected: Option<u64>,
    complete: bool,
}

impl QueryResult {
    pub(crate) fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            ..Self::default()
        }
    }

    pub(crate) fn push_row(&mut self, row: Vec<Option<Vec<u8>>>) {
        self.rows.push(row);
    }

    pub(crate) fn finish(&mut self, rows_affected: Option<u64>) {
        self.rows_affected = rows_affected;
        self.complete = true;
    }

    /// Decode the cell at (`row`, `col`).
    ///
    /// NULL decodes to `None` for any `T`. A present TEXT cell that fails to
    /// parse as `T` also yields `None`; a present BINARY cell that fails to
    /// decode is an error.
    pub fn get<'a, T: FromWire<'a>>(&'a self, row: usize, col: usize) -> Result<Option<T>> {
        let column = self.columns.get(col).ok_or_else(|| {
            Error::InvalidUsage(format!(
                "column index {} out of range ({} columns)",
                col,
                self.columns.len()
            ))
        })?;
        let cell = self
            .rows
            .get(row)
            .and_then(|r| r.get(col))
            .ok_or_else(|| {
                Error::InvalidUsage(format!(
                    "row index {} out of range ({} rows)",
                    row,
                    self.rows.len()
                ))
            })?;
        decode_nullable(column.format, cell.as_deref())
    }

    /// Number of rows returned.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Rows affected, when the completion tag reported a count.
    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }

    /// Whether the execution ran to completion (CommandComplete was seen).
    pub fn is_complete(&self) -> bool {
        self.complete
    }
}
