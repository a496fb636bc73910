use std::sync::Arc;

use crate::error::{DbiError, Result};
use crate::types::SqlValue;

/// Shape of a fetched row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Values addressed by column name.
    Assoc,
    /// Values addressed by position.
    Num,
    /// Values addressed by name or position.
    #[default]
    Both,
}

impl FetchMode {
    fn by_name(self) -> bool {
        matches!(self, FetchMode::Assoc | FetchMode::Both)
    }

    fn by_index(self) -> bool {
        matches!(self, FetchMode::Num | FetchMode::Both)
    }
}

/// A single row fetched from a result.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
    mode: FetchMode,
}

impl Row {
    /// Creates a new Row from column names and values in column order.
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>, mode: FetchMode) -> Self {
        Self {
            columns,
            values,
            mode,
        }
    }

    /// Gets a value by column name.
    /// When several columns share the name, the last one wins.
    pub fn get(&self, column: &str) -> Result<&SqlValue> {
        if !self.mode.by_name() {
            return Err(DbiError::ColumnNotFound(column.to_string()));
        }
        self.columns
            .iter()
            .rposition(|c| c == column)
            .and_then(|i| self.values.get(i))
            .ok_or_else(|| DbiError::ColumnNotFound(column.to_string()))
    }

    /// Gets a value by position.
    pub fn get_index(&self, index: usize) -> Result<&SqlValue> {
        if !self.mode.by_index() {
            return Err(DbiError::ColumnIndexOutOfRange(index));
        }
        self.values
            .get(index)
            .ok_or(DbiError::ColumnIndexOutOfRange(index))
    }

    pub fn mode(&self) -> FetchMode {
        self.mode
    }

    /// Returns all column names in this row.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the values in column order.
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }

    /// Returns the number of columns in this row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if this row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A fully drained query result, containing zero or more rows.
#[derive(Debug, Default)]
pub struct QueryResult {
    columns: Vec<String>,
    rows: Vec<Row>,
    affected_rows: u64,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Row>, affected_rows: u64) -> Self {
        Self {
            columns,
            rows,
            affected_rows,
        }
    }

    /// Extracts a single row from the result.
    /// Returns an error if the result contains zero or more than one row.
    pub fn single_row(self) -> Result<Row> {
        let actual = self.rows.len();
        let mut rows = self.rows.into_iter();
        match (rows.next(), rows.next()) {
            (Some(row), None) => Ok(row),
            _ => Err(DbiError::UnexpectedRowCount {
                expected: 1,
                actual,
            }),
        }
    }

    /// Returns all rows from the result.
    pub fn rows(self) -> Vec<Row> {
        self.rows
    }

    /// Returns a reference to the rows without consuming the result.
    pub fn rows_ref(&self) -> &[Row] {
        &self.rows
    }

    /// Returns the column names from this result.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows changed by the statement, or rows returned for a SELECT.
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    /// Returns the number of rows in this result.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if this result contains no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
