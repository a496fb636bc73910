//! Driver-side bookkeeping for results.
//!
//! `ResultSet` is the in-memory cursor behind a buffered result handle and
//! `PendingResults` is the per-connection queue walked by `more_results` /
//! `next_result` after a multi-query. Both are public so third-party drivers
//! can reuse them.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{DbiError, Result};
use crate::types::{FetchMode, FieldMeta, Row, SqlValue};

/// Rows of one statement held in memory, with a read cursor.
#[derive(Debug, Clone)]
pub struct ResultSet {
    fields: Vec<FieldMeta>,
    columns: Arc<[String]>,
    rows: Vec<Vec<SqlValue>>,
    cursor: usize,
    exhausted: bool,
    buffered: bool,
}

impl ResultSet {
    /// Creates a buffered result set. Field lengths are widened to fit the rows.
    pub fn new(mut fields: Vec<FieldMeta>, rows: Vec<Vec<SqlValue>>) -> Self {
        for row in &rows {
            for (field, value) in fields.iter_mut().zip(row) {
                field.length = field.length.max(value.display_len());
            }
        }
        let columns = fields.iter().map(|f| f.name.clone()).collect();
        Self {
            fields,
            columns,
            rows,
            cursor: 0,
            exhausted: false,
            buffered: true,
        }
    }

    /// Creates a result set from bare column names, inferring each field's
    /// type from its first non-null value.
    pub fn from_columns(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        let fields = columns
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let type_name = rows
                    .iter()
                    .filter_map(|row| row.get(i))
                    .find(|v| !v.is_null())
                    .map_or("text", SqlValue::type_name);
                FieldMeta::new(name, type_name)
            })
            .collect();
        Self::new(fields, rows)
    }

    /// A result with no columns, as produced by statements that return no rows.
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Marks the set as streamed: seeking is refused and `num_rows` only
    /// counts rows fetched so far.
    pub fn unbuffered(mut self) -> Self {
        self.buffered = false;
        self
    }

    /// Materializes a streamed set. Rows already fetched are dropped, so the
    /// buffered set holds only what the stream had left.
    pub fn make_buffered(&mut self) {
        if self.buffered {
            return;
        }
        self.rows.drain(..self.cursor);
        self.cursor = 0;
        if !self.rows.is_empty() {
            self.exhausted = false;
        }
        self.buffered = true;
    }

    pub fn is_buffered(&self) -> bool {
        self.buffered
    }

    /// Returns the next row, or `None` once the rows are used up.
    /// End-of-data is sticky until the cursor is moved with `seek`.
    pub fn fetch(&mut self, mode: FetchMode) -> Option<Row> {
        if self.exhausted {
            return None;
        }
        match self.rows.get(self.cursor) {
            Some(values) => {
                self.cursor += 1;
                Some(Row::new(Arc::clone(&self.columns), values.clone(), mode))
            }
            None => {
                self.exhausted = true;
                None
            }
        }
    }

    /// Moves the cursor to `offset` (zero based).
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        if !self.buffered {
            return Err(DbiError::NotBuffered);
        }
        let rows = self.rows.len() as u64;
        if offset >= rows {
            return Err(DbiError::SeekOutOfRange { offset, rows });
        }
        self.cursor = offset as usize;
        self.exhausted = false;
        Ok(())
    }

    pub fn num_rows(&self) -> u64 {
        if self.buffered {
            self.rows.len() as u64
        } else {
            self.cursor as u64
        }
    }

    pub fn fields(&self) -> &[FieldMeta] {
        &self.fields
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }
}

/// What one statement of a batch produced.
#[derive(Debug, Clone)]
pub struct StatementOutcome {
    /// `None` for statements without a result set (INSERT, SET, ...).
    pub result: Option<ResultSet>,
    pub affected_rows: u64,
}

/// Outcomes of a multi-query that the caller has not yet walked through.
#[derive(Debug, Default)]
pub struct PendingResults {
    current: Option<StatementOutcome>,
    queued: VecDeque<StatementOutcome>,
}

impl PendingResults {
    /// Replaces any leftover outcomes with a new batch and makes the first
    /// one current. Returns the current statement's affected row count.
    pub fn load(&mut self, outcomes: impl IntoIterator<Item = StatementOutcome>) -> u64 {
        self.queued = outcomes.into_iter().collect();
        self.current = self.queued.pop_front();
        self.current.as_ref().map_or(0, |o| o.affected_rows)
    }

    pub fn clear(&mut self) {
        self.current = None;
        self.queued.clear();
    }

    /// Whether the batch has a current outcome, stored or not.
    pub fn has_current(&self) -> bool {
        self.current.is_some()
    }

    pub fn has_more(&self) -> bool {
        !self.queued.is_empty()
    }

    /// Advances to the next outcome. Returns its affected row count, or
    /// `None` when the batch is finished.
    pub fn advance(&mut self) -> Option<u64> {
        self.current = self.queued.pop_front();
        self.current.as_ref().map(|o| o.affected_rows)
    }

    /// Takes the current statement's result set, leaving nothing to store.
    pub fn take_current(&mut self) -> Option<ResultSet> {
        self.current.as_mut().and_then(|o| o.result.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: i64) -> ResultSet {
        ResultSet::from_columns(
            vec!["id".to_string()],
            (1..=n).map(|i| vec![SqlValue::Int64(i)]).collect(),
        )
    }

    #[test]
    fn test_fetch_reports_end_of_data_and_stays_there() {
        let mut set = ids(2);

        assert!(set.fetch(FetchMode::Num).is_some());
        assert!(set.fetch(FetchMode::Num).is_some());
        assert!(set.fetch(FetchMode::Num).is_none());
        assert!(set.fetch(FetchMode::Num).is_none());
        assert_eq!(set.num_rows(), 2);
    }

    #[test]
    fn test_seek_repositions_buffered_cursor() {
        let mut set = ids(3);
        while set.fetch(FetchMode::Num).is_some() {}

        set.seek(1).unwrap();
        let row = set.fetch(FetchMode::Num).unwrap();
        assert_eq!(row.get_index(0).unwrap(), &SqlValue::Int64(2));
    }

    #[test]
    fn test_seek_out_of_range() {
        let mut set = ids(3);
        assert!(matches!(
            set.seek(3),
            Err(DbiError::SeekOutOfRange { offset: 3, rows: 3 })
        ));
    }

    #[test]
    fn test_unbuffered_counts_fetched_rows_and_refuses_seek() {
        let mut set = ids(3).unbuffered();
        assert_eq!(set.num_rows(), 0);

        set.fetch(FetchMode::Assoc);
        assert_eq!(set.num_rows(), 1);
        assert!(matches!(set.seek(0), Err(DbiError::NotBuffered)));

        set.make_buffered();
        assert_eq!(set.num_rows(), 2);
        set.seek(0).unwrap();
        let row = set.fetch(FetchMode::Num).unwrap();
        assert_eq!(row.get_index(0).unwrap(), &SqlValue::Int64(2));
    }

    #[test]
    fn test_buffering_a_finished_stream_stays_at_end_of_data() {
        let mut set = ids(1).unbuffered();
        assert!(set.fetch(FetchMode::Num).is_some());
        assert!(set.fetch(FetchMode::Num).is_none());

        set.make_buffered();
        assert_eq!(set.num_rows(), 0);
        assert!(set.fetch(FetchMode::Num).is_none());
    }

    #[test]
    fn test_field_metadata_inferred_from_values() {
        let set = ResultSet::from_columns(
            vec!["name".to_string(), "score".to_string()],
            vec![
                vec![SqlValue::from("Al"), SqlValue::Null],
                vec![SqlValue::from("Beatrice"), SqlValue::Float64(1.5)],
            ],
        );

        let fields = set.fields();
        assert_eq!(fields[0].type_name, "text");
        assert_eq!(fields[0].length, 8);
        assert_eq!(fields[1].type_name, "float8");
        assert_eq!(fields[1].length, 3);
    }

    #[test]
    fn test_pending_results_walk() {
        let mut pending = PendingResults::default();
        let affected = pending.load(vec![
            StatementOutcome {
                result: None,
                affected_rows: 4,
            },
            StatementOutcome {
                result: Some(ids(2)),
                affected_rows: 2,
            },
        ]);

        assert_eq!(affected, 4);
        assert!(pending.take_current().is_none());
        assert!(pending.has_more());

        assert_eq!(pending.advance(), Some(2));
        assert!(!pending.has_more());
        assert_eq!(pending.take_current().unwrap().num_rows(), 2);
        assert!(pending.take_current().is_none());

        assert_eq!(pending.advance(), None);
        assert!(!pending.has_current());
    }

    #[test]
    fn test_empty_batch_has_no_current_outcome() {
        let mut pending = PendingResults::default();
        assert_eq!(pending.load(Vec::new()), 0);
        assert!(!pending.has_current());
        assert!(!pending.has_more());
    }
}
