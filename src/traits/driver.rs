use async_trait::async_trait;

use crate::config::ConnectionConfig;
use crate::error::{DbiError, Result};
use crate::types::{
    ConnectionHandle, FetchMode, FieldMeta, QueryMode, ResultHandle, Row, SqlValue,
    StatementHandle,
};

/// Trait for database driver implementations.
///
/// A driver owns every session, result and statement it hands out; callers
/// only hold opaque handles. Drivers are responsible for:
/// - Opening sessions and switching the active database
/// - Executing single statements, batches and prepared statements
/// - Delivering rows in the requested shape and reporting end-of-data
/// - Reporting metadata and the last error of each session
///
/// Failures are always reported through `Result`. Operations on a handle
/// whose connection was closed, or on a freed result, fail with the
/// matching `Invalid*` error.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Open a session using the given credentials and server settings.
    async fn connect(&self, config: &ConnectionConfig) -> Result<ConnectionHandle>;

    /// Make `database` the active database of the session. Drivers that must
    /// reconnect to switch databases invalidate the session's prepared
    /// statements and unbuffered results.
    async fn select_db(&self, conn: &ConnectionHandle, database: &str) -> Result<()>;

    /// Close the session. Results and statements issued over it become invalid.
    async fn close(&self, conn: ConnectionHandle) -> Result<()>;

    /// Execute a single statement. Statements without a result set yield a
    /// handle with zero fields.
    async fn real_query(
        &self,
        conn: &ConnectionHandle,
        sql: &str,
        mode: QueryMode,
    ) -> Result<ResultHandle>;

    /// Execute a batch of statements. The first statement's outcome becomes
    /// current; walk the rest with `more_results` / `next_result`.
    async fn real_multi_query(&self, conn: &ConnectionHandle, sql: &str) -> Result<()>;

    /// Whether the current batch has outcomes after the current one.
    fn more_results(&self, conn: &ConnectionHandle) -> Result<bool>;

    /// Whether the batch is positioned on an outcome. False for a batch with
    /// no statements and after `next_result` has walked past the last one.
    fn has_result(&self, conn: &ConnectionHandle) -> Result<bool>;

    /// Advance to the next outcome of the batch. Returns false when the batch
    /// is finished.
    async fn next_result(&self, conn: &ConnectionHandle) -> Result<bool>;

    /// Buffer the current batch outcome's rows into a result handle.
    /// Returns `None` when the current statement produced no result set.
    async fn store_result(&self, conn: &ConnectionHandle) -> Result<Option<ResultHandle>>;

    /// Read the remaining rows of an unbuffered result into memory so it can
    /// be counted and seeked. No-op for buffered results.
    async fn buffer_result(&self, result: &mut ResultHandle) -> Result<()>;

    /// Fetch the next row, or `None` at end-of-data.
    async fn fetch(&self, result: &mut ResultHandle, mode: FetchMode) -> Result<Option<Row>>;

    /// Move a buffered result's cursor to the zero-based row `offset`.
    async fn data_seek(&self, result: &mut ResultHandle, offset: u64) -> Result<()>;

    /// Release the result. The handle cannot be used afterwards.
    async fn free_result(&self, result: ResultHandle) -> Result<()>;

    /// Rows in a buffered result, or rows fetched so far when unbuffered.
    async fn num_rows(&self, result: &ResultHandle) -> Result<u64>;

    async fn num_fields(&self, result: &ResultHandle) -> Result<usize>;

    async fn fields_meta(&self, result: &ResultHandle) -> Result<Vec<FieldMeta>>;

    /// Rows changed by the last statement on the session. For a buffered
    /// SELECT this is the number of rows returned.
    fn affected_rows(&self, conn: &ConnectionHandle) -> Result<u64>;

    fn server_version(&self, conn: &ConnectionHandle) -> Result<String>;

    fn protocol_version(&self, conn: &ConnectionHandle) -> Result<u32>;

    /// Description of the host the session is connected to.
    fn host_info(&self, conn: &ConnectionHandle) -> Result<String>;

    /// Name and version of the client library behind the driver.
    fn client_info(&self) -> String;

    /// Escape `value` for use inside a quoted string literal.
    fn escape_string(&self, conn: &ConnectionHandle, value: &str) -> Result<String>;

    /// Prepare a parameterized statement for later execution.
    async fn prepare(&self, conn: &ConnectionHandle, sql: &str) -> Result<StatementHandle>;

    async fn execute_prepared(
        &self,
        stmt: &StatementHandle,
        params: &[SqlValue],
        mode: QueryMode,
    ) -> Result<ResultHandle>;

    async fn close_statement(&self, stmt: StatementHandle) -> Result<()>;

    /// Message of the last failed operation on the session, or `None` if the
    /// most recent operation succeeded.
    fn last_error(&self, conn: &ConnectionHandle) -> Option<String>;

    /// Execute a buffered query.
    async fn query(&self, conn: &ConnectionHandle, sql: &str) -> Result<ResultHandle> {
        self.real_query(conn, sql, QueryMode::Buffered).await
    }

    async fn fetch_assoc(&self, result: &mut ResultHandle) -> Result<Option<Row>> {
        self.fetch(result, FetchMode::Assoc).await
    }

    /// Fetch the next row with positional access only.
    async fn fetch_row(&self, result: &mut ResultHandle) -> Result<Option<Row>> {
        self.fetch(result, FetchMode::Num).await
    }

    async fn fetch_array(&self, result: &mut ResultHandle) -> Result<Option<Row>> {
        self.fetch(result, FetchMode::Both).await
    }

    async fn field_name(&self, result: &ResultHandle, index: usize) -> Result<String> {
        self.fields_meta(result)
            .await?
            .into_iter()
            .nth(index)
            .map(|f| f.name)
            .ok_or(DbiError::ColumnIndexOutOfRange(index))
    }

    async fn field_len(&self, result: &ResultHandle, index: usize) -> Result<usize> {
        self.fields_meta(result)
            .await?
            .get(index)
            .map(|f| f.length)
            .ok_or(DbiError::ColumnIndexOutOfRange(index))
    }
}
