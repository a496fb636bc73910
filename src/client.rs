use std::sync::Arc;

use tracing::debug;

use crate::config::ConnectionConfig;
use crate::drivers::TokioPostgresDriver;
use crate::error::Result;
use crate::traits::DatabaseDriver;
use crate::types::{
    ConnectionHandle, FetchMode, QueryMode, QueryResult, ResultHandle, Row, SqlValue,
    StatementHandle,
};

/// Main entry point for hosts.
/// Holds a driver and one open session on it, and drains results into
/// `QueryResult`s so callers don't juggle result handles.
pub struct DbiClient {
    driver: Arc<dyn DatabaseDriver>,
    connection: ConnectionHandle,
}

impl DbiClient {
    /// Open a session with the given driver.
    pub async fn connect(
        driver: Arc<dyn DatabaseDriver>,
        config: &ConnectionConfig,
    ) -> Result<Self> {
        let connection = driver.connect(config).await?;
        Ok(Self { driver, connection })
    }

    /// Connect to a PostgreSQL server.
    ///
    /// # Example
    /// ```ignore
    /// let config = ConnectionConfig::new("postgres").password("secret").database("shop");
    /// let client = DbiClient::connect_postgres(&config).await?;
    /// ```
    pub async fn connect_postgres(config: &ConnectionConfig) -> Result<Self> {
        Self::connect(Arc::new(TokioPostgresDriver::new()), config).await
    }

    /// Wrap a session that was opened directly on the driver.
    pub fn with_connection(driver: Arc<dyn DatabaseDriver>, connection: ConnectionHandle) -> Self {
        Self { driver, connection }
    }

    pub fn driver(&self) -> &Arc<dyn DatabaseDriver> {
        &self.driver
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub async fn select_db(&self, database: &str) -> Result<()> {
        self.driver.select_db(&self.connection, database).await
    }

    /// Run a statement and return all of its rows, addressed by name and position.
    pub async fn fetch_all(&self, sql: &str) -> Result<QueryResult> {
        let result = self
            .driver
            .real_query(&self.connection, sql, QueryMode::Buffered)
            .await?;
        self.drain(result).await
    }

    /// Run a statement and return the first column of its first row.
    pub async fn fetch_value(&self, sql: &str) -> Result<Option<SqlValue>> {
        let mut result = self.driver.query(&self.connection, sql).await?;
        let row = self.driver.fetch_row(&mut result).await;
        self.driver.free_result(result).await?;
        Ok(row?.and_then(|row| row.into_values().into_iter().next()))
    }

    /// Run a batch and return one result per statement. Statements without a
    /// result set contribute an empty result carrying their affected row count.
    /// A batch without statements returns no results.
    pub async fn multi_query(&self, sql: &str) -> Result<Vec<QueryResult>> {
        self.driver.real_multi_query(&self.connection, sql).await?;

        let mut results = Vec::new();
        while self.driver.has_result(&self.connection)? {
            match self.driver.store_result(&self.connection).await? {
                Some(result) => results.push(self.drain(result).await?),
                None => {
                    let affected = self.driver.affected_rows(&self.connection)?;
                    results.push(QueryResult::new(Vec::new(), Vec::new(), affected));
                }
            }
            if !self.driver.more_results(&self.connection)? {
                break;
            }
            self.driver.next_result(&self.connection).await?;
        }
        debug!("Multi-query returned {} result(s)", results.len());
        Ok(results)
    }

    pub async fn prepare(&self, sql: &str) -> Result<StatementHandle> {
        self.driver.prepare(&self.connection, sql).await
    }

    /// Execute a prepared statement and return all of its rows.
    pub async fn execute(
        &self,
        stmt: &StatementHandle,
        params: &[SqlValue],
    ) -> Result<QueryResult> {
        let result = self
            .driver
            .execute_prepared(stmt, params, QueryMode::Buffered)
            .await?;
        self.drain(result).await
    }

    pub async fn close_statement(&self, stmt: StatementHandle) -> Result<()> {
        self.driver.close_statement(stmt).await
    }

    pub fn escape(&self, value: &str) -> Result<String> {
        self.driver.escape_string(&self.connection, value)
    }

    pub fn last_error(&self) -> Option<String> {
        self.driver.last_error(&self.connection)
    }

    pub fn server_version(&self) -> Result<String> {
        self.driver.server_version(&self.connection)
    }

    pub fn host_info(&self) -> Result<String> {
        self.driver.host_info(&self.connection)
    }

    /// Close the session.
    pub async fn close(self) -> Result<()> {
        self.driver.close(self.connection).await
    }

    /// Fetch every row and free the result, even when a fetch fails.
    async fn drain(&self, mut result: ResultHandle) -> Result<QueryResult> {
        let collected = self.collect_rows(&mut result).await;
        self.driver.free_result(result).await?;
        let (columns, rows) = collected?;
        let affected = self.driver.affected_rows(&self.connection)?;
        Ok(QueryResult::new(columns, rows, affected))
    }

    async fn collect_rows(&self, result: &mut ResultHandle) -> Result<(Vec<String>, Vec<Row>)> {
        let columns = self
            .driver
            .fields_meta(result)
            .await?
            .into_iter()
            .map(|f| f.name)
            .collect();

        let mut rows = Vec::new();
        while let Some(row) = self.driver.fetch(result, FetchMode::Both).await? {
            rows.push(row);
        }
        Ok((columns, rows))
    }
}
