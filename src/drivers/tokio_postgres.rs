use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::Mutex as AsyncMutex;
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{Client, NoTls, RowStream, SimpleQueryMessage, Statement as PgStatement};
use tracing::{debug, error, warn};

use crate::config::ConnectionConfig;
use crate::error::{DbiError, Result};
use crate::escape::escape_standard;
use crate::traits::DatabaseDriver;
use crate::types::{
    ConnectionHandle, FetchMode, FieldMeta, PendingResults, QueryMode, ResultHandle, ResultSet,
    Row, SqlValue, StatementHandle, StatementOutcome,
};

/// Frontend/backend protocol major version spoken by tokio-postgres.
const PROTOCOL_VERSION: u32 = 3;

/// A live session and what we learned about the server when opening it.
struct PgSession {
    client: Arc<Client>,
    config: ConnectionConfig,
    server_version: String,
    standard_strings: bool,
    affected_rows: u64,
    last_error: Option<String>,
    pending: PendingResults,
}

struct Opened {
    client: Arc<Client>,
    server_version: String,
    standard_strings: bool,
}

/// Rows pulled from the server one at a time.
struct StreamingResult {
    fields: Vec<FieldMeta>,
    columns: Arc<[String]>,
    stream: Pin<Box<RowStream>>,
    fetched: u64,
    done: bool,
}

impl StreamingResult {
    fn new(fields: Vec<FieldMeta>, stream: RowStream) -> Self {
        let columns = fields.iter().map(|f| f.name.clone()).collect();
        Self {
            fields,
            columns,
            stream: Box::pin(stream),
            fetched: 0,
            done: false,
        }
    }

    async fn next_values(&mut self) -> Result<Option<Vec<SqlValue>>> {
        // A finished stream must not be polled again.
        if self.done {
            return Ok(None);
        }
        match self.stream.next().await {
            Some(Ok(row)) => {
                self.fetched += 1;
                Ok(Some(row_values(&row)))
            }
            Some(Err(e)) => {
                self.done = true;
                Err(query_error(e))
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }

    async fn next_row(&mut self, mode: FetchMode) -> Result<Option<Row>> {
        let values = self.next_values().await?;
        Ok(values.map(|values| Row::new(Arc::clone(&self.columns), values, mode)))
    }

    /// Read every remaining row into memory.
    async fn drain(&mut self) -> Result<ResultSet> {
        let mut rows = Vec::new();
        while let Some(values) = self.next_values().await? {
            rows.push(values);
        }
        Ok(ResultSet::new(self.fields.clone(), rows))
    }
}

enum PgResult {
    Buffered(ResultSet),
    Streaming(StreamingResult),
}

impl PgResult {
    fn fields(&self) -> &[FieldMeta] {
        match self {
            PgResult::Buffered(set) => set.fields(),
            PgResult::Streaming(stream) => &stream.fields,
        }
    }
}

type SharedResult = Arc<AsyncMutex<PgResult>>;

/// PostgreSQL driver implementation using tokio-postgres.
///
/// Single statements and prepared statements go through the extended
/// protocol, so column types are known and values are decoded natively.
/// Batches go through the simple protocol and yield text values.
pub struct TokioPostgresDriver {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<u64, PgSession>>,
    results: Mutex<HashMap<u64, (u64, SharedResult)>>,
    statements: Mutex<HashMap<u64, (u64, PgStatement)>>,
}

impl TokioPostgresDriver {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
            results: Mutex::new(HashMap::new()),
            statements: Mutex::new(HashMap::new()),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn client(&self, conn: u64) -> Result<Arc<Client>> {
        lock(&self.sessions)
            .get(&conn)
            .map(|s| Arc::clone(&s.client))
            .ok_or(DbiError::InvalidConnection(conn))
    }

    fn with_session<T>(&self, conn: u64, f: impl FnOnce(&mut PgSession) -> T) -> Result<T> {
        lock(&self.sessions)
            .get_mut(&conn)
            .map(f)
            .ok_or(DbiError::InvalidConnection(conn))
    }

    /// Remember the failure of the latest operation, or clear it on success.
    fn record<T>(&self, conn: u64, outcome: &Result<T>) {
        let message = outcome.as_ref().err().map(ToString::to_string);
        if let Some(session) = lock(&self.sessions).get_mut(&conn) {
            session.last_error = message;
        }
    }

    fn register(&self, conn: u64, result: PgResult) -> ResultHandle {
        let id = self.next_id();
        lock(&self.results).insert(id, (conn, Arc::new(AsyncMutex::new(result))));
        ResultHandle::new(id, conn)
    }

    fn result(&self, result: &ResultHandle) -> Result<SharedResult> {
        if !lock(&self.sessions).contains_key(&result.connection_id()) {
            return Err(DbiError::InvalidConnection(result.connection_id()));
        }
        match lock(&self.results).get(&result.id()) {
            Some((conn, shared)) if *conn == result.connection_id() => Ok(Arc::clone(shared)),
            _ => Err(DbiError::InvalidResult(result.id())),
        }
    }

    /// Drop the statements and streams that live on the server side of a
    /// session's previous connection.
    fn forget_server_state(&self, conn: u64) {
        lock(&self.statements).retain(|_, (owner, _)| *owner != conn);
        // Results busy in another task are left for that task to finish.
        lock(&self.results).retain(|_, (owner, shared)| {
            *owner != conn
                || shared
                    .try_lock()
                    .map_or(true, |r| matches!(*r, PgResult::Buffered(_)))
        });
    }

    async fn execute_statement(
        &self,
        conn: u64,
        client: &Client,
        statement: &PgStatement,
        params: &[SqlValue],
        mode: QueryMode,
    ) -> Result<ResultHandle> {
        // Convert SqlValue params to tokio-postgres compatible types
        let converted_params: Vec<Box<dyn ToSql + Sync + Send>> =
            params.iter().map(sql_value_to_tosql).collect();

        let param_refs: Vec<&(dyn ToSql + Sync)> = converted_params
            .iter()
            .map(|b| b.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let fields: Vec<FieldMeta> = statement
            .columns()
            .iter()
            .map(|c| FieldMeta::new(c.name(), c.type_().name()))
            .collect();

        let (result, affected) = if fields.is_empty() {
            let affected = client
                .execute(statement, &param_refs)
                .await
                .map_err(query_error)?;
            (PgResult::Buffered(ResultSet::empty()), affected)
        } else {
            match mode {
                QueryMode::Buffered => {
                    let rows = client
                        .query(statement, &param_refs)
                        .await
                        .map_err(query_error)?;
                    let rows: Vec<Vec<SqlValue>> = rows.iter().map(row_values).collect();
                    let affected = rows.len() as u64;
                    (PgResult::Buffered(ResultSet::new(fields, rows)), affected)
                }
                QueryMode::Unbuffered => {
                    let stream = client
                        .query_raw(statement, param_refs.iter().map(|p| *p as &dyn ToSql))
                        .await
                        .map_err(query_error)?;
                    (PgResult::Streaming(StreamingResult::new(fields, stream)), 0)
                }
            }
        };

        self.with_session(conn, |s| {
            s.affected_rows = affected;
            s.pending.clear();
        })?;
        Ok(self.register(conn, result))
    }

    async fn run_query(&self, conn: u64, sql: &str, mode: QueryMode) -> Result<ResultHandle> {
        let client = self.client(conn)?;
        let statement = client.prepare(sql).await.map_err(query_error)?;
        self.execute_statement(conn, &client, &statement, &[], mode)
            .await
    }
}

impl Default for TokioPostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDriver for TokioPostgresDriver {
    async fn connect(&self, config: &ConnectionConfig) -> Result<ConnectionHandle> {
        let opened = open_session(config).await?;
        let id = self.next_id();
        lock(&self.sessions).insert(
            id,
            PgSession {
                client: opened.client,
                config: config.clone(),
                server_version: opened.server_version,
                standard_strings: opened.standard_strings,
                affected_rows: 0,
                last_error: None,
                pending: PendingResults::default(),
            },
        );
        debug!("Opened connection {} to {}", id, config.host_description());
        Ok(ConnectionHandle::new(id))
    }

    async fn select_db(&self, conn: &ConnectionHandle, database: &str) -> Result<()> {
        let id = conn.id();
        let mut config = self.with_session(id, |s| s.config.clone())?;
        config.database = Some(database.to_string());

        // A PostgreSQL session is bound to one database, so switching means
        // reconnecting. The old session stays in place if that fails.
        match open_session(&config).await {
            Ok(opened) => {
                self.with_session(id, |s| {
                    s.client = opened.client;
                    s.config = config;
                    s.server_version = opened.server_version;
                    s.standard_strings = opened.standard_strings;
                    s.affected_rows = 0;
                    s.last_error = None;
                    s.pending.clear();
                })?;
                self.forget_server_state(id);
                debug!("Connection {} switched to database {}", id, database);
                Ok(())
            }
            Err(e) => {
                let reason = match e {
                    DbiError::ConnectionFailed(reason) => reason,
                    other => other.to_string(),
                };
                self.with_session(id, |s| s.last_error = Some(reason.clone()))?;
                Err(DbiError::SelectDatabaseFailed {
                    database: database.to_string(),
                    reason,
                })
            }
        }
    }

    async fn close(&self, conn: ConnectionHandle) -> Result<()> {
        let id = conn.id();
        lock(&self.sessions)
            .remove(&id)
            .ok_or(DbiError::InvalidConnection(id))?;
        lock(&self.results).retain(|_, (owner, _)| *owner != id);
        lock(&self.statements).retain(|_, (owner, _)| *owner != id);
        debug!("Closed connection {}", id);
        Ok(())
    }

    async fn real_query(
        &self,
        conn: &ConnectionHandle,
        sql: &str,
        mode: QueryMode,
    ) -> Result<ResultHandle> {
        debug!("Connection {} query: {}", conn.id(), sql);
        let outcome = self.run_query(conn.id(), sql, mode).await;
        self.record(conn.id(), &outcome);
        outcome
    }

    async fn real_multi_query(&self, conn: &ConnectionHandle, sql: &str) -> Result<()> {
        debug!("Connection {} multi-query: {}", conn.id(), sql);
        let client = self.client(conn.id())?;
        let outcome = client
            .simple_query(sql)
            .await
            .map(collect_outcomes)
            .map_err(query_error);
        self.record(conn.id(), &outcome);

        self.with_session(conn.id(), |s| match outcome {
            Ok(outcomes) => {
                s.affected_rows = s.pending.load(outcomes);
                Ok(())
            }
            Err(e) => {
                s.pending.clear();
                Err(e)
            }
        })?
    }

    fn more_results(&self, conn: &ConnectionHandle) -> Result<bool> {
        self.with_session(conn.id(), |s| s.pending.has_more())
    }

    fn has_result(&self, conn: &ConnectionHandle) -> Result<bool> {
        self.with_session(conn.id(), |s| s.pending.has_current())
    }

    async fn next_result(&self, conn: &ConnectionHandle) -> Result<bool> {
        self.with_session(conn.id(), |s| match s.pending.advance() {
            Some(affected) => {
                s.affected_rows = affected;
                true
            }
            None => false,
        })
    }

    async fn store_result(&self, conn: &ConnectionHandle) -> Result<Option<ResultHandle>> {
        let set = self.with_session(conn.id(), |s| s.pending.take_current())?;
        Ok(set.map(|set| self.register(conn.id(), PgResult::Buffered(set))))
    }

    async fn buffer_result(&self, result: &mut ResultHandle) -> Result<()> {
        let shared = self.result(result)?;
        let mut guard = shared.lock().await;
        if let PgResult::Streaming(stream) = &mut *guard {
            let outcome = stream.drain().await;
            self.record(result.connection_id(), &outcome);
            *guard = PgResult::Buffered(outcome?);
        }
        Ok(())
    }

    async fn fetch(&self, result: &mut ResultHandle, mode: FetchMode) -> Result<Option<Row>> {
        let shared = self.result(result)?;
        let mut guard = shared.lock().await;
        match &mut *guard {
            PgResult::Buffered(set) => Ok(set.fetch(mode)),
            PgResult::Streaming(stream) => {
                let outcome = stream.next_row(mode).await;
                if outcome.is_err() {
                    self.record(result.connection_id(), &outcome);
                }
                outcome
            }
        }
    }

    async fn data_seek(&self, result: &mut ResultHandle, offset: u64) -> Result<()> {
        let shared = self.result(result)?;
        let mut guard = shared.lock().await;
        match &mut *guard {
            PgResult::Buffered(set) => set.seek(offset),
            PgResult::Streaming(_) => Err(DbiError::NotBuffered),
        }
    }

    async fn free_result(&self, result: ResultHandle) -> Result<()> {
        self.result(&result)?;
        lock(&self.results).remove(&result.id());
        Ok(())
    }

    async fn num_rows(&self, result: &ResultHandle) -> Result<u64> {
        let shared = self.result(result)?;
        let guard = shared.lock().await;
        Ok(match &*guard {
            PgResult::Buffered(set) => set.num_rows(),
            PgResult::Streaming(stream) => stream.fetched,
        })
    }

    async fn num_fields(&self, result: &ResultHandle) -> Result<usize> {
        let shared = self.result(result)?;
        let guard = shared.lock().await;
        Ok(guard.fields().len())
    }

    async fn fields_meta(&self, result: &ResultHandle) -> Result<Vec<FieldMeta>> {
        let shared = self.result(result)?;
        let guard = shared.lock().await;
        Ok(guard.fields().to_vec())
    }

    fn affected_rows(&self, conn: &ConnectionHandle) -> Result<u64> {
        self.with_session(conn.id(), |s| s.affected_rows)
    }

    fn server_version(&self, conn: &ConnectionHandle) -> Result<String> {
        self.with_session(conn.id(), |s| s.server_version.clone())
    }

    fn protocol_version(&self, conn: &ConnectionHandle) -> Result<u32> {
        self.with_session(conn.id(), |_| PROTOCOL_VERSION)
    }

    fn host_info(&self, conn: &ConnectionHandle) -> Result<String> {
        self.with_session(conn.id(), |s| s.config.host_description())
    }

    fn client_info(&self) -> String {
        "tokio-postgres 0.7".to_string()
    }

    fn escape_string(&self, conn: &ConnectionHandle, value: &str) -> Result<String> {
        let standard_strings = self.with_session(conn.id(), |s| s.standard_strings)?;
        escape_standard(value, !standard_strings)
    }

    async fn prepare(&self, conn: &ConnectionHandle, sql: &str) -> Result<StatementHandle> {
        let client = self.client(conn.id())?;
        let outcome = client
            .prepare(sql)
            .await
            .map_err(|e| DbiError::PrepareFailed(describe(&e)));
        self.record(conn.id(), &outcome);

        let id = self.next_id();
        lock(&self.statements).insert(id, (conn.id(), outcome?));
        Ok(StatementHandle::new(id, conn.id()))
    }

    async fn execute_prepared(
        &self,
        stmt: &StatementHandle,
        params: &[SqlValue],
        mode: QueryMode,
    ) -> Result<ResultHandle> {
        let conn = stmt.connection_id();
        let client = self.client(conn)?;
        let statement = match lock(&self.statements).get(&stmt.id()) {
            Some((owner, statement)) if *owner == conn => statement.clone(),
            _ => return Err(DbiError::InvalidStatement(stmt.id())),
        };

        let outcome = self
            .execute_statement(conn, &client, &statement, params, mode)
            .await;
        self.record(conn, &outcome);
        outcome
    }

    async fn close_statement(&self, stmt: StatementHandle) -> Result<()> {
        lock(&self.statements)
            .remove(&stmt.id())
            .map(|_| ())
            .ok_or(DbiError::InvalidStatement(stmt.id()))
    }

    fn last_error(&self, conn: &ConnectionHandle) -> Option<String> {
        lock(&self.sessions)
            .get(&conn.id())
            .and_then(|s| s.last_error.clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn pg_config(config: &ConnectionConfig) -> tokio_postgres::Config {
    let mut pg = tokio_postgres::Config::new();
    pg.user(&config.user);
    // Hosts starting with '/' are treated as socket directories.
    let host = match &config.socket {
        Some(path) => path.to_string_lossy().into_owned(),
        None => config.host.clone(),
    };
    pg.host(&host);
    if let Some(port) = config.port {
        pg.port(port);
    }
    if let Some(password) = &config.password {
        pg.password(password);
    }
    if let Some(database) = &config.database {
        pg.dbname(database);
    }
    if let Some(secs) = config.connect_timeout_secs {
        pg.connect_timeout(Duration::from_secs(secs));
    }
    pg
}

async fn open_session(config: &ConnectionConfig) -> Result<Opened> {
    let (client, connection) = pg_config(config)
        .connect(NoTls)
        .await
        .map_err(|e| DbiError::ConnectionFailed(describe(&e)))?;

    // Spawn the connection handler
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("PostgreSQL connection error: {}", e);
        }
    });

    let settings: Vec<String> = client
        .simple_query("SHOW server_version; SHOW standard_conforming_strings")
        .await
        .map_err(|e| DbiError::ConnectionFailed(describe(&e)))?
        .into_iter()
        .filter_map(|message| match message {
            SimpleQueryMessage::Row(row) => row.get(0).map(str::to_string),
            _ => None,
        })
        .collect();

    Ok(Opened {
        client: Arc::new(client),
        server_version: settings.first().cloned().unwrap_or_default(),
        standard_strings: settings.get(1).map_or(true, |v| v == "on"),
    })
}

/// Split simple-protocol output into one outcome per statement.
fn collect_outcomes(messages: Vec<SimpleQueryMessage>) -> Vec<StatementOutcome> {
    let mut outcomes = Vec::new();
    let mut columns: Option<Vec<String>> = None;
    let mut rows = Vec::new();

    for message in messages {
        match message {
            SimpleQueryMessage::RowDescription(described) => {
                columns = Some(described.iter().map(|c| c.name().to_string()).collect());
            }
            SimpleQueryMessage::Row(row) => {
                if columns.is_none() {
                    columns = Some(row.columns().iter().map(|c| c.name().to_string()).collect());
                }
                let values = (0..row.columns().len())
                    .map(|i| row.get(i).map_or(SqlValue::Null, SqlValue::from))
                    .collect();
                rows.push(values);
            }
            SimpleQueryMessage::CommandComplete(affected_rows) => {
                let result = columns
                    .take()
                    .map(|names| ResultSet::from_columns(names, std::mem::take(&mut rows)));
                outcomes.push(StatementOutcome {
                    result,
                    affected_rows,
                });
            }
            _ => {}
        }
    }
    outcomes
}

fn describe(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => db.to_string(),
        None => e.to_string(),
    }
}

fn query_error(e: tokio_postgres::Error) -> DbiError {
    DbiError::QueryFailed(describe(&e))
}

/// Convert a SqlValue to a boxed ToSql trait object.
fn sql_value_to_tosql(value: &SqlValue) -> Box<dyn ToSql + Sync + Send> {
    match value {
        SqlValue::Null => Box::new(None::<String>),
        SqlValue::Text(s) => Box::new(s.clone()),
        SqlValue::Int32(i) => Box::new(*i),
        SqlValue::Int64(i) => Box::new(*i),
        SqlValue::Float64(v) => Box::new(*v),
        SqlValue::Bool(b) => Box::new(*b),
        SqlValue::Bytes(b) => Box::new(b.clone()),
    }
}

fn row_values(row: &tokio_postgres::Row) -> Vec<SqlValue> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| column_value(row, i, col.type_()))
        .collect()
}

fn decode<'a, T: FromSql<'a>>(
    row: &'a tokio_postgres::Row,
    index: usize,
    wrap: impl FnOnce(T) -> SqlValue,
) -> std::result::Result<SqlValue, tokio_postgres::Error> {
    row.try_get::<_, Option<T>>(index)
        .map(|v| v.map_or(SqlValue::Null, wrap))
}

fn text<T: ToString>(value: T) -> SqlValue {
    SqlValue::Text(value.to_string())
}

/// Decode the value at `index`. Types without a decoder become NULL.
fn column_value(row: &tokio_postgres::Row, index: usize, type_: &Type) -> SqlValue {
    let decoded = match type_.name() {
        "bool" => decode(row, index, SqlValue::Bool),
        "int2" => decode(row, index, |v: i16| SqlValue::Int32(v.into())),
        "int4" => decode(row, index, SqlValue::Int32),
        "int8" => decode(row, index, SqlValue::Int64),
        "oid" => decode(row, index, |v: u32| SqlValue::Int64(v.into())),
        "float4" => decode(row, index, |v: f32| SqlValue::Float64(v.into())),
        "float8" => decode(row, index, SqlValue::Float64),
        "bytea" => decode(row, index, SqlValue::Bytes),
        "date" => decode(row, index, text::<chrono::NaiveDate>),
        "time" => decode(row, index, text::<chrono::NaiveTime>),
        "timestamp" => decode(row, index, text::<chrono::NaiveDateTime>),
        "timestamptz" => decode(row, index, text::<chrono::DateTime<chrono::Utc>>),
        "uuid" => decode(row, index, text::<uuid::Uuid>),
        "json" | "jsonb" => decode(row, index, text::<serde_json::Value>),
        _ => decode(row, index, SqlValue::Text),
    };

    decoded.unwrap_or_else(|e| {
        warn!("Cannot decode column {} of type {}: {}", index, type_, e);
        SqlValue::Null
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pg_config_from_tcp_settings() {
        let config = ConnectionConfig::new("admin")
            .host("db.internal")
            .port(5433)
            .password("secret")
            .database("shop");
        let pg = pg_config(&config);

        assert_eq!(pg.get_user(), Some("admin"));
        assert_eq!(pg.get_dbname(), Some("shop"));
        assert_eq!(pg.get_ports(), &[5433]);
        assert_eq!(pg.get_password(), Some(&b"secret"[..]));
        assert!(matches!(
            pg.get_hosts(),
            [tokio_postgres::config::Host::Tcp(host)] if host == "db.internal"
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_pg_config_prefers_socket() {
        let config = ConnectionConfig::new("admin")
            .host("ignored")
            .socket("/var/run/postgresql");
        let pg = pg_config(&config);

        let socket_dir = std::path::Path::new("/var/run/postgresql");
        assert!(matches!(
            pg.get_hosts(),
            [tokio_postgres::config::Host::Unix(path)] if path == socket_dir
        ));
    }

    #[test]
    fn test_sql_value_to_tosql_accepts_every_variant() {
        let values = [
            SqlValue::Null,
            SqlValue::from("a"),
            SqlValue::Int32(1),
            SqlValue::Int64(2),
            SqlValue::Float64(0.5),
            SqlValue::Bool(true),
            SqlValue::Bytes(vec![1, 2]),
        ];
        assert_eq!(values.iter().map(sql_value_to_tosql).count(), 7);
    }

    #[test]
    fn test_operations_on_unknown_connection_fail() {
        let driver = TokioPostgresDriver::new();
        let conn = ConnectionHandle::new(99);

        assert!(matches!(
            driver.affected_rows(&conn),
            Err(DbiError::InvalidConnection(99))
        ));
        assert!(driver.escape_string(&conn, "x").is_err());
        assert!(driver.last_error(&conn).is_none());
    }
}
