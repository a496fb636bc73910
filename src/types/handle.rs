//! Opaque handles passed between the host and a driver.
//!
//! Handles are plain tokens: the driver owns the state behind them and looks it
//! up by id. They are deliberately not `Clone`, so the caller owns each handle
//! until it hands it back to `free_result`, `close_statement` or `close`.

/// An established session with a database server.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    id: u64,
}

impl ConnectionHandle {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// The pending or materialized output of a query.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ResultHandle {
    id: u64,
    connection: u64,
}

impl ResultHandle {
    pub fn new(id: u64, connection: u64) -> Self {
        Self { id, connection }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Id of the connection the query was issued over.
    pub fn connection_id(&self) -> u64 {
        self.connection
    }
}

/// A prepared, parameterized statement.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct StatementHandle {
    id: u64,
    connection: u64,
}

impl StatementHandle {
    pub fn new(id: u64, connection: u64) -> Self {
        Self { id, connection }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn connection_id(&self) -> u64 {
        self.connection
    }
}

/// How a query's rows are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryMode {
    /// All rows are read into memory before the handle is returned.
    #[default]
    Buffered,
    /// Rows are pulled from the server as they are fetched.
    Unbuffered,
}
