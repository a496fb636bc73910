use thiserror::Error;

/// Error type for dbi operations
#[derive(Debug, Error)]
pub enum DbiError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Cannot select database {database}: {reason}")]
    SelectDatabaseFailed { database: String, reason: String },

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Prepare failed: {0}")]
    PrepareFailed(String),

    #[error("Connection handle {0} is closed or unknown")]
    InvalidConnection(u64),

    #[error("Result handle {0} has been freed or is unknown")]
    InvalidResult(u64),

    #[error("Statement handle {0} has been closed or is unknown")]
    InvalidStatement(u64),

    #[error("Result is not buffered")]
    NotBuffered,

    #[error("Seek offset {offset} out of range for {rows} row(s)")]
    SeekOutOfRange { offset: u64, rows: u64 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Expected {expected} row(s), got {actual}")]
    UnexpectedRowCount { expected: usize, actual: usize },

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Column index {0} out of range")]
    ColumnIndexOutOfRange(usize),
}

/// Result type alias for dbi operations
pub type Result<T> = std::result::Result<T, DbiError>;
