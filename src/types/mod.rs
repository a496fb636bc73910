mod field;
mod handle;
mod result_set;
mod row;
mod sql_value;

pub use field::FieldMeta;
pub use handle::{ConnectionHandle, QueryMode, ResultHandle, StatementHandle};
pub use result_set::{PendingResults, ResultSet, StatementOutcome};
pub use row::{FetchMode, QueryResult, Row};
pub use sql_value::SqlValue;
