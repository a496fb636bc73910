//! dbi - A driver-agnostic database access contract for administration tools
//!
//! Hosts talk to any engine through the [`DatabaseDriver`] trait: open a
//! session, run single statements or batches, walk result handles row by row,
//! inspect metadata, escape strings and prepare statements. Every operation
//! reports failure through [`DbiError`].
//!
//! # Example
//! ```ignore
//! use dbi::{ConnectionConfig, DbiClient};
//!
//! let config = ConnectionConfig::new("postgres").password("secret").database("shop");
//! let client = DbiClient::connect_postgres(&config).await?;
//!
//! let result = client.fetch_all("SELECT id, name FROM users").await?;
//! for row in result.rows_ref() {
//!     println!("{} {}", row.get("id")?, row.get_index(1)?);
//! }
//!
//! // Or drive the contract directly
//! let driver = client.driver();
//! let mut handle = driver.query(client.connection(), "SELECT 1").await?;
//! while let Some(row) = driver.fetch_row(&mut handle).await? {
//!     println!("{:?}", row.values());
//! }
//! driver.free_result(handle).await?;
//! ```

pub mod config;
pub mod drivers;
pub mod error;
pub mod escape;
pub mod traits;
pub mod types;

mod client;

// Re-export main types for convenient access
pub use client::DbiClient;
pub use config::ConnectionConfig;
pub use error::{DbiError, Result};
pub use traits::DatabaseDriver;
pub use types::{
    ConnectionHandle, FetchMode, FieldMeta, QueryMode, QueryResult, ResultHandle, Row, SqlValue,
    StatementHandle,
};
