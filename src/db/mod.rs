//! Database abstraction layer for db-warden.
//!
//! Provides a trait-based interface over the pooled executor so the tool surface
//! and orchestrator can run against MySQL or an in-memory fake.

mod mock;
mod mysql;
mod types;

pub use mock::{MockDatabaseClient, MockFailure};
pub use mysql::MySqlClient;
pub use types::{ColumnInfo, QueryResult, Row, RowRecord, Value};

use crate::error::Result;
use async_trait::async_trait;

/// Trait defining the interface for database clients.
///
/// Implementations own a bounded pool. Every call checks out one connection,
/// applies the execution time ceiling and runs exactly one statement.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Schema the catalog tools are scoped to.
    fn database_name(&self) -> &str;

    /// Executes one statement with positional parameters bound out-of-band.
    ///
    /// Fails with `Connection` when no pooled connection is available and with
    /// `Execution` when the database rejects the statement.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Closes the pool. Later calls fail with a connection error.
    async fn close(&self) -> Result<()>;
}
