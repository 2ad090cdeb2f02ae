//! Mock database client for testing.
//!
//! Provides an in-memory database for tests and `--mock-db` mode. It answers catalog
//! queries from registered tables, returns scripted results for matching statements,
//! and records every pool checkout.

use super::{ColumnInfo, DatabaseClient, QueryResult, Value};
use crate::error::{Result, WardenError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Scripted failure returned for a matching statement.
#[derive(Debug, Clone)]
pub enum MockFailure {
    Connection(String),
    Execution(String),
}

impl MockFailure {
    fn to_error(&self) -> WardenError {
        match self {
            Self::Connection(msg) => WardenError::connection(msg.clone()),
            Self::Execution(msg) => WardenError::execution(msg.clone()),
        }
    }
}

#[derive(Debug, Clone)]
struct MockTable {
    name: String,
    columns: Vec<(String, String)>,
}

/// A mock database client that returns predefined results.
pub struct MockDatabaseClient {
    database: String,
    tables: Vec<MockTable>,
    responses: Vec<(String, std::result::Result<QueryResult, MockFailure>)>,
    checkouts: AtomicUsize,
    executed: Mutex<Vec<(String, Vec<Value>)>>,
    closed: AtomicBool,
}

impl MockDatabaseClient {
    /// Creates a new mock database client with no tables.
    pub fn new() -> Self {
        Self {
            database: "mock".to_string(),
            tables: Vec::new(),
            responses: Vec::new(),
            checkouts: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Creates a mock with a small CRM-like catalog, used by `--mock-db`.
    pub fn with_sample_catalog() -> Self {
        Self::new()
            .with_database("crm")
            .with_table("persons", &[("id", "int"), ("first_name", "varchar"), ("last_name", "varchar")])
            .with_table("cases", &[("id", "int"), ("person_id", "int"), ("status", "varchar")])
            .with_table("invoices", &[("id", "int"), ("case_id", "int"), ("total", "decimal")])
    }

    /// Sets the schema name reported to catalog tools.
    pub fn with_database(mut self, name: impl Into<String>) -> Self {
        self.database = name.into();
        self
    }

    /// Registers a table for catalog queries.
    pub fn with_table(mut self, name: &str, columns: &[(&str, &str)]) -> Self {
        self.tables.push(MockTable {
            name: name.to_string(),
            columns: columns
                .iter()
                .map(|(c, t)| (c.to_string(), t.to_string()))
                .collect(),
        });
        self
    }

    /// Returns `result` for any statement containing `pattern` (case-insensitive).
    pub fn with_response(mut self, pattern: &str, result: QueryResult) -> Self {
        self.responses.push((pattern.to_lowercase(), Ok(result)));
        self
    }

    /// Fails any statement containing `pattern` (case-insensitive).
    pub fn with_failure(mut self, pattern: &str, failure: MockFailure) -> Self {
        self.responses.push((pattern.to_lowercase(), Err(failure)));
        self
    }

    /// Number of pool checkouts so far.
    pub fn checkouts(&self) -> usize {
        self.checkouts.load(Ordering::SeqCst)
    }

    /// Statements executed so far, with their parameters.
    pub fn executed(&self) -> Vec<(String, Vec<Value>)> {
        self.executed
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    fn catalog_result(&self, sql_lower: &str, params: &[Value]) -> Option<QueryResult> {
        if sql_lower.contains("information_schema.tables") {
            let rows = self
                .tables
                .iter()
                .map(|t| {
                    vec![
                        Value::from(t.name.as_str()),
                        Value::from("BASE TABLE"),
                        Value::Int(0),
                        Value::from(""),
                    ]
                })
                .collect();
            return Some(QueryResult::with_data(
                columns(&["TABLE_NAME", "TABLE_TYPE", "TABLE_ROWS", "TABLE_COMMENT"]),
                rows,
            ));
        }

        let requested = params.get(1).and_then(Value::as_str);
        let selected = self
            .tables
            .iter()
            .filter(|t| requested.map_or(true, |r| t.name == r));

        if sql_lower.contains("information_schema.statistics") {
            let rows = selected
                .filter_map(|t| t.columns.first())
                .map(|(col, _)| {
                    vec![
                        Value::from("PRIMARY"),
                        Value::from(col.as_str()),
                        Value::Int(0),
                        Value::from("BTREE"),
                    ]
                })
                .collect();
            return Some(QueryResult::with_data(
                columns(&["INDEX_NAME", "COLUMN_NAME", "NON_UNIQUE", "INDEX_TYPE"]),
                rows,
            ));
        }

        if sql_lower.contains("information_schema.columns") {
            let rows = selected
                .flat_map(|t| {
                    t.columns.iter().enumerate().map(move |(i, (col, ty))| {
                        vec![
                            Value::from(t.name.as_str()),
                            Value::from(col.as_str()),
                            Value::from(ty.as_str()),
                            Value::from(if i == 0 { "NO" } else { "YES" }),
                            Value::from(if i == 0 { "PRI" } else { "" }),
                            Value::Null,
                            Value::from(""),
                            Value::from(""),
                            Value::Int(i as i64 + 1),
                        ]
                    })
                })
                .collect();
            return Some(QueryResult::with_data(
                columns(&[
                    "TABLE_NAME",
                    "COLUMN_NAME",
                    "DATA_TYPE",
                    "IS_NULLABLE",
                    "COLUMN_KEY",
                    "COLUMN_DEFAULT",
                    "EXTRA",
                    "COLUMN_COMMENT",
                    "ORDINAL_POSITION",
                ]),
                rows,
            ));
        }

        None
    }
}

fn columns(names: &[&str]) -> Vec<ColumnInfo> {
    names.iter().map(|n| ColumnInfo::new(*n, "VARCHAR")).collect()
}

impl Default for MockDatabaseClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    fn database_name(&self) -> &str {
        &self.database
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WardenError::connection("Connection pool is closed"));
        }
        self.checkouts.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut log) = self.executed.lock() {
            log.push((sql.to_string(), params.to_vec()));
        }

        let sql_lower = sql.to_lowercase();

        for (pattern, outcome) in &self.responses {
            if sql_lower.contains(pattern.as_str()) {
                return match outcome {
                    Ok(result) => Ok(result.clone()),
                    Err(failure) => Err(failure.to_error()),
                };
            }
        }

        if let Some(result) = self.catalog_result(&sql_lower, params) {
            return Ok(result.with_execution_time(Duration::from_millis(1)));
        }

        // Any other statement yields a single row
        Ok(QueryResult::with_data(
            vec![ColumnInfo::new("result", "VARCHAR")],
            vec![vec![Value::String(format!("Mock result for: {sql}"))]],
        )
        .with_execution_time(Duration::from_millis(1)))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
