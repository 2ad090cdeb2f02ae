//! MySQL database client implementation.
//!
//! Provides the `MySqlClient` struct that implements the `DatabaseClient` trait
//! for MySQL using a bounded sqlx pool.

use crate::config::{DatabaseConfig, LimitsConfig};
use crate::db::{ColumnInfo, DatabaseClient, QueryResult, Row, Value};
use crate::error::{Result, WardenError};
use async_trait::async_trait;
use sqlx::mysql::{
    MySql, MySqlArguments, MySqlConnectOptions, MySqlDatabaseError, MySqlPool, MySqlPoolOptions,
    MySqlRow, MySqlSslMode,
};
use sqlx::query::Query;
use sqlx::{Column as SqlxColumn, Connection, Row as SqlxRow, TypeInfo};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Maximum number of connection retry attempts at startup.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// MySQL database client.
#[derive(Debug)]
pub struct MySqlClient {
    pool: MySqlPool,
    database: String,
    query_timeout_ms: u64,
}

impl MySqlClient {
    /// Creates the pool and verifies one connection with a ping.
    pub async fn connect(db: &DatabaseConfig, limits: &LimitsConfig) -> Result<Self> {
        let database = db.schema_name()?.to_string();
        let options = connect_options(db)?;

        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            let result = tokio::time::timeout(
                Duration::from_secs(db.connect_timeout_secs),
                Self::open_pool(db, options.clone()),
            )
            .await
            .unwrap_or(Err(sqlx::Error::PoolTimedOut));

            match result {
                Ok(pool) => {
                    info!(db = %db.display_string(), "Database connection verified");
                    return Ok(Self {
                        pool,
                        database,
                        query_timeout_ms: limits.query_timeout_ms,
                    });
                }
                Err(e) => {
                    let transient = is_transient_error(&e);
                    last_error = Some(e);

                    if attempt < MAX_RETRY_ATTEMPTS && transient {
                        warn!(
                            "Connection attempt {} failed (transient error), retrying in {:?}",
                            attempt, delay
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    } else {
                        break;
                    }
                }
            }
        }

        Err(match last_error {
            Some(e) => map_connection_error(e, db),
            None => WardenError::connection("No connection attempt was made"),
        })
    }

    async fn open_pool(
        db: &DatabaseConfig,
        options: MySqlConnectOptions,
    ) -> std::result::Result<MySqlPool, sqlx::Error> {
        let pool = MySqlPoolOptions::new()
            .max_connections(db.connection_limit)
            .acquire_timeout(Duration::from_millis(db.acquire_timeout_ms))
            .connect_lazy_with(options);

        let mut conn = pool.acquire().await?;
        conn.ping().await?;
        Ok(pool)
    }

    /// Wraps an existing pool. Used by tests that manage their own pool.
    pub fn from_pool(pool: MySqlPool, database: impl Into<String>, query_timeout_ms: u64) -> Self {
        Self {
            pool,
            database: database.into(),
            query_timeout_ms,
        }
    }

    /// Statement that caps server-side execution time for the checked-out session.
    fn execution_ceiling_sql(&self) -> String {
        format!("SET SESSION MAX_EXECUTION_TIME = {}", self.query_timeout_ms)
    }
}

#[async_trait]
impl DatabaseClient for MySqlClient {
    fn database_name(&self) -> &str {
        &self.database
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        // Released back to the pool when dropped, on every exit path
        let mut conn = self.pool.acquire().await.map_err(map_acquire_error)?;

        // Pooled sessions are shared between callers, so the ceiling is set on every checkout
        let ceiling = self.execution_ceiling_sql();
        sqlx::query(&ceiling)
            .execute(&mut *conn)
            .await
            .map_err(map_statement_error)?;

        let query = params
            .iter()
            .fold(sqlx::query(sql), |query, value| bind_value(query, value));

        let start = Instant::now();
        let rows: Vec<MySqlRow> = query
            .fetch_all(&mut *conn)
            .await
            .map_err(map_statement_error)?;
        let execution_time = start.elapsed();

        // Column metadata comes from the first row; an empty result reports none
        let columns: Vec<ColumnInfo> = rows.first().map(column_info).unwrap_or_default();

        let rows: Vec<Row> = rows.iter().map(convert_row).collect();

        Ok(QueryResult::with_data(columns, rows).with_execution_time(execution_time))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        info!("Database pool closed");
        Ok(())
    }
}

fn connect_options(db: &DatabaseConfig) -> Result<MySqlConnectOptions> {
    let host = db
        .host
        .as_deref()
        .ok_or_else(|| WardenError::config("DB_HOST is required"))?;
    let user = db
        .user
        .as_deref()
        .ok_or_else(|| WardenError::config("DB_USER is required"))?;

    let ssl_mode = if db.ssl {
        MySqlSslMode::VerifyIdentity
    } else {
        MySqlSslMode::Disabled
    };

    let mut options = MySqlConnectOptions::new()
        .host(host)
        .port(db.port)
        .username(user)
        .database(db.schema_name()?)
        .charset("utf8mb4")
        .timezone(Some(String::from("+00:00")))
        .ssl_mode(ssl_mode);

    if let Some(password) = &db.password {
        options = options.password(password);
    }

    Ok(options)
}

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::UInt(u) => query.bind(*u),
        Value::Float(f) => query.bind(*f),
        Value::String(s) => query.bind(s.clone()),
        Value::Bytes(b) => query.bind(b.clone()),
    }
}

fn column_info(row: &MySqlRow) -> Vec<ColumnInfo> {
    row.columns()
        .iter()
        .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
        .collect()
}

/// Converts a sqlx MySqlRow to our Row type.
fn convert_row(row: &MySqlRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

/// Converts a single column value by its reported MySQL type name.
///
/// Decoding is unchecked: the driver's compatibility table is narrower than what the
/// wire format allows (DECIMAL as text, YEAR as an integer).
fn convert_value(row: &MySqlRow, index: usize, type_name: &str) -> Value {
    let upper = type_name.to_uppercase();
    match upper.as_str() {
        "NULL" => Value::Null,

        "BOOLEAN" => row
            .try_get_unchecked::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),

        t if t.ends_with("UNSIGNED") => row
            .try_get_unchecked::<Option<u64>, _>(index)
            .ok()
            .flatten()
            .map(|v| match i64::try_from(v) {
                Ok(i) => Value::Int(i),
                Err(_) => Value::UInt(v),
            })
            .unwrap_or(Value::Null),

        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => row
            .try_get_unchecked::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Int)
            .unwrap_or(Value::Null),

        "FLOAT" => row
            .try_get_unchecked::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Float(v as f64))
            .unwrap_or(Value::Null),

        "DOUBLE" => row
            .try_get_unchecked::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Float)
            .unwrap_or(Value::Null),

        "DATE" => row
            .try_get_unchecked::<Option<chrono::NaiveDate>, _>(index)
            .ok()
            .flatten()
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Null),

        "DATETIME" => row
            .try_get_unchecked::<Option<chrono::NaiveDateTime>, _>(index)
            .ok()
            .flatten()
            .map(|d| Value::String(d.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()))
            .unwrap_or(Value::Null),

        "TIMESTAMP" => row
            .try_get_unchecked::<Option<chrono::DateTime<chrono::Utc>>, _>(index)
            .ok()
            .flatten()
            .map(|d| Value::String(d.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()))
            .unwrap_or(Value::Null),

        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => row
            .try_get_unchecked::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null),

        // DECIMAL, JSON, TIME and text types arrive as strings
        _ => match row.try_get_unchecked::<Option<String>, _>(index) {
            Ok(v) => v.map(Value::String).unwrap_or(Value::Null),
            Err(_) => row
                .try_get_unchecked::<Option<Vec<u8>>, _>(index)
                .ok()
                .flatten()
                .map(Value::Bytes)
                .unwrap_or(Value::Null),
        },
    }
}

/// Determines if an error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    if matches!(error, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)) {
        return true;
    }

    let error_str = error.to_string().to_lowercase();
    error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
}

/// Maps startup connection errors to operator-facing messages.
fn map_connection_error(error: sqlx::Error, db: &DatabaseConfig) -> WardenError {
    let host = db.host.as_deref().unwrap_or("localhost");
    let port = db.port;
    let user = db.user.as_deref().unwrap_or("unknown");
    let database = db.name.as_deref().unwrap_or("unknown");

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        WardenError::connection(format!(
            "Cannot connect to {host}:{port}. Check that the server is running. (ECONNREFUSED)"
        ))
    } else if error_str.contains("access denied") {
        WardenError::connection(format!(
            "Authentication failed for user '{user}'. Check your credentials."
        ))
    } else if error_str.contains("unknown database") {
        WardenError::connection(format!("Database '{database}' does not exist."))
    } else if error_str.contains("tls") || error_str.contains("ssl") {
        WardenError::connection(format!(
            "TLS handshake with {host}:{port} failed. Set DB_SSL=false for plaintext servers."
        ))
    } else if matches!(error, sqlx::Error::PoolTimedOut) || error_str.contains("timed out") {
        WardenError::connection(format!(
            "Connection to {host}:{port} timed out. (ETIMEDOUT)"
        ))
    } else {
        WardenError::connection(error.to_string())
    }
}

/// Maps a failed pool checkout. Never includes connection details.
fn map_acquire_error(error: sqlx::Error) -> WardenError {
    match error {
        sqlx::Error::PoolTimedOut => {
            WardenError::connection("Connection pool exhausted (ETIMEDOUT)")
        }
        sqlx::Error::PoolClosed => WardenError::connection("Connection pool is closed"),
        other => {
            let text = other.to_string();
            if text.to_lowercase().contains("connection refused") {
                WardenError::connection(format!("{text} (ECONNREFUSED)"))
            } else {
                WardenError::connection(text)
            }
        }
    }
}

/// Maps an error raised while running a statement on a checked-out connection.
fn map_statement_error(error: sqlx::Error) -> WardenError {
    match &error {
        sqlx::Error::Database(_) => WardenError::execution(format_query_error(&error)),
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolClosed => {
            map_acquire_error(error)
        }
        _ => WardenError::execution(error.to_string()),
    }
}

/// Formats a database error as `[number] message` so callers can match on the code.
fn format_query_error(error: &sqlx::Error) -> String {
    match error.as_database_error() {
        Some(db_error) => match db_error.try_downcast_ref::<MySqlDatabaseError>() {
            Some(mysql_error) => format!("[{}] {}", mysql_error.number(), mysql_error.message()),
            None => db_error.message().to_string(),
        },
        None => error.to_string(),
    }
}
