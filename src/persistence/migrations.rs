//! Forward-only schema migrations for the state database.
//!
//! Each migration is a list of statements applied in one transaction together with its
//! row in `schema_versions`.

use crate::error::{Result, WardenError};
use sqlx::sqlite::SqlitePool;
use tracing::info;

struct Migration {
    version: i32,
    name: &'static str,
    statements: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "query memory",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS remembered_queries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                natural_language TEXT NOT NULL,
                generated_sql TEXT NOT NULL UNIQUE,
                tables TEXT NOT NULL DEFAULT '[]',
                joins TEXT NOT NULL DEFAULT '[]',
                category TEXT NOT NULL DEFAULT 'general',
                remembered_by TEXT NOT NULL,
                remembered_by_name TEXT NOT NULL DEFAULT 'Unknown',
                tier INTEGER NOT NULL CHECK (tier IN (1, 2)),
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_remembered_queries_category ON remembered_queries(category)",
            "CREATE INDEX IF NOT EXISTS idx_remembered_queries_created ON remembered_queries(created_at)",
        ],
    },
    Migration {
        version: 2,
        name: "audit log",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tool_name TEXT NOT NULL,
                query TEXT NOT NULL,
                row_count INTEGER NOT NULL,
                execution_time_ms INTEGER NOT NULL,
                recorded_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_audit_log_recorded ON audit_log(recorded_at)",
        ],
    },
];

fn latest_version() -> i32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

fn migration_error(context: &str, e: sqlx::Error) -> WardenError {
    WardenError::persistence(format!("{context}: {e}"))
}

/// Applies every migration newer than the recorded schema version.
///
/// A database written by a newer build is refused rather than modified.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_versions (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| migration_error("Failed to create schema_versions", e))?;

    let current = current_version(pool).await?;
    let latest = latest_version();
    if current > latest {
        return Err(WardenError::persistence(format!(
            "State database schema v{current} is newer than supported v{latest}; upgrade db-warden"
        )));
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        apply(pool, migration).await?;
        info!(version = migration.version, "Applied state migration: {}", migration.name);
    }
    Ok(())
}

async fn apply(pool: &SqlitePool, migration: &Migration) -> Result<()> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| migration_error("Failed to start migration", e))?;

    for statement in migration.statements {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .map_err(|e| migration_error(&format!("Migration v{} failed", migration.version), e))?;
    }
    sqlx::query("INSERT INTO schema_versions (version) VALUES (?)")
        .bind(migration.version)
        .execute(&mut *tx)
        .await
        .map_err(|e| migration_error("Failed to record migration", e))?;

    tx.commit()
        .await
        .map_err(|e| migration_error("Failed to commit migration", e))
}

async fn current_version(pool: &SqlitePool) -> Result<i32> {
    let (version,): (Option<i32>,) = sqlx::query_as("SELECT MAX(version) FROM schema_versions")
        .fetch_one(pool)
        .await
        .map_err(|e| migration_error("Failed to read schema version", e))?;
    Ok(version.unwrap_or(0))
}
