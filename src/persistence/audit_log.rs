//! Persisted audit trail.

use crate::audit::AuditRecord;
use crate::error::{Result, WardenError};
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;

/// A stored audit record.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: i64,
    pub tool_name: String,
    pub query: String,
    pub row_count: i64,
    pub execution_time_ms: i64,
    pub recorded_at: String,
}

/// Appends one audit record.
pub async fn insert(pool: &SqlitePool, record: &AuditRecord) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO audit_log (tool_name, query, row_count, execution_time_ms, recorded_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.tool_name)
    .bind(&record.query)
    .bind(i64::try_from(record.row_count).unwrap_or(i64::MAX))
    .bind(i64::try_from(record.execution_time_ms).unwrap_or(i64::MAX))
    .bind(record.timestamp_string())
    .execute(pool)
    .await
    .map_err(|e| WardenError::persistence(format!("Failed to write audit record: {e}")))?;

    Ok(result.last_insert_rowid())
}

/// Returns the most recent audit records, newest first.
pub async fn recent(pool: &SqlitePool, limit: i64) -> Result<Vec<AuditLogEntry>> {
    sqlx::query_as(
        r#"
        SELECT id, tool_name, query, row_count, execution_time_ms, recorded_at
        FROM audit_log
        ORDER BY id DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|e| WardenError::persistence(format!("Failed to read audit log: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::migrations;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let pool = test_pool().await;

        insert(&pool, &AuditRecord::new("list_tables", "SELECT 1", 3, 7))
            .await
            .unwrap();
        insert(&pool, &AuditRecord::new("query_database", "SELECT 2", 1, 2))
            .await
            .unwrap();

        let entries = recent(&pool, 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].tool_name, "query_database");
        assert_eq!(entries[1].row_count, 3);
        assert!(entries[1].recorded_at.ends_with('Z'));
    }

    #[tokio::test]
    async fn test_recent_respects_limit() {
        let pool = test_pool().await;
        for i in 0..5 {
            insert(&pool, &AuditRecord::new("query_database", &format!("SELECT {i}"), 1, 1))
                .await
                .unwrap();
        }

        assert_eq!(recent(&pool, 2).await.unwrap().len(), 2);
    }
}
