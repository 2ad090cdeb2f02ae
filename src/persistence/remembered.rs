//! Remembered query persistence.
//!
//! Storage for natural-language questions whose generated SQL a user confirmed as correct.
//! Rows are unique by `generated_sql`.

use crate::error::{Result, WardenError};
use crate::memory::QueryCategory;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;
use std::str::FromStr;

/// A remembered query as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RememberedQuery {
    pub id: i64,
    pub natural_language: String,
    #[serde(rename = "generatedSQL")]
    pub generated_sql: String,
    pub tables: Vec<String>,
    pub joins: Vec<String>,
    pub category: QueryCategory,
    pub remembered_by: String,
    pub remembered_by_name: String,
    pub tier: u8,
    pub created_at: String,
}

/// Fields for a new remembered query. Derived fields are computed by the caller.
#[derive(Debug, Clone)]
pub struct NewRememberedQuery {
    pub natural_language: String,
    pub generated_sql: String,
    pub tables: Vec<String>,
    pub joins: Vec<String>,
    pub category: QueryCategory,
    pub remembered_by: String,
    pub remembered_by_name: String,
    pub tier: u8,
}

/// Result of a remember call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RememberOutcome {
    /// A new row was inserted.
    Created(i64),
    /// The same SQL was already remembered; nothing changed.
    AlreadyKnown(i64),
}

impl RememberOutcome {
    pub fn id(&self) -> i64 {
        match self {
            Self::Created(id) | Self::AlreadyKnown(id) => *id,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct RememberedQueryRow {
    id: i64,
    natural_language: String,
    generated_sql: String,
    tables: String,
    joins: String,
    category: String,
    remembered_by: String,
    remembered_by_name: String,
    tier: i64,
    created_at: String,
}

impl RememberedQueryRow {
    fn into_query(self) -> Result<RememberedQuery> {
        let tables = decode_list(&self.tables, "tables")?;
        let joins = decode_list(&self.joins, "joins")?;
        Ok(RememberedQuery {
            id: self.id,
            natural_language: self.natural_language,
            generated_sql: self.generated_sql,
            tables,
            joins,
            category: QueryCategory::from_str(&self.category).unwrap_or_default(),
            remembered_by: self.remembered_by,
            remembered_by_name: self.remembered_by_name,
            tier: u8::try_from(self.tier).unwrap_or(1),
            created_at: self.created_at,
        })
    }
}

fn decode_list(raw: &str, column: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw)
        .map_err(|e| WardenError::persistence(format!("Corrupt {column} column: {e}")))
}

fn encode_list(values: &[String]) -> Result<String> {
    serde_json::to_string(values)
        .map_err(|e| WardenError::persistence(format!("Failed to encode list: {e}")))
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, natural_language, generated_sql, tables, joins, category,
           remembered_by, remembered_by_name, tier, created_at
    FROM remembered_queries
"#;

/// Stores a remembered query unless the same SQL is already present.
pub async fn remember(pool: &SqlitePool, query: &NewRememberedQuery) -> Result<RememberOutcome> {
    let result = sqlx::query(
        r#"
        INSERT INTO remembered_queries
            (natural_language, generated_sql, tables, joins, category,
             remembered_by, remembered_by_name, tier)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(generated_sql) DO NOTHING
        "#,
    )
    .bind(&query.natural_language)
    .bind(&query.generated_sql)
    .bind(encode_list(&query.tables)?)
    .bind(encode_list(&query.joins)?)
    .bind(query.category.as_str())
    .bind(&query.remembered_by)
    .bind(&query.remembered_by_name)
    .bind(i64::from(query.tier))
    .execute(pool)
    .await
    .map_err(|e| {
        if e.to_string().contains("CHECK constraint") {
            WardenError::persistence(format!("Invalid tier {}; expected 1 or 2", query.tier))
        } else {
            WardenError::persistence(format!("Failed to remember query: {e}"))
        }
    })?;

    if result.rows_affected() > 0 {
        return Ok(RememberOutcome::Created(result.last_insert_rowid()));
    }

    let (id,): (i64,) =
        sqlx::query_as("SELECT id FROM remembered_queries WHERE generated_sql = ?")
            .bind(&query.generated_sql)
            .fetch_one(pool)
            .await
            .map_err(|e| WardenError::persistence(format!("Failed to look up query: {e}")))?;

    Ok(RememberOutcome::AlreadyKnown(id))
}

/// Gets a remembered query by ID.
pub async fn get(pool: &SqlitePool, id: i64) -> Result<Option<RememberedQuery>> {
    let row: Option<RememberedQueryRow> =
        sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(|e| WardenError::persistence(format!("Failed to get remembered query: {e}")))?;

    row.map(RememberedQueryRow::into_query).transpose()
}

/// Lists every remembered query, newest first.
pub async fn list(pool: &SqlitePool) -> Result<Vec<RememberedQuery>> {
    let rows: Vec<RememberedQueryRow> =
        sqlx::query_as(&format!("{SELECT_COLUMNS} ORDER BY created_at DESC, id DESC"))
            .fetch_all(pool)
            .await
            .map_err(|e| {
                WardenError::persistence(format!("Failed to list remembered queries: {e}"))
            })?;

    rows.into_iter().map(RememberedQueryRow::into_query).collect()
}

/// Deletes a remembered query. Returns false when no row had that ID.
pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM remembered_queries WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| WardenError::persistence(format!("Failed to delete remembered query: {e}")))?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::migrations;
    use pretty_assertions::assert_eq;
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

    fn sample(sql: &str) -> NewRememberedQuery {
        NewRememberedQuery {
            natural_language: "How many invoices were paid?".to_string(),
            generated_sql: sql.to_string(),
            tables: vec!["invoices".to_string()],
            joins: vec![],
            category: QueryCategory::Billing,
            remembered_by: "user-1".to_string(),
            remembered_by_name: "Ana".to_string(),
            tier: 1,
        }
    }

    #[tokio::test]
    async fn test_remember_and_get() {
        let pool = test_pool().await;

        let outcome = remember(&pool, &sample("SELECT COUNT(*) FROM invoices"))
            .await
            .unwrap();
        assert!(matches!(outcome, RememberOutcome::Created(_)));

        let stored = get(&pool, outcome.id()).await.unwrap().unwrap();
        assert_eq!(stored.generated_sql, "SELECT COUNT(*) FROM invoices");
        assert_eq!(stored.tables, vec!["invoices".to_string()]);
        assert_eq!(stored.category, QueryCategory::Billing);
        assert_eq!(stored.tier, 1);
    }

    #[tokio::test]
    async fn test_remember_same_sql_is_deduplicated() {
        let pool = test_pool().await;

        let first = remember(&pool, &sample("SELECT 1")).await.unwrap();
        let second = remember(&pool, &sample("SELECT 1")).await.unwrap();

        assert_eq!(second, RememberOutcome::AlreadyKnown(first.id()));
        assert_eq!(list(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_tier_rejected() {
        let pool = test_pool().await;
        let mut query = sample("SELECT 2");
        query.tier = 3;

        let err = remember(&pool, &query).await.unwrap_err();
        assert!(err.to_string().contains("Invalid tier"));
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let pool = test_pool().await;
        remember(&pool, &sample("SELECT 1")).await.unwrap();
        remember(&pool, &sample("SELECT 2")).await.unwrap();
        remember(&pool, &sample("SELECT 3")).await.unwrap();

        let sqls: Vec<String> = list(&pool)
            .await
            .unwrap()
            .into_iter()
            .map(|q| q.generated_sql)
            .collect();
        assert_eq!(sqls, vec!["SELECT 3", "SELECT 2", "SELECT 1"]);
    }

    #[tokio::test]
    async fn test_delete() {
        let pool = test_pool().await;
        let id = remember(&pool, &sample("SELECT 1")).await.unwrap().id();

        assert!(delete(&pool, id).await.unwrap());
        assert!(!delete(&pool, id).await.unwrap());
        assert!(get(&pool, id).await.unwrap().is_none());
    }
}
