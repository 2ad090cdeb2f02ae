//! Query memory: previously confirmed question-to-SQL mappings used as prompt enrichment.
//!
//! [`QueryMemory`] owns the remembered-query store and a cached text summary of it.
//! The summary is rebuilt at most once per TTL and dropped on every write.

mod sql_helpers;

pub use sql_helpers::{detect_category, extract_joins, extract_tables, QueryCategory};

use crate::error::{Result, WardenError};
use crate::persistence::{remembered, NewRememberedQuery, RememberOutcome, RememberedQuery, StateDb};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Summary cache lifetime.
pub const SUMMARY_TTL: Duration = Duration::from_secs(5 * 60);

const EXAMPLES_PER_CATEGORY: usize = 5;
const MAX_EXAMPLE_SQL_CHARS: usize = 200;
const SUMMARY_HEADER: &str = "QUERY MEMORY — Previously verified working queries. \
                              Use these as reference for similar questions:";

/// Source of the enrichment block injected into generation prompts.
#[async_trait]
pub trait MemorySource: Send + Sync {
    /// Returns the enrichment text, empty when nothing has been remembered.
    async fn summary(&self) -> Result<String>;
}

/// A confirmed question and the SQL that answered it.
#[derive(Debug, Clone)]
pub struct RememberRequest {
    pub natural_language: String,
    pub generated_sql: String,
    pub tier: u8,
    pub remembered_by: String,
    pub remembered_by_name: Option<String>,
}

struct CachedSummary {
    built_at: Instant,
    text: String,
}

/// Remembered-query store with a TTL-cached summary.
pub struct QueryMemory {
    store: Arc<StateDb>,
    cache: Mutex<Option<CachedSummary>>,
    ttl: Duration,
}

impl QueryMemory {
    pub fn new(store: Arc<StateDb>) -> Self {
        Self {
            store,
            cache: Mutex::new(None),
            ttl: SUMMARY_TTL,
        }
    }

    /// Overrides the summary cache lifetime.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Stores a confirmed query. Remembering the same SQL twice is a successful no-op.
    pub async fn remember(&self, request: RememberRequest) -> Result<RememberOutcome> {
        let natural_language = request.natural_language.trim().to_string();
        let generated_sql = request.generated_sql.trim().to_string();

        if natural_language.is_empty() {
            return Err(WardenError::invalid_input("Natural language question is required"));
        }
        if generated_sql.is_empty() {
            return Err(WardenError::invalid_input("Generated SQL is required"));
        }
        if !matches!(request.tier, 1 | 2) {
            return Err(WardenError::invalid_input(format!(
                "Invalid tier {}; expected 1 or 2",
                request.tier
            )));
        }

        let tables = extract_tables(&generated_sql);
        let joins = extract_joins(&generated_sql);
        let category = detect_category(&tables);

        let new_query = NewRememberedQuery {
            natural_language,
            generated_sql,
            tables,
            joins,
            category,
            remembered_by: request.remembered_by.trim().to_string(),
            remembered_by_name: request
                .remembered_by_name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "Unknown".to_string()),
            tier: request.tier,
        };

        let outcome = remembered::remember(self.store.pool(), &new_query).await?;
        if let RememberOutcome::Created(id) = outcome {
            info!(id, category = %category, "Remembered query");
            self.invalidate();
        }
        Ok(outcome)
    }

    /// Deletes a remembered query. Returns false when no query has that id.
    pub async fn forget(&self, id: i64) -> Result<bool> {
        let deleted = remembered::delete(self.store.pool(), id).await?;
        if deleted {
            self.invalidate();
        }
        Ok(deleted)
    }

    /// Lists remembered queries, newest first.
    pub async fn list(&self) -> Result<Vec<RememberedQuery>> {
        remembered::list(self.store.pool()).await
    }

    /// Drops the cached summary.
    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            *cache = None;
        }
    }

    fn cached(&self) -> Option<String> {
        let cache = self.cache.lock().ok()?;
        cache
            .as_ref()
            .filter(|c| c.built_at.elapsed() < self.ttl)
            .map(|c| c.text.clone())
    }
}

#[async_trait]
impl MemorySource for QueryMemory {
    async fn summary(&self) -> Result<String> {
        if let Some(text) = self.cached() {
            debug!("Query memory summary served from cache");
            return Ok(text);
        }

        let queries = self.list().await?;
        let text = build_summary(&queries);
        info!(
            queries = queries.len(),
            chars = text.len(),
            "Built query memory summary"
        );

        if let Ok(mut cache) = self.cache.lock() {
            *cache = Some(CachedSummary {
                built_at: Instant::now(),
                text: text.clone(),
            });
        }
        Ok(text)
    }
}

fn truncate_sql(sql: &str) -> String {
    match sql.char_indices().nth(MAX_EXAMPLE_SQL_CHARS) {
        Some((cut, _)) => format!("{}...", &sql[..cut]),
        None => sql.to_string(),
    }
}

/// Renders the enrichment block from queries ordered newest first.
///
/// Categories appear in the order their newest query does, each with at most five
/// examples.
pub fn build_summary(queries: &[RememberedQuery]) -> String {
    if queries.is_empty() {
        return String::new();
    }

    let mut lines = vec![SUMMARY_HEADER.to_string()];

    let mut joins: Vec<&str> = Vec::new();
    for join in queries.iter().flat_map(|q| q.joins.iter()) {
        if !joins.contains(&join.as_str()) {
            joins.push(join);
        }
    }
    if !joins.is_empty() {
        lines.push(String::new());
        lines.push(format!("Known working join patterns: {}", joins.join(", ")));
    }

    let mut groups: Vec<(QueryCategory, Vec<&RememberedQuery>)> = Vec::new();
    for query in queries {
        match groups.iter_mut().find(|(c, _)| *c == query.category) {
            Some((_, items)) => items.push(query),
            None => groups.push((query.category, vec![query])),
        }
    }

    for (category, items) in groups {
        lines.push(String::new());
        lines.push(format!("[{}]", category.label()));
        for item in items.into_iter().take(EXAMPLES_PER_CATEGORY) {
            lines.push(format!("Q: {}", item.natural_language));
            lines.push(format!("SQL: {}", truncate_sql(&item.generated_sql)));
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn query(id: i64, question: &str, sql: &str, category: QueryCategory) -> RememberedQuery {
        RememberedQuery {
            id,
            natural_language: question.to_string(),
            generated_sql: sql.to_string(),
            tables: extract_tables(sql),
            joins: extract_joins(sql),
            category,
            remembered_by: "u1".to_string(),
            remembered_by_name: "Unknown".to_string(),
            tier: 1,
            created_at: String::new(),
        }
    }

    fn request(question: &str, sql: &str) -> RememberRequest {
        RememberRequest {
            natural_language: question.to_string(),
            generated_sql: sql.to_string(),
            tier: 1,
            remembered_by: "u1".to_string(),
            remembered_by_name: None,
        }
    }

    async fn memory() -> QueryMemory {
        QueryMemory::new(Arc::new(StateDb::open_in_memory().await.unwrap()))
    }

    #[test]
    fn test_empty_summary() {
        assert_eq!(build_summary(&[]), "");
    }

    #[test]
    fn test_summary_layout() {
        let queries = vec![
            query(
                2,
                "Unpaid invoices",
                "SELECT * FROM invoices i JOIN persons p ON i.person_id = p.id",
                QueryCategory::Billing,
            ),
            query(1, "Open cases", "SELECT * FROM cases", QueryCategory::Cases),
        ];

        let expected = [
            SUMMARY_HEADER,
            "",
            "Known working join patterns: i→p",
            "",
            "[Billing & Invoices]",
            "Q: Unpaid invoices",
            "SQL: SELECT * FROM invoices i JOIN persons p ON i.person_id = p.id",
            "",
            "[Cases & Services]",
            "Q: Open cases",
            "SQL: SELECT * FROM cases",
        ]
        .join("\n");
        assert_eq!(build_summary(&queries), expected);
    }

    #[test]
    fn test_summary_caps_examples_and_truncates_sql() {
        let long_sql = format!("SELECT {} FROM cases", "x, ".repeat(100));
        let queries: Vec<RememberedQuery> = (0..7)
            .map(|i| query(i, &format!("q{i}"), &long_sql, QueryCategory::Cases))
            .collect();

        let summary = build_summary(&queries);
        assert_eq!(summary.matches("Q: ").count(), 5);
        assert!(summary.contains("Q: q4"));
        assert!(!summary.contains("Q: q5"));
        let sql_line = summary.lines().find(|l| l.starts_with("SQL: ")).unwrap();
        assert_eq!(sql_line.chars().count(), "SQL: ".len() + 200 + 3);
    }

    #[test]
    fn test_summary_without_joins_has_no_join_line() {
        let queries = vec![query(1, "All users", "SELECT * FROM users", QueryCategory::Staff)];
        assert!(!build_summary(&queries).contains("Known working join patterns"));
    }

    #[tokio::test]
    async fn test_remember_derives_fields() {
        let memory = memory().await;
        memory
            .remember(request(
                "  Cases per client  ",
                "SELECT * FROM cases JOIN persons ON cases.client_id = persons.id",
            ))
            .await
            .unwrap();

        let stored = &memory.list().await.unwrap()[0];
        assert_eq!(stored.natural_language, "Cases per client");
        assert_eq!(stored.tables, vec!["cases", "persons"]);
        assert_eq!(stored.joins, vec!["cases→persons"]);
        assert_eq!(stored.category, QueryCategory::Cases);
        assert_eq!(stored.remembered_by_name, "Unknown");
    }

    #[tokio::test]
    async fn test_remember_rejects_bad_tier() {
        let memory = memory().await;
        let mut req = request("q", "SELECT 1");
        req.tier = 0;
        let err = memory.remember(req).await.unwrap_err();
        assert!(matches!(err, WardenError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_summary_cache_invalidated_on_write() {
        let memory = memory().await;
        assert_eq!(memory.summary().await.unwrap(), "");

        memory
            .remember(request("All users", "SELECT * FROM users"))
            .await
            .unwrap();
        let summary = memory.summary().await.unwrap();
        assert!(summary.contains("Q: All users"));

        let id = memory.list().await.unwrap()[0].id;
        assert!(memory.forget(id).await.unwrap());
        assert_eq!(memory.summary().await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_summary_served_from_cache_within_ttl() {
        let memory = memory().await;
        memory
            .remember(request("All users", "SELECT * FROM users"))
            .await
            .unwrap();
        let first = memory.summary().await.unwrap();

        // Write behind the cache's back
        remembered::delete(memory.store.pool(), memory.list().await.unwrap()[0].id)
            .await
            .unwrap();
        assert_eq!(memory.summary().await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_forget_missing_query() {
        let memory = memory().await;
        assert!(!memory.forget(42).await.unwrap());
    }
}
