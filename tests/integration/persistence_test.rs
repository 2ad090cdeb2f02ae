//! Integration tests for the persistence layer.

use db_warden::audit::AuditTrail;
use db_warden::config::AuditConfig;
use db_warden::db::MockDatabaseClient;
use db_warden::memory::{MemorySource, QueryCategory, QueryMemory, RememberRequest};
use db_warden::persistence::{self, RememberOutcome, StateDb};
use db_warden::safety::SqlValidator;
use db_warden::tools::ToolSurface;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

async fn create_test_db() -> (StateDb, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test_state.db");
    let db = StateDb::open(&path).await.unwrap();
    (db, dir)
}

fn request(question: &str, sql: &str) -> RememberRequest {
    RememberRequest {
        natural_language: question.to_string(),
        generated_sql: sql.to_string(),
        tier: 1,
        remembered_by: "u-1".to_string(),
        remembered_by_name: None,
    }
}

#[tokio::test]
async fn test_state_db_creation() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.db");

    let db = StateDb::open(&path).await.unwrap();
    assert!(path.exists());
    assert_eq!(db.path(), Some(path.as_path()));
    db.close().await;
}

#[tokio::test]
async fn test_remembered_queries_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.db");

    {
        let db = Arc::new(StateDb::open(&path).await.unwrap());
        let memory = QueryMemory::new(db.clone());
        memory
            .remember(request(
                "Invoices per case",
                "SELECT c.id, SUM(i.total) FROM cases c JOIN invoices i ON i.case_id = c.id GROUP BY c.id",
            ))
            .await
            .unwrap();
        db.close().await;
    }

    let db = StateDb::open(&path).await.unwrap();
    let stored = persistence::remembered::list(db.pool()).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].natural_language, "Invoices per case");
    assert_eq!(stored[0].remembered_by_name, "Unknown");
    assert!(stored[0].tables.contains(&"invoices".to_string()));
    db.close().await;
}

#[tokio::test]
async fn test_duplicate_sql_is_a_noop() {
    let (db, _dir) = create_test_db().await;
    let memory = QueryMemory::new(Arc::new(db));

    let first = memory
        .remember(request("Open cases", "SELECT * FROM cases WHERE status = 'open'"))
        .await
        .unwrap();
    let second = memory
        .remember(request("Cases still open", "SELECT * FROM cases WHERE status = 'open'"))
        .await
        .unwrap();

    assert!(matches!(first, RememberOutcome::Created(_)));
    assert_eq!(second, RememberOutcome::AlreadyKnown(first.id()));
    assert_eq!(memory.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_summary_tracks_writes() {
    let store = Arc::new(StateDb::open_in_memory().await.unwrap());
    let memory = QueryMemory::new(store).with_ttl(Duration::from_secs(3600));

    assert_eq!(memory.summary().await.unwrap(), "");

    let id = memory
        .remember(request("Everyone", "SELECT * FROM persons"))
        .await
        .unwrap()
        .id();
    let summary = memory.summary().await.unwrap();
    assert!(summary.contains("Q: Everyone"));

    assert!(memory.forget(id).await.unwrap());
    assert_eq!(memory.summary().await.unwrap(), "");
    assert!(!memory.forget(id).await.unwrap());
}

#[tokio::test]
async fn test_category_is_derived_from_tables() {
    let store = Arc::new(StateDb::open_in_memory().await.unwrap());
    let memory = QueryMemory::new(store);
    memory
        .remember(request("Invoice totals", "SELECT total FROM invoices"))
        .await
        .unwrap();

    let stored = memory.list().await.unwrap();
    assert_eq!(stored[0].category, QueryCategory::Billing);
}

#[tokio::test]
async fn test_persisted_audit_trail() {
    let (db, _dir) = create_test_db().await;
    let db = Arc::new(db);
    let audit = AuditTrail::from_config(
        &AuditConfig {
            enabled: true,
            persist: true,
        },
        Some(db.clone()),
    );
    let tools = ToolSurface::new(
        Arc::new(MockDatabaseClient::with_sample_catalog()),
        SqlValidator::new(10_000, 1000),
        audit,
    );

    let result = tools.query_database("SELECT * FROM persons", &[]).await;
    assert!(!result.is_error);

    // Records are written from a spawned task.
    let mut entries = Vec::new();
    for _ in 0..50 {
        entries = persistence::audit_log::recent(db.pool(), 10).await.unwrap();
        if !entries.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].tool_name, "query_database");
    assert_eq!(entries[0].query, "SELECT * FROM persons");
}

#[tokio::test]
async fn test_concurrent_read_access() {
    let (db, _dir) = create_test_db().await;
    let memory = QueryMemory::new(Arc::new(db));

    for i in 0..5 {
        memory
            .remember(request(&format!("Person {i}"), &format!("SELECT * FROM persons WHERE id = {i}")))
            .await
            .unwrap();
    }

    let memory = Arc::new(memory);
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let memory = memory.clone();
            tokio::spawn(async move { memory.list().await })
        })
        .collect();

    for handle in handles {
        let result = handle.await.unwrap();
        assert_eq!(result.unwrap().len(), 5);
    }
}
