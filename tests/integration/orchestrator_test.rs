//! Orchestrator runs against the real tool surface over the mock database.

use db_warden::audit::AuditTrail;
use db_warden::db::{MockDatabaseClient, MockFailure};
use db_warden::llm::{MockLlmClient, PromptSet};
use db_warden::memory::{QueryMemory, RememberRequest};
use db_warden::orchestrator::{ConversationTurn, Orchestrator};
use db_warden::persistence::StateDb;
use db_warden::safety::SqlValidator;
use db_warden::tools::ToolSurface;
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn surface(db: MockDatabaseClient) -> (Arc<ToolSurface>, Arc<MockDatabaseClient>) {
    let db = Arc::new(db);
    let tools = Arc::new(ToolSurface::new(
        db.clone(),
        SqlValidator::new(10_000, 1000),
        AuditTrail::new(true),
    ));
    (tools, db)
}

fn orchestrator(llm: &MockLlmClient, tools: Arc<ToolSurface>) -> Orchestrator {
    Orchestrator::new(
        Arc::new(llm.clone()),
        tools.clone(),
        PromptSet::default().with_core_schema("persons(id, first_name, last_name)"),
    )
    .with_schema_source(tools)
}

#[tokio::test]
async fn test_generated_select_is_capped_and_executed() {
    let (tools, db) = surface(MockDatabaseClient::with_sample_catalog());
    let llm = MockLlmClient::new()
        .with_response("<message>Everyone.</message><sql>```sql\nSELECT first_name FROM persons;\n```</sql>");

    let outcome = orchestrator(&llm, tools).ask("List people", &[]).await;

    assert!(outcome.success);
    assert_eq!(outcome.tier, Some(1));
    assert_eq!(outcome.generated_sql.as_deref(), Some("SELECT first_name FROM persons"));

    let executed = db.executed();
    assert_eq!(executed.len(), 1);
    assert!(executed[0].0.to_uppercase().contains("LIMIT 1000"));
}

#[tokio::test]
async fn test_execution_failure_escalates_with_full_schema() {
    let (tools, _db) = surface(
        MockDatabaseClient::with_sample_catalog()
            .with_failure("hearings", MockFailure::Execution("[1146] Table 'crm.hearings' doesn't exist".into())),
    );
    let llm = MockLlmClient::new()
        .with_response("<sql>SELECT * FROM hearings</sql>")
        .with_response("<message>Using invoices instead.</message><sql>SELECT total FROM invoices</sql>");

    let outcome = orchestrator(&llm, tools).ask("Show hearings", &[]).await;

    assert!(outcome.success);
    assert_eq!(outcome.tier, Some(2));
    assert_eq!(outcome.generated_sql.as_deref(), Some("SELECT total FROM invoices"));

    let prompts = llm.system_prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("persons(id, first_name, last_name)"));
    assert!(prompts[1].contains("Generated SQL: SELECT * FROM hearings"));
    assert!(prompts[1].contains("invoices(id,case_id,total)"));
}

#[tokio::test]
async fn test_rejected_statement_never_reaches_database() {
    let (tools, db) = surface(MockDatabaseClient::with_sample_catalog());
    let llm = MockLlmClient::new()
        .with_response("<sql>SELECT * FROM persons; DELETE FROM persons</sql>")
        .with_response("<sql>SELECT * FROM persons INTO OUTFILE '/tmp/x'</sql>");

    let outcome = orchestrator(&llm, tools).ask("Everyone", &[]).await;

    assert!(!outcome.success);
    assert_eq!(outcome.tier, Some(2));
    assert!(outcome.error.unwrap().starts_with("Query rejected"));
    assert!(db
        .executed()
        .iter()
        .all(|(sql, _)| sql.contains("information_schema")));
}

#[tokio::test]
async fn test_remembered_queries_reach_tier1_prompt() {
    let (tools, _db) = surface(MockDatabaseClient::with_sample_catalog());
    let store = Arc::new(StateDb::open_in_memory().await.unwrap());
    let memory = Arc::new(QueryMemory::new(store));
    memory
        .remember(RememberRequest {
            natural_language: "Open cases per person".to_string(),
            generated_sql: "SELECT p.id, COUNT(*) FROM persons p JOIN cases c ON c.person_id = p.id GROUP BY p.id"
                .to_string(),
            tier: 2,
            remembered_by: "u-1".to_string(),
            remembered_by_name: Some("Dana".to_string()),
        })
        .await
        .unwrap();

    let llm = MockLlmClient::new().with_response("<sql>SELECT COUNT(*) FROM cases</sql>");
    let history = vec![
        ConversationTurn::user("How many people?"),
        ConversationTurn::assistant("There are 12."),
    ];

    let outcome = orchestrator(&llm, tools)
        .with_memory(memory)
        .ask("And cases?", &history)
        .await;

    assert!(outcome.success);
    let request = &llm.requests()[0];
    assert!(request[0].content.contains("Open cases per person"));
    assert_eq!(request.len(), 4);
    assert_eq!(request[3].content, "And cases?");
}
