//! HTTP surface tests driven through the router without binding a socket.

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use db_warden::audit::AuditTrail;
use db_warden::config::ServerConfig;
use db_warden::db::MockDatabaseClient;
use db_warden::llm::{MockLlmClient, PromptSet};
use db_warden::mcp::{router, McpHandler, ServerState, SESSION_HEADER};
use db_warden::memory::QueryMemory;
use db_warden::orchestrator::Orchestrator;
use db_warden::persistence::StateDb;
use db_warden::safety::SqlValidator;
use db_warden::session::SessionRegistry;
use db_warden::tools::ToolSurface;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const TOKEN: &str = "test-token";

struct Harness {
    app: Router,
    sessions: Arc<SessionRegistry>,
    llm: MockLlmClient,
    store: Arc<StateDb>,
}

async fn harness(llm: MockLlmClient) -> Harness {
    let tools = Arc::new(ToolSurface::new(
        Arc::new(MockDatabaseClient::with_sample_catalog()),
        SqlValidator::new(10_000, 1000),
        AuditTrail::new(false),
    ));
    let sessions = Arc::new(
        SessionRegistry::new(Arc::new(McpHandler::new(tools.clone(), "db-warden", "0.1.0")))
            .with_close_grace(Duration::from_millis(500)),
    );
    let store = Arc::new(StateDb::open_in_memory().await.unwrap());
    let memory = Arc::new(QueryMemory::new(store.clone()));
    let orchestrator = Orchestrator::new(
        Arc::new(llm.clone()),
        tools.clone(),
        PromptSet::default().with_core_schema("cases(id, person_id, status)"),
    )
    .with_schema_source(tools)
    .with_memory(memory.clone());

    let config = ServerConfig {
        api_token: Some(TOKEN.to_string()),
        ..ServerConfig::default()
    };
    let state = ServerState::new(sessions.clone(), &config)
        .with_orchestrator(Arc::new(orchestrator))
        .with_memory(memory);

    Harness {
        app: router(Arc::new(state), &config.cors_origin).unwrap(),
        sessions,
        llm,
        store,
    }
}

fn request(method: Method, uri: &str, session: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(id) = session {
        builder = builder.header(SESSION_HEADER, id);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn authorized(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let mut req = request(method, uri, None, body);
    req.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {TOKEN}").parse().unwrap(),
    );
    req
}

async fn send(app: &Router, req: Request<Body>) -> Response {
    app.clone().oneshot(req).await.unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn initialize() -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {"protocolVersion": "2025-03-26", "capabilities": {}, "clientInfo": {"name": "test"}}
    })
}

async fn open_session(app: &Router) -> String {
    let response = send(app, request(Method::POST, "/mcp", None, Some(initialize()))).await;
    assert_eq!(response.status(), StatusCode::OK);
    response
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_health() {
    let h = harness(MockLlmClient::new()).await;
    let response = send(&h.app, request(Method::GET, "/health", None, None)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["server"], "db-warden");
}

#[tokio::test]
async fn test_initialize_issues_session_header() {
    let h = harness(MockLlmClient::new()).await;
    let response = send(&h.app, request(Method::POST, "/mcp", None, Some(initialize()))).await;

    assert_eq!(response.status(), StatusCode::OK);
    let session_id = response.headers().get(SESSION_HEADER).unwrap().to_str().unwrap().to_string();
    assert!(h.sessions.contains(&session_id));

    let body = body_json(response).await;
    assert_eq!(body["id"], 1);
    assert_eq!(body["result"]["serverInfo"]["name"], "db-warden");
}

#[tokio::test]
async fn test_session_routes_tool_calls() {
    let h = harness(MockLlmClient::new()).await;
    let session_id = open_session(&h.app).await;

    let response = send(
        &h.app,
        request(
            Method::POST,
            "/mcp",
            Some(&session_id),
            Some(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call",
                        "params": {"name": "list_tables", "arguments": {}}})),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["id"], 2);
    assert_eq!(body["result"]["isError"], false);
    assert!(body["result"]["content"][0]["text"]
        .as_str()
        .unwrap()
        .contains("persons"));
}

#[tokio::test]
async fn test_notification_is_accepted() {
    let h = harness(MockLlmClient::new()).await;
    let session_id = open_session(&h.app).await;

    let response = send(
        &h.app,
        request(
            Method::POST,
            "/mcp",
            Some(&session_id),
            Some(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_unknown_session_is_bad_request() {
    let h = harness(MockLlmClient::new()).await;
    let response = send(
        &h.app,
        request(
            Method::POST,
            "/mcp",
            Some("no-such-session"),
            Some(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"})),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32000);
    assert_eq!(body["id"], Value::Null);
}

#[tokio::test]
async fn test_non_initialize_without_session_is_bad_request() {
    let h = harness(MockLlmClient::new()).await;
    let response = send(
        &h.app,
        request(
            Method::POST,
            "/mcp",
            None,
            Some(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"})),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(h.sessions.is_empty());
}

#[tokio::test]
async fn test_unparsable_body() {
    let h = harness(MockLlmClient::new()).await;
    let req = Request::builder()
        .method(Method::POST)
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = send(&h.app, req).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], -32700);
}

#[tokio::test]
async fn test_get_without_stream() {
    let h = harness(MockLlmClient::new()).await;
    let session_id = open_session(&h.app).await;

    let known = send(&h.app, request(Method::GET, "/mcp", Some(&session_id), None)).await;
    assert_eq!(known.status(), StatusCode::METHOD_NOT_ALLOWED);

    let unknown = send(&h.app, request(Method::GET, "/mcp", Some("nope"), None)).await;
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(unknown).await["error"], "Invalid or missing session ID");
}

#[tokio::test]
async fn test_delete_closes_session_once() {
    let h = harness(MockLlmClient::new()).await;
    let session_id = open_session(&h.app).await;

    let first = send(&h.app, request(Method::DELETE, "/mcp", Some(&session_id), None)).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert!(!h.sessions.contains(&session_id));

    let second = send(&h.app, request(Method::DELETE, "/mcp", Some(&session_id), None)).await;
    assert_eq!(second.status(), StatusCode::BAD_REQUEST);

    let after = send(
        &h.app,
        request(
            Method::POST,
            "/mcp",
            Some(&session_id),
            Some(json!({"jsonrpc": "2.0", "id": 3, "method": "ping"})),
        ),
    )
    .await;
    assert_eq!(after.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_shutdown_closes_open_sessions() {
    let h = harness(MockLlmClient::new()).await;
    open_session(&h.app).await;
    open_session(&h.app).await;
    assert_eq!(h.sessions.len(), 2);

    h.sessions.shutdown().await;
    assert!(h.sessions.is_empty());

    let response = send(&h.app, request(Method::POST, "/mcp", None, Some(initialize()))).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_query_requires_token() {
    let h = harness(MockLlmClient::new()).await;
    let response = send(
        &h.app,
        request(Method::POST, "/api/query", None, Some(json!({"prompt": "hi"}))),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(response).await,
        json!({"success": false, "error": "Unauthorized"})
    );
    assert_eq!(h.llm.calls(), 0);
}

#[tokio::test]
async fn test_query_requires_prompt() {
    let h = harness(MockLlmClient::new()).await;
    let response = send(&h.app, authorized(Method::POST, "/api/query", Some(json!({})))).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "Please provide a prompt");
}

#[tokio::test]
async fn test_query_runs_tier1() {
    let h = harness(
        MockLlmClient::new()
            .with_response("<message>Open cases.</message><sql>SELECT * FROM cases WHERE status = 'open'</sql>"),
    )
    .await;

    let response = send(
        &h.app,
        authorized(
            Method::POST,
            "/api/query",
            Some(json!({
                "prompt": "Which cases are open?",
                "conversationHistory": [{"role": "user", "content": "hello"}]
            })),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["tier"], 1);
    assert_eq!(body["generatedSQL"], "SELECT * FROM cases WHERE status = 'open'");
    assert_eq!(body["aiMessage"], "Open cases.");
    assert!(body["data"].as_str().unwrap().contains("rowCount"));
}

#[tokio::test]
async fn test_query_follow_up_from_exchanges() {
    let h = harness(MockLlmClient::new().with_response("<message>Same as before.</message>")).await;

    let response = send(
        &h.app,
        authorized(
            Method::POST,
            "/api/query",
            Some(json!({
                "prompt": "And the closed ones?",
                "exchanges": [{
                    "prompt": "Which cases are open?",
                    "aiMessage": "Open cases.",
                    "generatedSQL": "SELECT * FROM cases WHERE status = 'open'"
                }]
            })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let requests = h.llm.requests();
    let request = &requests[0];
    assert_eq!(request.len(), 4);
    assert_eq!(request[1].content, "Which cases are open?");
    assert!(request[2]
        .content
        .contains("[SQL: SELECT * FROM cases WHERE status = 'open']"));
    assert_eq!(request[3].content, "And the closed ones?");
}

#[tokio::test]
async fn test_remember_list_and_forget() {
    let h = harness(MockLlmClient::new()).await;

    let response = send(
        &h.app,
        authorized(
            Method::POST,
            "/api/remember",
            Some(json!({
                "naturalLanguage": "Open cases",
                "generatedSQL": "SELECT * FROM cases WHERE status = 'open'",
                "tier": 1,
                "rememberedByName": "Dana"
            })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    let id = body["id"].as_i64().unwrap();

    let listed = body_json(send(&h.app, authorized(Method::GET, "/api/memory", None)).await).await;
    assert_eq!(listed["queries"][0]["naturalLanguage"], "Open cases");
    assert_eq!(listed["queries"][0]["rememberedByName"], "Dana");

    let uri = format!("/api/memory/{id}");
    let forgotten = send(&h.app, authorized(Method::DELETE, &uri, None)).await;
    assert_eq!(forgotten.status(), StatusCode::OK);

    let again = send(&h.app, authorized(Method::DELETE, &uri, None)).await;
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_remember_rejects_bad_tier() {
    let h = harness(MockLlmClient::new()).await;
    let response = send(
        &h.app,
        authorized(
            Method::POST,
            "/api/remember",
            Some(json!({"naturalLanguage": "x", "generatedSQL": "SELECT 1", "tier": 3})),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("Invalid tier"));
}

#[tokio::test]
async fn test_memory_storage_failures_are_server_errors() {
    let h = harness(MockLlmClient::new()).await;
    h.store.close().await;

    let remembered = send(
        &h.app,
        authorized(
            Method::POST,
            "/api/remember",
            Some(json!({"naturalLanguage": "Open cases", "generatedSQL": "SELECT * FROM cases", "tier": 1})),
        ),
    )
    .await;
    assert_eq!(remembered.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(remembered).await["error"], "Failed to save query");

    let forgotten = send(&h.app, authorized(Method::DELETE, "/api/memory/1", None)).await;
    assert_eq!(forgotten.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(forgotten).await["error"], "Failed to delete query");

    let listed = send(&h.app, authorized(Method::GET, "/api/memory", None)).await;
    assert_eq!(listed.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
