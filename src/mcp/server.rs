//! HTTP surface: the session endpoint, health check and front-end actions.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::protocol::{is_initialize_request, JsonRpcError, JsonRpcResponse, SERVER_ERROR};
use crate::api::{self, AccessGate};
use crate::config::ServerConfig;
use crate::db::DatabaseClient;
use crate::error::{Result, WardenError};
use crate::memory::QueryMemory;
use crate::orchestrator::Orchestrator;
use crate::session::SessionRegistry;

/// Header carrying the session id in both directions.
pub const SESSION_HEADER: &str = "mcp-session-id";

const BAD_SESSION_REQUEST: &str = "Bad Request: missing session ID or not an initialize request";
const INVALID_SESSION: &str = "Invalid or missing session ID";

/// Shared state behind every route.
pub struct ServerState {
    pub sessions: Arc<SessionRegistry>,
    pub orchestrator: Option<Arc<Orchestrator>>,
    pub memory: Option<Arc<QueryMemory>>,
    pub gate: AccessGate,
    pub server_name: String,
    pub server_version: String,
}

impl ServerState {
    pub fn new(sessions: Arc<SessionRegistry>, config: &ServerConfig) -> Self {
        Self {
            sessions,
            orchestrator: None,
            memory: None,
            gate: AccessGate::new(config.api_token.clone()),
            server_name: config.name.clone(),
            server_version: config.version.clone(),
        }
    }

    pub fn with_orchestrator(mut self, orchestrator: Arc<Orchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    pub fn with_memory(mut self, memory: Arc<QueryMemory>) -> Self {
        self.memory = Some(memory);
        self
    }
}

fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

fn rpc_error(status: StatusCode, code: i64, message: impl Into<String>) -> Response {
    let body = JsonRpcResponse::failure(Value::Null, JsonRpcError::new(code, message)).to_value();
    (status, Json(body)).into_response()
}

fn reply_with_session(session_id: &str, reply: Option<Value>) -> Response {
    let mut response = match reply {
        Some(body) => (StatusCode::OK, Json(body)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

/// `GET /health`
async fn health(State(state): State<Arc<ServerState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "server": state.server_name,
        "version": state.server_version,
    }))
}

/// `POST /mcp`
async fn post_session(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let message: Value = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Unparsable session request");
            return rpc_error(
                StatusCode::BAD_REQUEST,
                super::protocol::PARSE_ERROR,
                format!("Parse error: {e}"),
            );
        }
    };

    match session_id(&headers) {
        Some(id) => match state.sessions.route(id, message).await {
            Ok(reply) => reply_with_session(id, reply),
            Err(WardenError::Protocol(_)) => {
                rpc_error(StatusCode::BAD_REQUEST, SERVER_ERROR, BAD_SESSION_REQUEST)
            }
            Err(e) => {
                error!(error = %e, "Session request failed");
                rpc_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    super::protocol::INTERNAL_ERROR,
                    "Internal server error",
                )
            }
        },
        None if is_initialize_request(&message) => match state.sessions.initialize(message).await {
            Ok(session) => match session.session_id {
                Some(id) => reply_with_session(&id, session.response),
                None => match session.response {
                    Some(body) => (StatusCode::BAD_REQUEST, Json(body)).into_response(),
                    None => rpc_error(StatusCode::BAD_REQUEST, SERVER_ERROR, BAD_SESSION_REQUEST),
                },
            },
            Err(e) => {
                warn!(error = %e, "Session initialization failed");
                rpc_error(StatusCode::SERVICE_UNAVAILABLE, SERVER_ERROR, e.to_string())
            }
        },
        None => rpc_error(StatusCode::BAD_REQUEST, SERVER_ERROR, BAD_SESSION_REQUEST),
    }
}

fn invalid_session() -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": INVALID_SESSION}))).into_response()
}

/// `GET /mcp`. No server-push stream is offered.
async fn get_session(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    match session_id(&headers) {
        Some(id) if state.sessions.contains(id) => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        _ => invalid_session(),
    }
}

/// `DELETE /mcp`: client-requested close.
async fn delete_session(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    let Some(id) = session_id(&headers) else {
        return invalid_session();
    };
    if state.sessions.remove(id).await {
        StatusCode::OK.into_response()
    } else {
        invalid_session()
    }
}

fn cors_layer(origin: &str) -> Result<CorsLayer> {
    let origin = HeaderValue::from_str(origin)
        .map_err(|e| WardenError::config(format!("Invalid CORS origin '{origin}': {e}")))?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(SESSION_HEADER),
        ])
        .expose_headers([HeaderName::from_static(SESSION_HEADER)]))
}

/// Builds the router with all routes and middleware.
pub fn router(state: Arc<ServerState>, cors_origin: &str) -> Result<Router> {
    Ok(Router::new()
        .route("/health", get(health))
        .route(
            "/mcp",
            post(post_session).get(get_session).delete(delete_session),
        )
        .route("/api/query", post(api::query))
        .route("/api/remember", post(api::remember))
        .route("/api/memory", get(api::list_memory))
        .route("/api/memory/:id", delete(api::forget_memory))
        .layer(cors_layer(cors_origin)?)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Serves until `shutdown` resolves, then closes every session and only then the pool.
pub async fn serve<F>(
    config: &ServerConfig,
    state: Arc<ServerState>,
    db: Arc<dyn DatabaseClient>,
    shutdown: F,
) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = router(state.clone(), &config.cors_origin)?;

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| WardenError::config(format!("Invalid listen address: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| WardenError::internal(format!("Failed to bind {addr}: {e}")))?;

    info!("{} listening on {}", config.name, addr);
    info!("Health check: http://{}/health", addr);
    if !state.gate.is_configured() {
        warn!("No API token configured; /api routes will refuse every request");
    }

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| WardenError::internal(format!("Server error: {e}")));

    info!("Shutting down...");
    state.sessions.shutdown().await;
    match db.close().await {
        Ok(()) => info!("Database pool closed"),
        Err(e) => warn!(error = %e, "Failed to close database pool"),
    }

    served
}
