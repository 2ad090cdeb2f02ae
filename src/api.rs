//! Front-end actions: natural-language queries and query memory.
//!
//! Every route here sits behind the [`AccessGate`]; the session endpoint does not.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::WardenError;
use crate::mcp::ServerState;
use crate::memory::RememberRequest;
use crate::orchestrator::{build_history, ConversationTurn, Exchange};

pub const UNAUTHORIZED: &str = "Unauthorized";
pub const MISSING_PROMPT: &str = "Please provide a prompt";
const NOT_CONFIGURED: &str = "This action is not configured on the server";

/// Stands in for "authenticated and approved": a bearer token compared against the
/// configured one. With no token configured every request is refused.
#[derive(Debug, Clone, Default)]
pub struct AccessGate {
    token: Option<String>,
}

impl AccessGate {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.token.is_some()
    }

    pub fn allows(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = &self.token else {
            return false;
        };
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|presented| constant_time_eq(presented.as_bytes(), expected.as_bytes()))
            .unwrap_or(false)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn failure(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(json!({"success": false, "error": error.into()}))).into_response()
}

fn unauthorized() -> Response {
    failure(StatusCode::UNAUTHORIZED, UNAUTHORIZED)
}

/// Entries of `body[key]` that deserialize as `T`; anything else is skipped.
fn array_of<T: DeserializeOwned>(body: &Value, key: &str) -> Option<Vec<T>> {
    body.get(key).and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect()
    })
}

/// Prompt and history as sent by the front end. Anything malformed degrades gracefully.
///
/// History arrives either as ready-made `conversationHistory` turns or as prior
/// `exchanges` (prompt plus outcome), which are summarized here. Exchanges win when both
/// are present.
fn parse_query_body(body: &Value) -> (Option<String>, Vec<ConversationTurn>) {
    let prompt = body
        .get("prompt")
        .and_then(Value::as_str)
        .filter(|p| !p.is_empty())
        .map(str::to_string);

    let history = match array_of::<Exchange>(body, "exchanges") {
        Some(exchanges) => build_history(&exchanges),
        None => array_of(body, "conversationHistory").unwrap_or_default(),
    };

    (prompt, history)
}

/// `POST /api/query`
pub async fn query(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Option<Json<Value>>,
) -> Response {
    if !state.gate.allows(&headers) {
        return unauthorized();
    }
    let Some(orchestrator) = &state.orchestrator else {
        return failure(StatusCode::SERVICE_UNAVAILABLE, NOT_CONFIGURED);
    };

    let body = body.map(|Json(v)| v).unwrap_or(Value::Null);
    let (prompt, history) = parse_query_body(&body);
    let Some(prompt) = prompt else {
        return failure(StatusCode::BAD_REQUEST, MISSING_PROMPT);
    };

    debug!(history = history.len(), "Natural-language query received");
    let outcome = orchestrator.ask(&prompt, &history).await;
    Json(outcome).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RememberBody {
    pub natural_language: String,
    #[serde(rename = "generatedSQL")]
    pub generated_sql: String,
    pub tier: u8,
    #[serde(default)]
    pub remembered_by: Option<String>,
    #[serde(default)]
    pub remembered_by_name: Option<String>,
}

/// `POST /api/remember`
pub async fn remember(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Option<Json<Value>>,
) -> Response {
    if !state.gate.allows(&headers) {
        return unauthorized();
    }
    let Some(memory) = &state.memory else {
        return failure(StatusCode::SERVICE_UNAVAILABLE, NOT_CONFIGURED);
    };

    let body = body.map(|Json(v)| v).unwrap_or(Value::Null);
    let body: RememberBody = match serde_json::from_value(body) {
        Ok(body) => body,
        Err(e) => return failure(StatusCode::BAD_REQUEST, format!("Invalid request: {e}")),
    };

    let request = RememberRequest {
        natural_language: body.natural_language,
        generated_sql: body.generated_sql,
        tier: body.tier,
        remembered_by: body.remembered_by.unwrap_or_else(|| "api".to_string()),
        remembered_by_name: body.remembered_by_name,
    };

    match memory.remember(request).await {
        Ok(outcome) => Json(json!({"success": true, "id": outcome.id()})).into_response(),
        Err(WardenError::InvalidInput(reason)) => failure(StatusCode::BAD_REQUEST, reason),
        Err(e) => {
            error!(error = %e, "Failed to remember query");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save query")
        }
    }
}

/// `GET /api/memory`
pub async fn list_memory(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    if !state.gate.allows(&headers) {
        return unauthorized();
    }
    let Some(memory) = &state.memory else {
        return failure(StatusCode::SERVICE_UNAVAILABLE, NOT_CONFIGURED);
    };

    match memory.list().await {
        Ok(queries) => Json(json!({"success": true, "queries": queries})).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list remembered queries");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch queries")
        }
    }
}

/// `DELETE /api/memory/:id`
pub async fn forget_memory(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    if !state.gate.allows(&headers) {
        return unauthorized();
    }
    let Some(memory) = &state.memory else {
        return failure(StatusCode::SERVICE_UNAVAILABLE, NOT_CONFIGURED);
    };

    match memory.forget(id).await {
        Ok(true) => Json(json!({"success": true})).into_response(),
        Ok(false) => failure(StatusCode::NOT_FOUND, "Query not found"),
        Err(e) => {
            error!(id, error = %e, "Failed to forget query");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete query")
        }
    }
}
