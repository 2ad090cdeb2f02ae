//! JSON-RPC method dispatch for one session.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use super::protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, INITIALIZE, JSONRPC_VERSION, PROTOCOL_VERSION,
};
use crate::error::WardenError;
use crate::session::MessageHandler;
use crate::tools::{errors, tool_definitions, ToolInvocation, ToolInvoker, ToolSurface};

#[derive(Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Deserialize)]
struct ResourceReadParams {
    uri: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct InitializeParams {
    #[serde(default)]
    protocol_version: Option<String>,
}

fn parse_params<T: for<'de> Deserialize<'de>>(
    params: Option<Value>,
) -> std::result::Result<T, JsonRpcError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| JsonRpcError::invalid_params(format!("Invalid params: {e}")))
}

/// Serves the tool and resource methods over a session channel.
pub struct McpHandler {
    tools: Arc<ToolSurface>,
    server_name: String,
    server_version: String,
}

impl McpHandler {
    pub fn new(
        tools: Arc<ToolSurface>,
        server_name: impl Into<String>,
        server_version: impl Into<String>,
    ) -> Self {
        Self {
            tools,
            server_name: server_name.into(),
            server_version: server_version.into(),
        }
    }

    /// Handles one decoded request. `None` for notifications.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.jsonrpc != JSONRPC_VERSION {
            let id = request.id.unwrap_or(Value::Null);
            return Some(JsonRpcResponse::failure(
                id,
                JsonRpcError::invalid_request("jsonrpc must be \"2.0\""),
            ));
        }

        debug!(method = %request.method, "Dispatching request");
        let outcome = self.dispatch(&request.method, request.params).await;

        let id = match request.id {
            Some(id) => id,
            None => {
                if let Err(e) = outcome {
                    if e.code != super::protocol::METHOD_NOT_FOUND {
                        warn!(method = %request.method, error = %e.message, "Notification failed");
                    }
                }
                return None;
            }
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, error),
        })
    }

    async fn dispatch(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> std::result::Result<Value, JsonRpcError> {
        match method {
            INITIALIZE => {
                let params: InitializeParams = match params {
                    None => InitializeParams::default(),
                    Some(p) => parse_params(Some(p))?,
                };
                Ok(json!({
                    "protocolVersion": params.protocol_version.as_deref().unwrap_or(PROTOCOL_VERSION),
                    "capabilities": {"tools": {}, "resources": {}},
                    "serverInfo": {"name": self.server_name, "version": self.server_version},
                }))
            }
            "notifications/initialized" => Ok(Value::Null),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({"tools": tool_definitions()})),
            "tools/call" => {
                let params: ToolCallParams = parse_params(params)?;
                let invocation = ToolInvocation::from_call(&params.name, params.arguments)
                    .map_err(|e| JsonRpcError::invalid_params(protocol_message(&e)))?;
                let result = self.tools.invoke(invocation).await;
                serde_json::to_value(result)
                    .map_err(|e| JsonRpcError::internal(format!("Failed to encode result: {e}")))
            }
            "resources/list" => Ok(json!({"resources": self.tools.table_resources().await})),
            "resources/read" => {
                let params: ResourceReadParams = parse_params(params)?;
                match self.tools.read_table_resource(&params.uri).await {
                    Ok(contents) => Ok(json!({"contents": [contents]})),
                    Err(e @ WardenError::Protocol(_)) => {
                        Err(JsonRpcError::invalid_params(protocol_message(&e)))
                    }
                    Err(e) => {
                        errors::tool_error(&e);
                        Err(JsonRpcError::internal(errors::user_message(&e)))
                    }
                }
            }
            other => Err(JsonRpcError::method_not_found(other)),
        }
    }
}

/// The message of a protocol error without the category prefix.
fn protocol_message(err: &WardenError) -> String {
    match err {
        WardenError::Protocol(message) => message.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl MessageHandler for McpHandler {
    async fn handle(&self, _session_id: &str, message: Value) -> Option<Value> {
        match message {
            Value::Array(batch) => {
                let mut replies = Vec::with_capacity(batch.len());
                for item in batch {
                    if let Some(reply) = self.handle_value(item).await {
                        replies.push(reply);
                    }
                }
                (!replies.is_empty()).then(|| Value::Array(replies))
            }
            single => self.handle_value(single).await,
        }
    }
}

impl McpHandler {
    async fn handle_value(&self, message: Value) -> Option<Value> {
        let id = message.get("id").cloned();
        match serde_json::from_value::<JsonRpcRequest>(message) {
            Ok(request) => self.handle_request(request).await.map(|r| r.to_value()),
            Err(e) => Some(
                JsonRpcResponse::failure(
                    id.unwrap_or(Value::Null),
                    JsonRpcError::invalid_request(format!("Invalid request: {e}")),
                )
                .to_value(),
            ),
        }
    }
}
