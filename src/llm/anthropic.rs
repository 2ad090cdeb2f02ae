//! Anthropic Messages API client.
//!
//! One non-streaming request per generation attempt. The system prompt travels in the
//! top-level `system` field; conversation turns go in `messages` in order.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::{Result, WardenError};
use crate::llm::types::{Message, Role};
use crate::llm::LlmClient;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Anthropic client configuration.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    pub max_tokens: u32,
}

impl AnthropicConfig {
    /// Builds a config from the `[llm]` section and a resolved key.
    pub fn from_llm_config(api_key: impl Into<String>, llm: &LlmConfig) -> Self {
        Self {
            api_key: api_key.into(),
            model: llm.model.clone(),
            timeout: Duration::from_secs(llm.timeout_secs),
            max_tokens: llm.max_tokens,
        }
    }
}

pub struct AnthropicClient {
    config: AnthropicConfig,
    http: Client,
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| WardenError::llm(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { config, http })
    }

    fn request<'a>(&'a self, messages: &'a [Message]) -> MessagesRequest<'a> {
        let mut system = None;
        let mut turns = Vec::with_capacity(messages.len());
        for message in messages {
            match message.role {
                Role::System => system = Some(message.content.as_str()),
                role => turns.push(Turn {
                    role,
                    content: &message.content,
                }),
            }
        }
        MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system,
            messages: turns,
        }
    }
}

fn transport_error(e: reqwest::Error) -> WardenError {
    if e.is_timeout() {
        WardenError::llm("Model request timed out")
    } else if e.is_connect() {
        WardenError::llm("Could not reach the model provider")
    } else {
        WardenError::llm(format!("Model request failed: {e}"))
    }
}

fn status_error(status: StatusCode, body: &str) -> WardenError {
    match status {
        StatusCode::UNAUTHORIZED => {
            WardenError::llm("Authentication failed. Check ANTHROPIC_API_KEY.")
        }
        StatusCode::TOO_MANY_REQUESTS => WardenError::llm("Rate limited. Please wait."),
        _ => match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => WardenError::llm(format!("Model provider error: {}", parsed.error.message)),
            Err(_) => WardenError::llm(format!("Model provider error ({status})")),
        },
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let request = self.request(messages);
        debug!(model = %self.config.model, turns = request.messages.len(), "Requesting completion");

        let response = self
            .http
            .post(MESSAGES_URL)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        let reply: MessagesResponse = serde_json::from_str(&body)
            .map_err(|e| WardenError::llm(format!("Unreadable model response: {e}")))?;
        if reply.stop_reason.as_deref() == Some("max_tokens") {
            warn!(max_tokens = self.config.max_tokens, "Model reply was truncated");
        }

        // Empty text is passed through; the orchestrator classifies it.
        Ok(reply.text())
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Turn<'a>>,
}

#[derive(Debug, Serialize)]
struct Turn<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

impl MessagesResponse {
    fn text(self) -> String {
        self.content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> AnthropicClient {
        let llm = LlmConfig {
            provider: "anthropic".to_string(),
            model: "claude-test".to_string(),
            max_tokens: 1024,
            timeout_secs: 30,
        };
        AnthropicClient::new(AnthropicConfig::from_llm_config("sk-ant-test", &llm)).unwrap()
    }

    #[test]
    fn test_config_from_llm_config() {
        let client = client();
        assert_eq!(client.config.model, "claude-test");
        assert_eq!(client.config.timeout, Duration::from_secs(30));
        assert_eq!(client.config.max_tokens, 1024);
    }

    #[test]
    fn test_request_body_shape() {
        let client = client();
        let messages = vec![
            Message::system("You are a data analyst."),
            Message::user("How many cases?"),
            Message::assistant("<message>42</message>"),
            Message::user("And open ones?"),
        ];

        let body = serde_json::to_value(client.request(&messages)).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "claude-test",
                "max_tokens": 1024,
                "system": "You are a data analyst.",
                "messages": [
                    {"role": "user", "content": "How many cases?"},
                    {"role": "assistant", "content": "<message>42</message>"},
                    {"role": "user", "content": "And open ones?"}
                ]
            })
        );
    }

    #[test]
    fn test_request_omits_missing_system() {
        let client = client();
        let messages = [Message::user("hi")];
        let body = serde_json::to_value(client.request(&messages)).unwrap();
        assert!(body.get("system").is_none());
    }

    #[test]
    fn test_response_joins_text_blocks() {
        let body = r#"{"content":[{"type":"text","text":"<sql>SELECT 1"},{"type":"tool_use","id":"x"},{"type":"text","text":"</sql>"}],"stop_reason":"end_turn"}"#;
        let reply: MessagesResponse = serde_json::from_str(body).unwrap();
        assert_eq!(reply.text(), "<sql>SELECT 1</sql>");
    }

    #[test]
    fn test_empty_content_is_empty_text() {
        let reply: MessagesResponse = serde_json::from_str(r#"{"content":[]}"#).unwrap();
        assert_eq!(reply.text(), "");
    }

    #[test]
    fn test_status_errors() {
        assert!(status_error(StatusCode::UNAUTHORIZED, "")
            .to_string()
            .contains("Authentication failed"));
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "")
            .to_string()
            .contains("Rate limited"));
        assert_eq!(
            status_error(StatusCode::BAD_REQUEST, r#"{"error":{"message":"max_tokens too large"}}"#)
                .to_string(),
            "LLM error: Model provider error: max_tokens too large"
        );
        assert_eq!(
            status_error(StatusCode::BAD_GATEWAY, "<html>").to_string(),
            "LLM error: Model provider error (502 Bad Gateway)"
        );
    }
}
