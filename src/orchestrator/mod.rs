//! Two-tier natural-language query orchestration.
//!
//! One user turn runs at most two generation attempts. Tier 1 sees the core schema and
//! may escalate, either by asking for more schema or by producing SQL that fails to
//! execute. Tier 2 sees the full schema and the Tier-1 failure. There is no third tier.

pub mod history;

pub use history::{build_history, ConversationTurn, Exchange, TurnRole, HISTORY_WINDOW};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::llm::parser::{clean_sql, leading_keyword, strip_comment_lines};
use crate::llm::{
    needs_full_schema, parse_llm_response, FailureContext, LlmClient, Message, ParsedResponse,
    PromptSet,
};
use crate::memory::MemorySource;
use crate::tools::{ToolInvocation, ToolInvoker, ToolSurface};

/// Longest accepted question, in characters.
pub const MAX_PROMPT_CHARS: usize = 2000;

pub const EMPTY_PROMPT: &str = "Please enter a question";
pub const PROMPT_TOO_LONG: &str = "Question is too long (max 2000 characters)";
const NO_RESPONSE: &str = "AI could not generate a response";
const SELECT_ONLY: &str = "Only SELECT queries are permitted for safety";
const NO_QUERY: &str = "AI could not generate a query";
const RETRY_FAILED: &str = "Query failed after retry";

/// Supplies the complete schema text for Tier 2.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn full_schema(&self) -> Result<String>;
}

#[async_trait]
impl SchemaSource for ToolSurface {
    async fn full_schema(&self) -> Result<String> {
        self.full_schema_text().await
    }
}

/// Result of one user turn, shaped for the front end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(rename = "generatedSQL", default, skip_serializing_if = "Option::is_none")]
    pub generated_sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<u8>,
}

impl QueryOutcome {
    /// A failure that never reached a generation attempt.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// How a single generation attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AttemptOutcome {
    Rows {
        sql: String,
        message: Option<String>,
        data: String,
    },
    TextOnly {
        message: String,
    },
    NeedsFullSchema {
        message: String,
    },
    /// Only `--` comment lines survived cleaning.
    CommentOnly {
        sql: String,
        message: Option<String>,
    },
    NonRetryable {
        sql: Option<String>,
        message: Option<String>,
        reason: String,
    },
    ToolError {
        sql: String,
        message: Option<String>,
        error: String,
    },
}

fn non_empty(text: String) -> Option<String> {
    (!text.trim().is_empty()).then_some(text)
}

impl AttemptOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Rows { .. } => "rows",
            Self::TextOnly { .. } => "text_only",
            Self::NeedsFullSchema { .. } => "needs_full_schema",
            Self::CommentOnly { .. } => "comment_only",
            Self::NonRetryable { .. } => "non_retryable",
            Self::ToolError { .. } => "tool_error",
        }
    }

    /// Terminal outcome for the final tier. `fallback` is used when nothing better explains
    /// a failure.
    fn into_outcome(self, tier: u8, fallback: &str) -> QueryOutcome {
        let tier = Some(tier);
        match self {
            Self::Rows { sql, message, data } => QueryOutcome {
                success: true,
                data: Some(data),
                generated_sql: Some(sql),
                ai_message: message,
                error: None,
                tier,
            },
            Self::TextOnly { message } | Self::NeedsFullSchema { message } => QueryOutcome {
                success: true,
                ai_message: Some(message),
                tier,
                ..Default::default()
            },
            Self::CommentOnly { sql, message } => QueryOutcome {
                success: false,
                error: Some(non_empty(sql.clone()).unwrap_or_else(|| fallback.to_string())),
                generated_sql: non_empty(sql),
                ai_message: message,
                tier,
                data: None,
            },
            Self::NonRetryable {
                sql,
                message,
                reason,
            } => QueryOutcome {
                success: false,
                error: Some(reason),
                generated_sql: sql,
                ai_message: message,
                tier,
                data: None,
            },
            Self::ToolError {
                sql,
                message,
                error,
            } => QueryOutcome {
                success: false,
                error: Some(non_empty(error).unwrap_or_else(|| fallback.to_string())),
                generated_sql: Some(sql),
                ai_message: message,
                tier,
                data: None,
            },
        }
    }
}

/// Drives the generate, validate, execute, escalate cycle.
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    tools: Arc<dyn ToolInvoker>,
    schema: Option<Arc<dyn SchemaSource>>,
    memory: Option<Arc<dyn MemorySource>>,
    prompts: PromptSet,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<dyn ToolInvoker>, prompts: PromptSet) -> Self {
        Self {
            llm,
            tools,
            schema: None,
            memory: None,
            prompts,
        }
    }

    pub fn with_schema_source(mut self, schema: Arc<dyn SchemaSource>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemorySource>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Answers one question. Never fails; problems are reported in the outcome.
    pub async fn ask(&self, prompt: &str, history: &[ConversationTurn]) -> QueryOutcome {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return QueryOutcome::failure(EMPTY_PROMPT);
        }
        if prompt.chars().count() > MAX_PROMPT_CHARS {
            return QueryOutcome::failure(PROMPT_TOO_LONG);
        }

        match self.run(prompt, history).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, category = e.category(), "Natural-language query failed");
                QueryOutcome::failure(e.to_string())
            }
        }
    }

    async fn run(&self, prompt: &str, history: &[ConversationTurn]) -> Result<QueryOutcome> {
        let mut turns: Vec<Message> = history::window(history)
            .iter()
            .map(ConversationTurn::to_message)
            .collect();
        turns.push(Message::user(prompt));

        let memory = self.memory_summary().await;

        let tier1 = self
            .attempt(1, self.prompts.tier1_prompt(&memory), &turns)
            .await?;

        let failure = match tier1 {
            AttemptOutcome::NeedsFullSchema { message } => {
                info!(reason = %message, "Model requested full schema");
                FailureContext {
                    failed_sql: "N/A".to_string(),
                    error_message: message,
                }
            }
            AttemptOutcome::ToolError {
                sql,
                message: _,
                error,
            } => {
                info!(reason = %error, "SQL execution error, retrying with full schema");
                FailureContext {
                    failed_sql: sql,
                    error_message: error,
                }
            }
            terminal => return Ok(terminal.into_outcome(1, NO_QUERY)),
        };

        let full_schema = self.full_schema().await;
        let tier2 = self
            .attempt(
                2,
                self.prompts.tier2_prompt(&memory, &failure, &full_schema),
                &turns,
            )
            .await?;

        Ok(tier2.into_outcome(2, RETRY_FAILED))
    }

    /// One prompt, one model call, at most one tool call.
    async fn attempt(&self, tier: u8, system_prompt: String, turns: &[Message]) -> Result<AttemptOutcome> {
        let started = Instant::now();
        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(Message::system(system_prompt));
        messages.extend_from_slice(turns);

        info!(tier, messages = turns.len(), "Starting generation attempt");
        let raw = self.llm.complete(&messages).await?;
        let outcome = self.classify(raw.trim()).await;

        info!(
            tier,
            outcome = outcome.label(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Generation attempt finished"
        );
        Ok(outcome)
    }

    async fn classify(&self, raw: &str) -> AttemptOutcome {
        if raw.is_empty() {
            return AttemptOutcome::NonRetryable {
                sql: None,
                message: None,
                reason: NO_RESPONSE.to_string(),
            };
        }

        let ParsedResponse { message, sql } = parse_llm_response(raw);

        let Some(sql) = sql else {
            return match message {
                Some(message) if needs_full_schema(&message) => {
                    AttemptOutcome::NeedsFullSchema { message }
                }
                Some(message) => AttemptOutcome::TextOnly { message },
                None => AttemptOutcome::NonRetryable {
                    sql: None,
                    message: None,
                    reason: NO_RESPONSE.to_string(),
                },
            };
        };

        let sql = clean_sql(&sql);
        let statement = strip_comment_lines(&sql);
        if statement.is_empty() {
            return AttemptOutcome::CommentOnly { sql, message };
        }

        if !matches!(leading_keyword(&statement).as_deref(), Some("SELECT") | Some("WITH")) {
            warn!(sql = %sql, "Model produced a non-SELECT statement");
            return AttemptOutcome::NonRetryable {
                sql: Some(sql),
                message,
                reason: SELECT_ONLY.to_string(),
            };
        }

        let result = self
            .tools
            .invoke(ToolInvocation::QueryDatabase {
                sql: sql.clone(),
                params: Vec::new(),
            })
            .await;

        if result.is_error {
            AttemptOutcome::ToolError {
                sql,
                message,
                error: result.text(),
            }
        } else {
            AttemptOutcome::Rows {
                sql,
                message,
                data: result.text(),
            }
        }
    }

    async fn memory_summary(&self) -> String {
        let Some(memory) = &self.memory else {
            return String::new();
        };
        match memory.summary().await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "Query memory unavailable, continuing without it");
                String::new()
            }
        }
    }

    async fn full_schema(&self) -> String {
        if let Some(schema) = &self.prompts.full_schema {
            return schema.clone();
        }
        if let Some(source) = &self.schema {
            match source.full_schema().await {
                Ok(schema) => return schema,
                Err(e) => warn!(error = %e, "Full schema introspection failed, using core schema"),
            }
        }
        self.prompts.core_schema.clone()
    }
}
