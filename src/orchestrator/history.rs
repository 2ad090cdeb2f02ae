//! Conversation shaping for follow-up questions.

use serde::{Deserialize, Serialize};

use super::QueryOutcome;
use crate::llm::Message;

/// Turns passed to the model, counted from the most recent.
pub const HISTORY_WINDOW: usize = 10;

/// Characters of result data echoed back into an assistant turn.
pub const RESULT_ECHO_CHARS: usize = 500;

/// Who spoke a turn. System turns are never accepted from callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One prior turn supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }

    pub fn to_message(&self) -> Message {
        match self.role {
            TurnRole::User => Message::user(self.content.clone()),
            TurnRole::Assistant => Message::assistant(self.content.clone()),
        }
    }
}

/// A completed question and what came back for it.
///
/// Deserializes from the front end's record of a prior answer: the prompt plus the
/// fields of the [`QueryOutcome`] it received.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exchange {
    pub prompt: String,
    #[serde(default)]
    pub ai_message: Option<String>,
    #[serde(rename = "generatedSQL", default)]
    pub generated_sql: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Exchange {
    pub fn new(prompt: impl Into<String>, outcome: &QueryOutcome) -> Self {
        Self {
            prompt: prompt.into(),
            ai_message: outcome.ai_message.clone(),
            generated_sql: outcome.generated_sql.clone(),
            data: outcome.data.clone(),
            error: outcome.error.clone(),
        }
    }

    /// Assistant-side summary, or `None` when there is nothing to say.
    fn summary(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(message) = &self.ai_message {
            parts.push(message.clone());
        }
        if let Some(sql) = &self.generated_sql {
            parts.push(format!("[SQL: {sql}]"));
        }
        if let Some(data) = &self.data {
            let echo: String = data.chars().take(RESULT_ECHO_CHARS).collect();
            parts.push(format!("[Result: {echo}]"));
        }
        if let Some(error) = &self.error {
            parts.push(format!("[Error: {error}]"));
        }
        (!parts.is_empty()).then(|| parts.join("\n"))
    }
}

/// The most recent [`HISTORY_WINDOW`] turns.
pub fn window(turns: &[ConversationTurn]) -> &[ConversationTurn] {
    &turns[turns.len().saturating_sub(HISTORY_WINDOW)..]
}

/// Summarizes completed exchanges into windowed conversation turns.
pub fn build_history(exchanges: &[Exchange]) -> Vec<ConversationTurn> {
    let mut turns = Vec::with_capacity(exchanges.len() * 2);
    for exchange in exchanges {
        turns.push(ConversationTurn::user(exchange.prompt.clone()));
        if let Some(summary) = exchange.summary() {
            turns.push(ConversationTurn::assistant(summary));
        }
    }
    window(&turns).to_vec()
}
