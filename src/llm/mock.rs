//! Mock LLM client for testing.
//!
//! Replies come from a script consumed in order; the last entry repeats once the script
//! runs out. Every request is recorded.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::{Result, WardenError};
use crate::llm::types::{Message, Role};
use crate::llm::LlmClient;

const DEFAULT_REPLY: &str =
    "<message>Here are the tables.</message>\n<sql>SELECT TABLE_NAME FROM information_schema.TABLES</sql>";

#[derive(Debug, Clone)]
enum Scripted {
    Reply(String),
    Fail(String),
}

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<Scripted>,
    last: Option<Scripted>,
    requests: Vec<Vec<Message>>,
}

/// Deterministic [`LlmClient`] for tests and the `--llm mock` mode.
#[derive(Debug, Clone, Default)]
pub struct MockLlmClient {
    state: Arc<Mutex<MockState>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply.
    pub fn with_response(self, response: impl Into<String>) -> Self {
        self.push(Scripted::Reply(response.into()));
        self
    }

    /// Queues a provider failure.
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.push(Scripted::Fail(message.into()));
        self
    }

    fn push(&self, entry: Scripted) {
        if let Ok(mut state) = self.state.lock() {
            state.script.push_back(entry);
        }
    }

    /// Number of completions requested so far.
    pub fn calls(&self) -> usize {
        self.state.lock().map(|s| s.requests.len()).unwrap_or(0)
    }

    /// System prompt of each request, in order.
    pub fn system_prompts(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|messages| {
                messages
                    .iter()
                    .find(|m| m.role == Role::System)
                    .map(|m| m.content.clone())
            })
            .collect()
    }

    /// Full message lists of each request, in order.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.state
            .lock()
            .map(|s| s.requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let next = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| WardenError::internal("Mock LLM state poisoned"))?;
            state.requests.push(messages.to_vec());
            match state.script.pop_front() {
                Some(entry) => {
                    state.last = Some(entry.clone());
                    Some(entry)
                }
                None => state.last.clone(),
            }
        };

        match next {
            Some(Scripted::Reply(text)) => Ok(text),
            Some(Scripted::Fail(message)) => Err(WardenError::llm(message)),
            None => Ok(DEFAULT_REPLY.to_string()),
        }
    }
}
