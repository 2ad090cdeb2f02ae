//! Language-model boundary.
//!
//! The model receives a system prompt plus conversation turns and returns free text. The
//! text is parsed by [`parser`]; nothing downstream trusts it before that.

pub mod anthropic;
pub mod factory;
pub mod mock;
pub mod parser;
pub mod prompt;
pub mod types;

pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use factory::{create_client, LlmProvider};
pub use mock::MockLlmClient;
pub use parser::{parse_llm_response, ParsedResponse};
pub use prompt::{needs_full_schema, FailureContext, PromptSet, NEED_FULL_SCHEMA};
pub use types::{Message, Role};

use async_trait::async_trait;

use crate::error::Result;

/// Trait for LLM clients that can generate completions.
///
/// Implementations must be thread-safe (Send + Sync) to support async operations.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generates a completion for the given messages.
    ///
    /// A leading system message carries the prompt; the rest are conversation turns.
    async fn complete(&self, messages: &[Message]) -> Result<String>;
}
