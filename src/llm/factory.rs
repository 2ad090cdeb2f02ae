//! Provider selection and client construction.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::LlmConfig;
use crate::error::{Result, WardenError};
use crate::llm::{AnthropicClient, AnthropicConfig, LlmClient, MockLlmClient};

pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Which [`LlmClient`] backs the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmProvider {
    #[default]
    Anthropic,
    /// Scripted client, no API key required.
    Mock,
}

const PROVIDERS: [(&str, LlmProvider); 2] = [
    ("anthropic", LlmProvider::Anthropic),
    ("mock", LlmProvider::Mock),
];

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        PROVIDERS
            .iter()
            .find(|(_, p)| p == self)
            .map(|(name, _)| *name)
            .unwrap_or("anthropic")
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        PROVIDERS
            .iter()
            .find(|(name, _)| *name == wanted)
            .map(|(_, p)| *p)
            .ok_or_else(|| format!("Unknown LLM provider: {s} (expected anthropic or mock)"))
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An explicit key wins over the environment. Blank keys count as absent.
fn resolve_api_key<F>(explicit: Option<String>, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    explicit
        .or_else(|| lookup(API_KEY_ENV))
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| WardenError::llm(format!("No API key configured. Set {API_KEY_ENV}.")))
}

/// Creates the client for `provider`. Anthropic needs a key, taken from `api_key` or
/// the environment.
pub fn create_client(
    provider: LlmProvider,
    api_key: Option<String>,
    llm: &LlmConfig,
) -> Result<Arc<dyn LlmClient>> {
    match provider {
        LlmProvider::Anthropic => {
            let key = resolve_api_key(api_key, |k| std::env::var(k).ok())?;
            let client = AnthropicClient::new(AnthropicConfig::from_llm_config(key, llm))?;
            Ok(Arc::new(client))
        }
        LlmProvider::Mock => Ok(Arc::new(MockLlmClient::new())),
    }
}
