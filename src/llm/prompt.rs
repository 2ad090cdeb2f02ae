//! Prompt construction for the two generation tiers.
//!
//! Tier 1 sees the core tables only and may ask for more schema through the
//! [`NEED_FULL_SCHEMA`] sentinel. Tier 2 sees every table plus the Tier-1 failure.

use crate::config::PromptsConfig;
use crate::error::{Result, WardenError};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Reserved marker a Tier-1 reply uses to request the full schema.
pub const NEED_FULL_SCHEMA: &str = "NEED_FULL_SCHEMA";

const DATA_ANALYST_RULES: &str = r#"You are a data analyst assistant for a MySQL database. You help users answer questions about their data by writing SQL queries.

RESPONSE FORMAT: Always reply with XML tags.
<message>A short explanation for the user</message>
<sql>The SQL query, only when a query is needed</sql>

RULES:
1. Always include a <message> tag.
2. Only include a <sql> tag when the question requires querying data. Greetings and clarifications get a <message> only.
3. Only generate read-only queries (SELECT or WITH ... SELECT). Never modify data.
4. Always add LIMIT to queries, never more than 1000 rows.
5. Use MySQL syntax.
6. Answer in the same language the user writes in.
7. Use the exact table and column names from the schema.
8. Follow the business rules below when they apply.
9. Do not end the SQL with a semicolon.
10. Keep the message concise.
11. Prefer readable column aliases.
12. If the question is ambiguous, ask a clarifying question in <message> instead of guessing."#;

const TIER1_TEMPLATE: &str = "{RULES}\n13. SCHEMA LIMITATION: You only have the core tables listed below. If the user's question requires a table NOT listed in the schema, DO NOT guess. Instead, respond with: <message>NEED_FULL_SCHEMA: looking for table about [description]</message>\n\n{QUERY_MEMORY}\n\n{BUSINESS_RULES}\n\nDATABASE SCHEMA (core tables only):\n{CORE_SCHEMA}";

const TIER2_TEMPLATE: &str = "{RULES}\n\nPREVIOUS ATTEMPT CONTEXT:\nA previous query attempt with a limited schema failed.\nGenerated SQL: {FAILED_SQL}\nError: {ERROR_MESSAGE}\nPlease generate a corrected query using the COMPLETE schema below.\n\n{QUERY_MEMORY}\n\n{BUSINESS_RULES}\n\nDATABASE SCHEMA (all tables):\n{SCHEMA}";

const DEFAULT_BUSINESS_RULES: &str = "BUSINESS RULES:\n- Dates are stored in UTC.\n- Soft-deleted rows carry a non-null deleted_at column and should be excluded unless asked for.";

const DEFAULT_CORE_SCHEMA: &str = "(no core tables configured)";

/// True when a Tier-1 message asks for the full schema.
pub fn needs_full_schema(message: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)NEED_FULL_SCHEMA:").expect("static pattern compiles"))
        .is_match(message)
}

/// The Tier-1 failure carried into the Tier-2 prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureContext {
    pub failed_sql: String,
    pub error_message: String,
}

/// Prompt material shared by both tiers.
#[derive(Debug, Clone)]
pub struct PromptSet {
    pub business_rules: String,
    pub core_schema: String,
    /// Full schema text. When `None`, the caller introspects it from the database.
    pub full_schema: Option<String>,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            business_rules: DEFAULT_BUSINESS_RULES.to_string(),
            core_schema: DEFAULT_CORE_SCHEMA.to_string(),
            full_schema: None,
        }
    }
}

fn read_prompt_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        WardenError::config(format!(
            "Failed to read prompt file {}: {}",
            path.display(),
            e
        ))
    })
}

impl PromptSet {
    /// Loads configured prompt files, keeping built-in text for anything unset.
    pub fn load(config: &PromptsConfig) -> Result<Self> {
        let mut prompts = Self::default();
        if let Some(path) = &config.business_rules_path {
            prompts.business_rules = read_prompt_file(path)?;
        }
        if let Some(path) = &config.core_schema_path {
            prompts.core_schema = read_prompt_file(path)?;
        }
        if let Some(path) = &config.full_schema_path {
            prompts.full_schema = Some(read_prompt_file(path)?);
        }
        Ok(prompts)
    }

    pub fn with_core_schema(mut self, schema: impl Into<String>) -> Self {
        self.core_schema = schema.into();
        self
    }

    pub fn with_full_schema(mut self, schema: impl Into<String>) -> Self {
        self.full_schema = Some(schema.into());
        self
    }

    pub fn with_business_rules(mut self, rules: impl Into<String>) -> Self {
        self.business_rules = rules.into();
        self
    }

    /// System prompt for the reduced-schema attempt.
    pub fn tier1_prompt(&self, query_memory: &str) -> String {
        fill(
            TIER1_TEMPLATE,
            &[
                ("RULES", DATA_ANALYST_RULES),
                ("QUERY_MEMORY", query_memory),
                ("BUSINESS_RULES", &self.business_rules),
                ("CORE_SCHEMA", &self.core_schema),
            ],
        )
    }

    /// System prompt for the full-schema retry.
    pub fn tier2_prompt(
        &self,
        query_memory: &str,
        failure: &FailureContext,
        full_schema: &str,
    ) -> String {
        fill(
            TIER2_TEMPLATE,
            &[
                ("RULES", DATA_ANALYST_RULES),
                ("FAILED_SQL", &failure.failed_sql),
                ("ERROR_MESSAGE", &failure.error_message),
                ("QUERY_MEMORY", query_memory),
                ("BUSINESS_RULES", &self.business_rules),
                ("SCHEMA", full_schema),
            ],
        )
    }
}

/// Substitutes `{NAME}` placeholders in one pass over the template.
///
/// Inserted values are never scanned again, so model output or remembered queries that
/// contain placeholder text stay literal.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{([A-Z_]+)\}").expect("static pattern compiles"))
        .replace_all(template, |caps: &regex::Captures<'_>| {
            values
                .iter()
                .find(|(name, _)| *name == &caps[1])
                .map_or_else(|| caps[0].to_string(), |(_, value)| value.to_string())
        })
        .into_owned()
}
