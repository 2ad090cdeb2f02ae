//! The tool surface: the only way callers reach the database.
//!
//! Each tool has a name, a description and a typed argument schema. Every call returns a
//! [`ToolResult`]; failures are reported through its `is_error` flag, never as `Err`.

mod catalog;
mod definitions;
pub mod errors;
mod query;

pub use catalog::{
    is_valid_table_name, ResourceContents, ResourceDescriptor, INVALID_TABLE_NAME,
    RESOURCE_URI_PREFIX,
};
pub use definitions::{tool_definitions, ToolDefinition, DESCRIBE_TABLE, LIST_TABLES, QUERY_DATABASE};

use crate::audit::AuditTrail;
use crate::db::{DatabaseClient, Value};
use crate::error::{Result, WardenError};
use crate::safety::SqlValidator;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// A validated tool call, one variant per tool.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    ListTables,
    DescribeTable { table_name: String },
    QueryDatabase { sql: String, params: Vec<Value> },
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ListTablesArgs {}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DescribeTableArgs {
    table_name: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct QueryDatabaseArgs {
    sql: String,
    #[serde(default)]
    params: Option<Vec<ScalarParam>>,
}

/// A positional parameter as it arrives in JSON.
#[derive(Deserialize)]
#[serde(untagged)]
enum ScalarParam {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Null(()),
}

impl From<ScalarParam> for Value {
    fn from(param: ScalarParam) -> Self {
        match param {
            ScalarParam::Bool(b) => Value::Bool(b),
            ScalarParam::Int(i) => Value::Int(i),
            ScalarParam::Float(f) => Value::Float(f),
            ScalarParam::Text(s) => Value::String(s),
            ScalarParam::Null(()) => Value::Null,
        }
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(
    tool: &str,
    arguments: Option<serde_json::Value>,
) -> Result<T> {
    let arguments = match arguments {
        None | Some(serde_json::Value::Null) => serde_json::Value::Object(Default::default()),
        Some(value) => value,
    };
    serde_json::from_value(arguments)
        .map_err(|e| WardenError::protocol(format!("Invalid arguments for tool {tool}: {e}")))
}

impl ToolInvocation {
    /// Builds an invocation from a tool name and raw JSON arguments.
    ///
    /// Unknown tools, missing fields and unknown fields are rejected here, before any
    /// handler runs.
    pub fn from_call(name: &str, arguments: Option<serde_json::Value>) -> Result<Self> {
        match name {
            LIST_TABLES => {
                parse_args::<ListTablesArgs>(name, arguments)?;
                Ok(Self::ListTables)
            }
            DESCRIBE_TABLE => {
                let args: DescribeTableArgs = parse_args(name, arguments)?;
                Ok(Self::DescribeTable {
                    table_name: args.table_name,
                })
            }
            QUERY_DATABASE => {
                let args: QueryDatabaseArgs = parse_args(name, arguments)?;
                Ok(Self::QueryDatabase {
                    sql: args.sql,
                    params: args
                        .params
                        .unwrap_or_default()
                        .into_iter()
                        .map(Value::from)
                        .collect(),
                })
            }
            other => Err(WardenError::protocol(format!("Unknown tool: {other}"))),
        }
    }

    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::ListTables => LIST_TABLES,
            Self::DescribeTable { .. } => DESCRIBE_TABLE,
            Self::QueryDatabase { .. } => QUERY_DATABASE,
        }
    }
}

/// One block of tool output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl TextContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
        }
    }
}

/// Uniform tool outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    #[serde(default)]
    pub is_error: bool,
    pub content: Vec<TextContent>,
}

impl ToolResult {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            is_error: false,
            content: vec![TextContent::text(text)],
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            content: vec![TextContent::text(text)],
        }
    }

    /// All text blocks joined by newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|c| c.kind == "text")
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Anything that can run tool invocations. The orchestrator depends on this seam.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, invocation: ToolInvocation) -> ToolResult;
}

/// Tools backed by a database client, the classifier and the audit trail.
pub struct ToolSurface {
    db: Arc<dyn DatabaseClient>,
    validator: SqlValidator,
    audit: AuditTrail,
}

impl ToolSurface {
    pub fn new(db: Arc<dyn DatabaseClient>, validator: SqlValidator, audit: AuditTrail) -> Self {
        Self {
            db,
            validator,
            audit,
        }
    }

    pub fn database(&self) -> &Arc<dyn DatabaseClient> {
        &self.db
    }
}

#[async_trait]
impl ToolInvoker for ToolSurface {
    async fn invoke(&self, invocation: ToolInvocation) -> ToolResult {
        let tool = invocation.tool_name();
        let result = match invocation {
            ToolInvocation::ListTables => self.list_tables().await,
            ToolInvocation::DescribeTable { table_name } => self.describe_table(&table_name).await,
            ToolInvocation::QueryDatabase { sql, params } => {
                self.query_database(&sql, &params).await
            }
        };
        info!(tool, is_error = result.is_error, "Tool call finished");
        result
    }
}
