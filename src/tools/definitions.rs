//! Tool definitions advertised to clients and language models.

use serde::{Deserialize, Serialize};

pub const LIST_TABLES: &str = "list_tables";
pub const DESCRIBE_TABLE: &str = "describe_table";
pub const QUERY_DATABASE: &str = "query_database";

/// Tool definition for function calling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Returns the tool definitions in the order they are listed to clients.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: LIST_TABLES.to_string(),
            description: "List all tables in the database with their type, approximate row \
                          count, and description."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: DESCRIBE_TABLE.to_string(),
            description: "Describe the columns, data types, keys, and indexes of a specific \
                          database table."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "table_name": {
                        "type": "string",
                        "description": "The name of the table to describe"
                    }
                },
                "required": ["table_name"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: QUERY_DATABASE.to_string(),
            description: "Execute a read-only SQL SELECT query against the database. Only \
                          SELECT statements are allowed. Use ? placeholders for parameterized \
                          values."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "sql": {
                        "type": "string",
                        "description": "SQL SELECT query to execute"
                    },
                    "params": {
                        "type": "array",
                        "items": { "type": ["string", "number", "boolean", "null"] },
                        "description": "Parameter values for ? placeholders in the query"
                    }
                },
                "required": ["sql"],
                "additionalProperties": false
            }),
        },
    ]
}
