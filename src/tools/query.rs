//! The `query_database` tool.

use super::catalog::to_pretty_json;
use super::{errors, ToolResult, ToolSurface};
use crate::db::Value;
use crate::safety::ValidationOutcome;
use tracing::{debug, warn};

impl ToolSurface {
    /// Validates, executes and audits one caller-supplied statement.
    ///
    /// A rejected statement never reaches the database.
    pub async fn query_database(&self, sql: &str, params: &[Value]) -> ToolResult {
        let sanitized_sql = match self.validator.validate(sql) {
            ValidationOutcome::Accepted { sanitized_sql } => sanitized_sql,
            ValidationOutcome::Rejected { reason } => {
                warn!(reason = %reason, "Query rejected");
                return ToolResult::error(format!("Query rejected: {reason}"));
            }
        };

        debug!(sql = %sanitized_sql, params = params.len(), "Executing query");
        let result = match self.db.execute(&sanitized_sql, params).await {
            Ok(result) => result,
            Err(e) => return errors::tool_error(&e),
        };

        self.audit.record(
            super::QUERY_DATABASE,
            sql,
            result.row_count,
            result.execution_time_ms(),
        );

        let body = serde_json::json!({
            "rowCount": result.row_count,
            "executionTimeMs": result.execution_time_ms(),
            "rows": result.records(),
        });
        match to_pretty_json(&body) {
            Ok(text) => ToolResult::success(text),
            Err(e) => errors::tool_error(&e),
        }
    }
}
