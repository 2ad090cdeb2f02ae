//! Translation of executor failures into caller-safe tool results.

use super::ToolResult;
use crate::error::WardenError;
use tracing::error;

pub const CONNECTION_FAILED: &str = "Database connection failed. Please try again later.";
pub const QUERY_TIMED_OUT: &str = "Query timed out. Try a simpler or more specific query.";
pub const SYNTAX_ERROR: &str = "SQL syntax error. Please check your query.";
pub const ACCESS_DENIED: &str = "Database access denied.";
pub const UNEXPECTED: &str = "An unexpected error occurred. Please try again.";

const CONNECTION_MARKERS: &[&str] = &["ETIMEDOUT", "ECONNREFUSED"];
const TIMEOUT_MARKERS: &[&str] = &[
    "MAX_EXECUTION_TIME",
    "[3024]",
    "maximum statement execution time exceeded",
];
const PARSE_MARKERS: &[&str] = &["ER_PARSE_ERROR", "[1064]"];
const ACCESS_MARKERS: &[&str] = &["ER_ACCESS_DENIED_ERROR", "[1045]", "[1142]", "access denied"];

fn contains_any(message: &str, markers: &[&str]) -> bool {
    let lower = message.to_lowercase();
    markers.iter().any(|m| lower.contains(&m.to_lowercase()))
}

/// Maps an error to one of the fixed user-facing messages.
///
/// Connection strings and credentials never appear in the output.
pub fn user_message(err: &WardenError) -> &'static str {
    let message = err.to_string();

    if matches!(err, WardenError::Connection(_)) || contains_any(&message, CONNECTION_MARKERS) {
        CONNECTION_FAILED
    } else if contains_any(&message, TIMEOUT_MARKERS) {
        QUERY_TIMED_OUT
    } else if contains_any(&message, PARSE_MARKERS) {
        SYNTAX_ERROR
    } else if contains_any(&message, ACCESS_MARKERS) {
        ACCESS_DENIED
    } else {
        UNEXPECTED
    }
}

/// Logs the full error and returns the translated tool error.
pub fn tool_error(err: &WardenError) -> ToolResult {
    error!(category = err.category(), error = %err, detail = ?err, "Tool execution error");
    ToolResult::error(user_message(err))
}
