//! Error types for db-warden.
//!
//! Tool handlers turn these into `isError` results; the HTTP layer maps them to JSON-RPC
//! codes.

use thiserror::Error;

/// Every fallible operation in the crate returns this.
#[derive(Error, Debug)]
pub enum WardenError {
    /// Database connection errors (pool exhausted, host unreachable, auth failed, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Errors reported by the database for an already-validated statement
    /// (timeouts, syntax edge cases, permission denials).
    #[error("Execution error: {0}")]
    Execution(String),

    /// Statement rejected by the classifier before any I/O.
    #[error("Query rejected: {0}")]
    Policy(String),

    /// Session or JSON-RPC boundary violations.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// LLM API errors (rate limits, auth, timeouts, etc.)
    #[error("LLM error: {0}")]
    Llm(String),

    /// Configuration errors (invalid config file, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller input refused before anything is stored.
    #[error("Invalid request: {0}")]
    InvalidInput(String),

    /// Local state database errors (query memory, persisted audit trail).
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Internal application errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WardenError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    pub fn policy(msg: impl Into<String>) -> Self {
        Self::Policy(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn llm(msg: impl Into<String>) -> Self {
        Self::Llm(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Short label used as a structured log field.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Execution(_) => "Execution Error",
            Self::Policy(_) => "Policy Rejection",
            Self::Protocol(_) => "Protocol Error",
            Self::Llm(_) => "LLM Error",
            Self::Config(_) => "Configuration Error",
            Self::InvalidInput(_) => "Invalid Request",
            Self::Persistence(_) => "Persistence Error",
            Self::Internal(_) => "Internal Error",
        }
    }
}


pub type Result<T> = std::result::Result<T, WardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_connection() {
        let err = WardenError::connection("pool timed out while waiting for an open connection");
        assert_eq!(
            err.to_string(),
            "Connection error: pool timed out while waiting for an open connection"
        );
        assert_eq!(err.category(), "Connection Error");
    }

    #[test]
    fn test_error_display_execution() {
        let err = WardenError::execution("[1054] Unknown column 'emal' in 'field list'");
        assert_eq!(
            err.to_string(),
            "Execution error: [1054] Unknown column 'emal' in 'field list'"
        );
        assert_eq!(err.category(), "Execution Error");
    }

    #[test]
    fn test_error_display_policy() {
        let err = WardenError::policy("Multiple statements are not allowed");
        assert_eq!(
            err.to_string(),
            "Query rejected: Multiple statements are not allowed"
        );
        assert_eq!(err.category(), "Policy Rejection");
    }

    #[test]
    fn test_error_display_protocol() {
        let err = WardenError::protocol("unknown session");
        assert_eq!(err.to_string(), "Protocol error: unknown session");
        assert_eq!(err.category(), "Protocol Error");
    }

    #[test]
    fn test_error_display_llm() {
        let err = WardenError::llm("Rate limited. Please wait.");
        assert_eq!(err.to_string(), "LLM error: Rate limited. Please wait.");
        assert_eq!(err.category(), "LLM Error");
    }

    #[test]
    fn test_error_display_config() {
        let err = WardenError::config("DB_HOST is required");
        assert_eq!(err.to_string(), "Configuration error: DB_HOST is required");
        assert_eq!(err.category(), "Configuration Error");
    }

    #[test]
    fn test_error_display_invalid_input() {
        let err = WardenError::invalid_input("Invalid tier 3; expected 1 or 2");
        assert_eq!(err.to_string(), "Invalid request: Invalid tier 3; expected 1 or 2");
        assert_eq!(err.category(), "Invalid Request");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WardenError>();
    }
}
