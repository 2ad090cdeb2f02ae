//! Statement classification and sanitization.
//!
//! Turns untrusted SQL text into an accept/reject decision. Accepted statements are a
//! single read-only SELECT carrying an explicit row cap. No I/O happens here.

mod keywords;
mod validator;

pub use keywords::{find_forbidden_keyword, has_multiple_statements, strip_comments};
pub use validator::SqlValidator;

use crate::error::{Result, WardenError};
use std::fmt;

/// The root kind of a parsed SQL statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementType {
    Select,
    Insert,
    Update,
    Delete,
    Drop,
    Truncate,
    Alter,
    Create,
    Grant,
    Revoke,
    Explain,
    Show,
    Merge,
    Call,
    Execute,
    Set,
    Use,
    /// Statement type could not be determined.
    Unknown,
}

impl StatementType {
    /// Returns true for the only kind the gateway executes.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Select)
    }
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Select => write!(f, "SELECT"),
            Self::Insert => write!(f, "INSERT"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
            Self::Drop => write!(f, "DROP"),
            Self::Truncate => write!(f, "TRUNCATE"),
            Self::Alter => write!(f, "ALTER"),
            Self::Create => write!(f, "CREATE"),
            Self::Grant => write!(f, "GRANT"),
            Self::Revoke => write!(f, "REVOKE"),
            Self::Explain => write!(f, "EXPLAIN"),
            Self::Show => write!(f, "SHOW"),
            Self::Merge => write!(f, "MERGE"),
            Self::Call => write!(f, "CALL"),
            Self::Execute => write!(f, "EXECUTE"),
            Self::Set => write!(f, "SET"),
            Self::Use => write!(f, "USE"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Outcome of validating one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Single SELECT with an explicit row limit, safe to hand to the executor.
    Accepted { sanitized_sql: String },
    /// Caller-safe reason the statement was refused.
    Rejected { reason: String },
}

impl ValidationOutcome {
    pub(crate) fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// Converts a rejection into a [`WardenError::Policy`].
    pub fn into_result(self) -> Result<String> {
        match self {
            Self::Accepted { sanitized_sql } => Ok(sanitized_sql),
            Self::Rejected { reason } => Err(WardenError::policy(reason)),
        }
    }
}
