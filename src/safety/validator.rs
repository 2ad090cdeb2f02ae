//! The ordered validation pipeline.
//!
//! Uses sqlparser-rs with the MySQL dialect as the authority on statement kind. The
//! text screens in [`super::keywords`] run first and fail closed: a blocklist hit
//! rejects even when the parser would accept the statement as a SELECT.

use sqlparser::ast::{Query, Select, SetExpr, Statement, TableFactor, TableWithJoins};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use tracing::debug;

use crate::config::LimitsConfig;

use super::keywords::{find_forbidden_keyword, has_multiple_statements, strip_comments};
use super::{StatementType, ValidationOutcome};

const PARSE_FAILURE: &str = "Failed to parse SQL query. Please check the syntax.";

/// Validates and sanitizes caller-supplied SQL.
#[derive(Debug, Clone)]
pub struct SqlValidator {
    max_length: usize,
    max_rows: u64,
}

impl SqlValidator {
    pub fn new(max_length: usize, max_rows: u64) -> Self {
        Self {
            max_length,
            max_rows,
        }
    }

    pub fn from_limits(limits: &LimitsConfig) -> Self {
        Self::new(limits.max_query_length, limits.max_query_rows)
    }

    pub fn max_rows(&self) -> u64 {
        self.max_rows
    }

    /// Runs every check in order. The first failing check decides the reason.
    pub fn validate(&self, raw: &str) -> ValidationOutcome {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return ValidationOutcome::rejected("Query cannot be empty");
        }

        if trimmed.chars().count() > self.max_length {
            return ValidationOutcome::rejected(format!(
                "Query exceeds maximum length of {} characters",
                self.max_length
            ));
        }

        if has_multiple_statements(trimmed) {
            return ValidationOutcome::rejected("Multiple statements are not allowed");
        }

        let cleaned = strip_comments(trimmed);

        if let Some(keyword) = find_forbidden_keyword(&cleaned) {
            return ValidationOutcome::rejected(format!(
                "Forbidden keyword detected: {keyword}"
            ));
        }

        let statements = match Parser::parse_sql(&MySqlDialect {}, &cleaned) {
            Ok(statements) => statements,
            Err(e) => {
                debug!(error = %e, "SQL parse failure");
                return ValidationOutcome::rejected(PARSE_FAILURE);
            }
        };

        let statement = match statements.as_slice() {
            [single] => single,
            // Comment-only input leaves nothing to parse
            [] => return ValidationOutcome::rejected(PARSE_FAILURE),
            _ => return ValidationOutcome::rejected("Multiple statements are not allowed"),
        };

        let root = classify_statement(statement);
        if !root.is_read_only() {
            return ValidationOutcome::rejected(format!(
                "Only SELECT queries are allowed. Got: {root}"
            ));
        }

        if let Some(nested) = nested_mutation(statement) {
            return ValidationOutcome::rejected(format!(
                "Only SELECT queries are allowed. Got: {nested}"
            ));
        }

        let sanitized_sql = if has_row_limit(statement) {
            cleaned
        } else {
            format!("{} LIMIT {}", cleaned.trim_end(), self.max_rows)
        };

        ValidationOutcome::Accepted { sanitized_sql }
    }
}

/// Maps a parsed statement to its root kind.
fn classify_statement(statement: &Statement) -> StatementType {
    match statement {
        Statement::Query(_) => StatementType::Select,
        Statement::Explain { .. } | Statement::ExplainTable { .. } => StatementType::Explain,
        Statement::ShowVariable { .. }
        | Statement::ShowVariables { .. }
        | Statement::ShowTables { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowCreate { .. }
        | Statement::ShowFunctions { .. }
        | Statement::ShowStatus { .. }
        | Statement::ShowCollation { .. } => StatementType::Show,

        Statement::Insert { .. } => StatementType::Insert,
        Statement::Update { .. } => StatementType::Update,
        Statement::Merge { .. } => StatementType::Merge,
        Statement::Delete { .. } => StatementType::Delete,
        Statement::Drop { .. } => StatementType::Drop,
        Statement::Truncate { .. } => StatementType::Truncate,
        Statement::AlterTable { .. }
        | Statement::AlterIndex { .. }
        | Statement::AlterView { .. }
        | Statement::AlterRole { .. } => StatementType::Alter,
        Statement::CreateTable { .. }
        | Statement::CreateIndex { .. }
        | Statement::CreateView { .. }
        | Statement::CreateSchema { .. }
        | Statement::CreateDatabase { .. }
        | Statement::CreateFunction { .. }
        | Statement::CreateProcedure { .. }
        | Statement::CreateRole { .. } => StatementType::Create,
        Statement::Grant { .. } => StatementType::Grant,
        Statement::Revoke { .. } => StatementType::Revoke,
        Statement::Call { .. } => StatementType::Call,
        Statement::Execute { .. } => StatementType::Execute,
        Statement::SetVariable { .. } => StatementType::Set,
        Statement::Use { .. } => StatementType::Use,

        _ => StatementType::Unknown,
    }
}

/// Returns true when the statement carries its own LIMIT or FETCH clause.
fn has_row_limit(statement: &Statement) -> bool {
    match statement {
        Statement::Query(query) => query.limit.is_some() || query.fetch.is_some(),
        _ => false,
    }
}

/// Finds a data-modifying statement nested anywhere inside a query.
fn nested_mutation(statement: &Statement) -> Option<StatementType> {
    match statement {
        Statement::Query(query) => query_mutation(query),
        other => {
            let kind = classify_statement(other);
            (!kind.is_read_only()).then_some(kind)
        }
    }
}

fn query_mutation(query: &Query) -> Option<StatementType> {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            if let Some(found) = query_mutation(&cte.query) {
                return Some(found);
            }
        }
    }
    set_expr_mutation(&query.body)
}

fn set_expr_mutation(set_expr: &SetExpr) -> Option<StatementType> {
    match set_expr {
        SetExpr::Insert(stmt) | SetExpr::Update(stmt) => Some(classify_statement(stmt)),
        SetExpr::Query(query) => query_mutation(query),
        SetExpr::Select(select) => select_mutation(select),
        SetExpr::SetOperation { left, right, .. } => {
            set_expr_mutation(left).or_else(|| set_expr_mutation(right))
        }
        SetExpr::Values(_) | SetExpr::Table(_) => None,
    }
}

fn select_mutation(select: &Select) -> Option<StatementType> {
    select.from.iter().find_map(table_with_joins_mutation)
}

fn table_with_joins_mutation(twj: &TableWithJoins) -> Option<StatementType> {
    table_factor_mutation(&twj.relation).or_else(|| {
        twj.joins
            .iter()
            .find_map(|join| table_factor_mutation(&join.relation))
    })
}

fn table_factor_mutation(factor: &TableFactor) -> Option<StatementType> {
    match factor {
        TableFactor::Derived { subquery, .. } => query_mutation(subquery),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => table_with_joins_mutation(table_with_joins),
        _ => None,
    }
}
