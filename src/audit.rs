//! Audit trail for statements that reach the database.
//!
//! Records are emitted on the `audit` tracing target and, when a state database is
//! attached, appended to its `audit_log` table from a spawned task. Recording never
//! blocks or fails the calling tool.

use crate::config::AuditConfig;
use crate::logging::AUDIT_TARGET;
use crate::persistence::{audit_log, StateDb};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Queries longer than this are truncated in audit records.
pub const MAX_AUDIT_QUERY_CHARS: usize = 500;

/// One audited tool execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub tool_name: String,
    pub query: String,
    pub row_count: usize,
    pub execution_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    /// Builds a record stamped with the current time. The query is truncated.
    pub fn new(tool_name: &str, query: &str, row_count: usize, execution_time_ms: u64) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            query: truncate_query(query),
            row_count,
            execution_time_ms,
            timestamp: Utc::now(),
        }
    }

    /// ISO-8601 timestamp with millisecond precision.
    pub fn timestamp_string(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Truncates to [`MAX_AUDIT_QUERY_CHARS`] characters, marking the cut with `...`.
pub fn truncate_query(query: &str) -> String {
    match query.char_indices().nth(MAX_AUDIT_QUERY_CHARS) {
        Some((cut, _)) => format!("{}...", &query[..cut]),
        None => query.to_string(),
    }
}

/// Best-effort audit sink shared by all tool calls.
#[derive(Clone, Default)]
pub struct AuditTrail {
    enabled: bool,
    store: Option<Arc<StateDb>>,
}

impl AuditTrail {
    /// Creates a trail that only logs.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            store: None,
        }
    }

    /// Creates a trail from configuration. The store is used only when `persist` is set.
    pub fn from_config(config: &AuditConfig, store: Option<Arc<StateDb>>) -> Self {
        Self {
            enabled: config.enabled,
            store: store.filter(|_| config.persist),
        }
    }

    /// Also appends records to the state database.
    pub fn with_store(mut self, store: Arc<StateDb>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Records one execution. Returns the record when auditing is enabled.
    pub fn record(
        &self,
        tool_name: &str,
        query: &str,
        row_count: usize,
        execution_time_ms: u64,
    ) -> Option<AuditRecord> {
        if !self.enabled {
            return None;
        }

        let record = AuditRecord::new(tool_name, query, row_count, execution_time_ms);
        info!(
            target: AUDIT_TARGET,
            tool_name = %record.tool_name,
            query = %record.query,
            row_count = record.row_count,
            execution_time_ms = record.execution_time_ms,
            timestamp = %record.timestamp_string(),
            "AUDIT"
        );

        if let Some(store) = &self.store {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let store = Arc::clone(store);
                    let persisted = record.clone();
                    handle.spawn(async move {
                        if let Err(e) = audit_log::insert(store.pool(), &persisted).await {
                            warn!("Failed to persist audit record: {e}");
                        }
                    });
                }
                Err(_) => debug!("No runtime available; audit record not persisted"),
            }
        }

        Some(record)
    }
}
