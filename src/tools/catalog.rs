//! Catalog tools and table-schema resources, answered from `information_schema`.

use super::{errors, ToolResult, ToolSurface};
use crate::db::{QueryResult, Value};
use crate::error::{Result, WardenError};
use serde::Serialize;
use tracing::{debug, error};

const LIST_TABLES_SQL: &str = "SELECT TABLE_NAME, TABLE_TYPE, TABLE_ROWS, TABLE_COMMENT \
     FROM information_schema.TABLES WHERE TABLE_SCHEMA = ? ORDER BY TABLE_NAME";

const TABLE_NAMES_SQL: &str = "SELECT TABLE_NAME FROM information_schema.TABLES \
     WHERE TABLE_SCHEMA = ? ORDER BY TABLE_NAME";

const COLUMNS_SQL: &str = "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE, COLUMN_KEY, \
     COLUMN_DEFAULT, EXTRA, COLUMN_COMMENT, ORDINAL_POSITION \
     FROM information_schema.COLUMNS WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
     ORDER BY ORDINAL_POSITION";

const INDEXES_SQL: &str = "SELECT INDEX_NAME, COLUMN_NAME, NON_UNIQUE, INDEX_TYPE \
     FROM information_schema.STATISTICS WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
     ORDER BY INDEX_NAME, SEQ_IN_INDEX";

const ALL_COLUMNS_SQL: &str = "SELECT TABLE_NAME, COLUMN_NAME FROM information_schema.COLUMNS \
     WHERE TABLE_SCHEMA = ? ORDER BY TABLE_NAME, ORDINAL_POSITION";

pub const INVALID_TABLE_NAME: &str =
    "Invalid table name. Only alphanumeric characters and underscores are allowed.";

/// URI scheme prefix for table-schema resources.
pub const RESOURCE_URI_PREFIX: &str = "schema://tables/";

const JSON_MIME: &str = "application/json";

/// True for names made only of ASCII letters, digits and underscores.
pub fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A listable table-schema resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    pub mime_type: String,
}

/// Contents returned when a table-schema resource is read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    pub mime_type: String,
    pub text: String,
}

pub(crate) fn to_pretty_json(value: &serde_json::Value) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| WardenError::internal(format!("Failed to serialize result: {e}")))
}

impl ToolSurface {
    /// `list_tables`: every table in the configured schema.
    pub async fn list_tables(&self) -> ToolResult {
        let database = self.db.database_name().to_string();

        let result = match self
            .db
            .execute(LIST_TABLES_SQL, &[Value::from(database.as_str())])
            .await
        {
            Ok(result) => result,
            Err(e) => return errors::tool_error(&e),
        };

        self.audit.record(
            super::LIST_TABLES,
            LIST_TABLES_SQL,
            result.row_count,
            result.execution_time_ms(),
        );

        let body = serde_json::json!({
            "database": database,
            "tableCount": result.row_count,
            "tables": result.records(),
        });
        match to_pretty_json(&body) {
            Ok(text) => ToolResult::success(text),
            Err(e) => errors::tool_error(&e),
        }
    }

    /// `describe_table`: ordered columns and indexes of one table.
    pub async fn describe_table(&self, table_name: &str) -> ToolResult {
        if !is_valid_table_name(table_name) {
            return ToolResult::error(INVALID_TABLE_NAME);
        }

        let database = self.db.database_name().to_string();
        let (columns, indexes) = match self.table_metadata(&database, table_name).await {
            Ok(pair) => pair,
            Err(e) => return errors::tool_error(&e),
        };

        if columns.is_empty() {
            return ToolResult::error(format!(
                "Table '{table_name}' not found in database '{database}'."
            ));
        }

        self.audit.record(
            super::DESCRIBE_TABLE,
            &format!("DESCRIBE {table_name}"),
            columns.row_count,
            columns.execution_time_ms(),
        );

        let body = serde_json::json!({
            "table": table_name,
            "database": database,
            "columnCount": columns.row_count,
            "columns": columns.records(),
            "indexes": indexes.records(),
        });
        match to_pretty_json(&body) {
            Ok(text) => ToolResult::success(text),
            Err(e) => errors::tool_error(&e),
        }
    }

    /// Runs the column and index catalog queries concurrently.
    async fn table_metadata(
        &self,
        database: &str,
        table_name: &str,
    ) -> Result<(QueryResult, QueryResult)> {
        let params = [Value::from(database), Value::from(table_name)];
        tokio::try_join!(
            self.db.execute(COLUMNS_SQL, &params),
            self.db.execute(INDEXES_SQL, &params),
        )
    }

    /// One resource per table. Catalog failures are logged and yield an empty list.
    pub async fn table_resources(&self) -> Vec<ResourceDescriptor> {
        let database = self.db.database_name().to_string();
        let result = match self
            .db
            .execute(TABLE_NAMES_SQL, &[Value::from(database.as_str())])
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Failed to list table resources");
                return Vec::new();
            }
        };

        (0..result.row_count)
            .filter_map(|row| result.get(row, "TABLE_NAME"))
            .map(|name| {
                let name = name.to_string();
                ResourceDescriptor {
                    uri: format!("{RESOURCE_URI_PREFIX}{name}"),
                    name: format!("{name} schema"),
                    mime_type: JSON_MIME.to_string(),
                }
            })
            .collect()
    }

    /// Reads the `schema://tables/{tableName}` resource.
    pub async fn read_table_resource(&self, uri: &str) -> Result<ResourceContents> {
        let table_name = uri
            .strip_prefix(RESOURCE_URI_PREFIX)
            .ok_or_else(|| WardenError::protocol(format!("Unknown resource: {uri}")))?;
        if !is_valid_table_name(table_name) {
            return Err(WardenError::protocol("Invalid table name"));
        }

        let database = self.db.database_name().to_string();
        let (columns, indexes) = self.table_metadata(&database, table_name).await?;

        let body = serde_json::json!({
            "tableName": table_name,
            "database": database,
            "columns": columns.records(),
            "indexes": indexes.records(),
        });

        Ok(ResourceContents {
            uri: uri.to_string(),
            mime_type: JSON_MIME.to_string(),
            text: to_pretty_json(&body)?,
        })
    }

    /// Compact `table(col1,col2,..)` listing of the whole schema.
    pub async fn full_schema_text(&self) -> Result<String> {
        let database = self.db.database_name().to_string();
        let result = self
            .db
            .execute(ALL_COLUMNS_SQL, &[Value::from(database.as_str())])
            .await?;

        let mut tables: Vec<(String, Vec<String>)> = Vec::new();
        for row in 0..result.row_count {
            let (Some(table), Some(column)) =
                (result.get(row, "TABLE_NAME"), result.get(row, "COLUMN_NAME"))
            else {
                continue;
            };
            let table = table.to_string();
            let column = column.to_string();
            match tables.last_mut() {
                Some((name, columns)) if *name == table => columns.push(column),
                _ => tables.push((table, vec![column])),
            }
        }

        debug!(tables = tables.len(), "Introspected full schema");

        let mut lines = vec![format!("Database: {database}"), "Tables:".to_string()];
        lines.extend(
            tables
                .into_iter()
                .map(|(table, columns)| format!("{table}({})", columns.join(","))),
        );
        Ok(lines.join("\n"))
    }
}
