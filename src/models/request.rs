use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::middleware::AppError;
use crate::models::BackendKind;

/// Hard ceiling for any structured request limit.
pub const MAX_LIMIT: i64 = 200;
/// Default when the LLM omits a limit.
pub const DEFAULT_LIMIT: i64 = 50;

fn default_limit() -> i64 {
    DEFAULT_LIMIT
}

/// The validated, typed query object produced from an LLM tool call.
/// Tagged on "action" so the raw LLM JSON deserializes directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum StructuredRequest {
    Sql(SqlRequest),
    Mongo(DocumentRequest),
    Sheet(SpreadsheetRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    Postgres,
    Mysql,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlRequest {
    pub dialect: SqlDialect,
    pub table: String,
    /// Empty means `*`.
    #[serde(default)]
    pub columns: Vec<String>,
    /// Equality-only filter map; becomes a conjunction of `col = $n` clauses.
    #[serde(default, rename = "where")]
    pub filter: Map<String, Value>,
    #[serde(default)]
    pub order_by: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRequest {
    pub db: String,
    pub collection: String,
    #[serde(default)]
    pub filter: Map<String, Value>,
    /// Projection values restricted to 0 or 1.
    #[serde(default)]
    pub projection: Option<Map<String, Value>>,
    /// Sort values restricted to 1 or -1.
    #[serde(default)]
    pub sort: Option<Map<String, Value>>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpreadsheetRequest {
    pub path: String,
    pub sheet: String,
    #[serde(default)]
    pub filter: Map<String, Value>,
    #[serde(default)]
    pub select: Vec<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

/// Identifiers embedded in query text must match `^[A-Za-z0-9_]+$`.
pub fn is_safe_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Reject statement separators and comment markers outright, so the check
/// reads as an explicit guarantee even though the charset already excludes
/// them.
pub fn contains_sql_metacharacters(s: &str) -> bool {
    s.contains(';') || s.contains("--") || s.contains("/*")
}

fn check_identifier(name: &str, what: &str) -> Result<(), AppError> {
    if contains_sql_metacharacters(name) || !is_safe_identifier(name) {
        return Err(AppError::Validation(format!(
            "Invalid {} identifier: {:?}. Identifiers must match [A-Za-z0-9_]+",
            what, name
        )));
    }
    Ok(())
}

fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(1, MAX_LIMIT)
}

impl StructuredRequest {
    /// Which backend kind this request executes against.
    pub fn kind(&self) -> BackendKind {
        match self {
            StructuredRequest::Sql(r) => match r.dialect {
                SqlDialect::Postgres => BackendKind::SqlPg,
                SqlDialect::Mysql => BackendKind::SqlMysql,
            },
            StructuredRequest::Mongo(_) => BackendKind::Document,
            StructuredRequest::Sheet(_) => BackendKind::Spreadsheet,
        }
    }

    pub fn tool_name(&self) -> &'static str {
        match self {
            StructuredRequest::Sql(_) => "sql",
            StructuredRequest::Mongo(_) => "mongo",
            StructuredRequest::Sheet(_) => "sheet",
        }
    }

    /// The whitelist resource name this request targets.
    pub fn resource_name(&self) -> &str {
        match self {
            StructuredRequest::Sql(r) => &r.table,
            StructuredRequest::Mongo(r) => &r.collection,
            StructuredRequest::Sheet(r) => &r.sheet,
        }
    }

    pub fn limit(&self) -> i64 {
        match self {
            StructuredRequest::Sql(r) => r.limit,
            StructuredRequest::Mongo(r) => r.limit,
            StructuredRequest::Sheet(r) => r.limit,
        }
    }

    /// Every column/field the request touches, for whitelist checks.
    pub fn requested_columns(&self) -> Vec<&str> {
        let mut cols: Vec<&str> = Vec::new();
        match self {
            StructuredRequest::Sql(r) => {
                cols.extend(r.columns.iter().map(String::as_str));
                cols.extend(r.filter.keys().map(String::as_str));
                if let Some(ob) = &r.order_by {
                    cols.push(ob.as_str());
                }
            }
            StructuredRequest::Mongo(r) => {
                cols.extend(r.filter.keys().map(String::as_str));
                if let Some(p) = &r.projection {
                    cols.extend(p.keys().map(String::as_str));
                }
                if let Some(s) = &r.sort {
                    cols.extend(s.keys().map(String::as_str));
                }
            }
            StructuredRequest::Sheet(r) => {
                cols.extend(r.select.iter().map(String::as_str));
                cols.extend(r.filter.keys().map(String::as_str));
            }
        }
        cols
    }

    /// Type/range/enum checks plus limit clamping. This runs before any
    /// whitelist or backend work; failures here never reach a driver.
    pub fn validate(&mut self) -> Result<(), AppError> {
        match self {
            StructuredRequest::Sql(r) => {
                check_identifier(&r.table, "table")?;
                for col in &r.columns {
                    check_identifier(col, "column")?;
                }
                for key in r.filter.keys() {
                    check_identifier(key, "filter column")?;
                }
                if let Some(ob) = &r.order_by {
                    check_identifier(ob, "order_by")?;
                }
                r.limit = clamp_limit(r.limit);
            }
            StructuredRequest::Mongo(r) => {
                check_identifier(&r.db, "db")?;
                check_identifier(&r.collection, "collection")?;
                if let Some(p) = &r.projection {
                    for (key, v) in p {
                        if !matches!(v.as_i64(), Some(0) | Some(1)) {
                            return Err(AppError::Validation(format!(
                                "Projection value for {:?} must be 0 or 1",
                                key
                            )));
                        }
                    }
                }
                if let Some(s) = &r.sort {
                    for (key, v) in s {
                        if !matches!(v.as_i64(), Some(1) | Some(-1)) {
                            return Err(AppError::Validation(format!(
                                "Sort value for {:?} must be 1 or -1",
                                key
                            )));
                        }
                    }
                }
                r.limit = clamp_limit(r.limit);
            }
            StructuredRequest::Sheet(r) => {
                if r.path.trim().is_empty() {
                    return Err(AppError::Validation("Spreadsheet path cannot be empty".to_string()));
                }
                if r.sheet.trim().is_empty() {
                    return Err(AppError::Validation("Sheet name cannot be empty".to_string()));
                }
                r.limit = clamp_limit(r.limit);
            }
        }
        Ok(())
    }
}

/// Ephemeral execution result; never persisted beyond the cache TTL and the
/// truncated audit snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub rows: Vec<Value>,
    pub row_count: usize,
    pub duration_ms: u64,
}

impl QueryResult {
    pub fn new(rows: Vec<Value>, duration_ms: u64) -> Self {
        let row_count = rows.len();
        Self { rows, row_count, duration_ms }
    }
}
