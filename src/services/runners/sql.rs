// SQL runner for the two relational backends.
//
// All statements are constructed from a validated SqlRequest; raw SQL text
// never enters this module. Only equality filters are supported: the filter
// map becomes a conjunction of `column = placeholder` clauses.

use mysql_async::prelude::Queryable;
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use tokio_postgres::types::ToSql;

use crate::api::middleware::AppError;
use crate::models::{
    contains_sql_metacharacters, is_safe_identifier, QueryResult, SqlDialect, SqlRequest,
};
use crate::services::runners::{ensure_columns_allowed, Introspection};

const QUERY_TIMEOUT: Duration = Duration::from_secs(30);
/// Schema-sampling calls are deliberately short.
const SAMPLE_TIMEOUT: Duration = Duration::from_secs(3);
const SAMPLE_ROWS: i64 = 3;

/// A parameterized statement ready for either driver.
#[derive(Debug, PartialEq)]
pub struct BuiltStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

fn check_identifier(name: &str, what: &str) -> Result<(), AppError> {
    if contains_sql_metacharacters(name) || !is_safe_identifier(name) {
        return Err(AppError::Validation(format!(
            "Invalid {} identifier: {:?}",
            what, name
        )));
    }
    Ok(())
}

fn quote_identifier(name: &str, dialect: SqlDialect) -> String {
    match dialect {
        // Double-quoted identifiers for PostgreSQL
        SqlDialect::Postgres => format!("\"{}\"", name),
        // Identifiers are already restricted to a safe charset, so MySQL
        // gets them bare
        SqlDialect::Mysql => name.to_string(),
    }
}

fn placeholder(index: usize, dialect: SqlDialect) -> String {
    match dialect {
        SqlDialect::Postgres => format!("${}", index + 1),
        SqlDialect::Mysql => "?".to_string(),
    }
}

/// Build a parameterized SELECT. Every identifier is charset-checked here
/// even though request validation already ran; this is the last gate before
/// query text exists.
pub fn build_select(request: &SqlRequest) -> Result<BuiltStatement, AppError> {
    check_identifier(&request.table, "table")?;

    let projection = if request.columns.is_empty() {
        "*".to_string()
    } else {
        let mut cols = Vec::with_capacity(request.columns.len());
        for col in &request.columns {
            check_identifier(col, "column")?;
            cols.push(quote_identifier(col, request.dialect));
        }
        cols.join(", ")
    };

    let mut sql = format!(
        "SELECT {} FROM {}",
        projection,
        quote_identifier(&request.table, request.dialect)
    );

    let mut params: Vec<Value> = Vec::new();
    if !request.filter.is_empty() {
        let mut clauses = Vec::with_capacity(request.filter.len());
        for (col, value) in &request.filter {
            check_identifier(col, "filter column")?;
            clauses.push(format!(
                "{} = {}",
                quote_identifier(col, request.dialect),
                placeholder(params.len(), request.dialect)
            ));
            params.push(value.clone());
        }
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    if let Some(order_by) = &request.order_by {
        check_identifier(order_by, "order_by")?;
        sql.push_str(&format!(" ORDER BY {}", quote_identifier(order_by, request.dialect)));
    }

    // The limit is clamped during request validation; embed the literal
    sql.push_str(&format!(" LIMIT {}", request.limit.clamp(1, crate::models::MAX_LIMIT)));

    Ok(BuiltStatement { sql, params })
}

// ----------------------------------------------------------------------
// PostgreSQL execution
// ----------------------------------------------------------------------

fn pg_param(value: &Value) -> Box<dyn ToSql + Sync + Send> {
    match value {
        Value::Null => Box::new(Option::<String>::None),
        Value::Bool(b) => Box::new(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Box::new(i)
            } else {
                Box::new(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => Box::new(s.clone()),
        other => Box::new(other.to_string()),
    }
}

pub async fn run_postgres(
    pool: &deadpool_postgres::Pool,
    allowed_columns: &[String],
    request: &SqlRequest,
) -> Result<QueryResult, AppError> {
    ensure_columns_allowed(allowed_columns, &requested_columns(request))?;
    let statement = build_select(request)?;

    let client = pool
        .get()
        .await
        .map_err(|e| AppError::Network(format!("Failed to get PostgreSQL connection: {}", e)))?;

    let start_time = Instant::now();
    let boxed: Vec<Box<dyn ToSql + Sync + Send>> = statement.params.iter().map(pg_param).collect();
    let param_refs: Vec<&(dyn ToSql + Sync)> =
        boxed.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect();

    let rows = tokio::time::timeout(QUERY_TIMEOUT, client.query(&statement.sql, &param_refs))
        .await
        .map_err(|_| {
            AppError::Timeout(format!(
                "Query timed out after {} seconds",
                QUERY_TIMEOUT.as_secs()
            ))
        })?
        .map_err(classify_pg_error)?;

    let json_rows: Vec<Value> = rows.iter().map(pg_row_to_json).collect();
    Ok(QueryResult::new(json_rows, start_time.elapsed().as_millis() as u64))
}

/// Map PostgreSQL failures onto the user-facing error categories.
fn classify_pg_error(e: tokio_postgres::Error) -> AppError {
    if let Some(db_error) = e.as_db_error() {
        let code = db_error.code().code();
        return match code {
            // undefined_table / undefined_column
            "42P01" => AppError::NotFound(format!("Table not found: {}", db_error.message())),
            "42703" => AppError::NotFound(format!("Column not found: {}", db_error.message())),
            // insufficient_privilege
            "42501" => {
                AppError::AccessDenied(format!("Backend denied access: {}", db_error.message()))
            }
            _ => AppError::Database(format!("Code: {}, Message: {}", code, db_error.message())),
        };
    }
    if e.is_closed() {
        return AppError::Network(format!("PostgreSQL connection closed: {}", e));
    }
    AppError::Database(format!("Query execution failed: {}", e))
}

fn pg_row_to_json(row: &tokio_postgres::Row) -> Value {
    let mut row_obj = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let column_name = column.name();
        let value: Value = match column.type_().name() {
            "int2" | "int4" => row
                .try_get::<_, Option<i32>>(idx)
                .ok()
                .flatten()
                .map(|v| json!(v))
                .unwrap_or(Value::Null),
            "int8" => row
                .try_get::<_, Option<i64>>(idx)
                .ok()
                .flatten()
                .map(|v| json!(v))
                .unwrap_or(Value::Null),
            "float4" => row
                .try_get::<_, Option<f32>>(idx)
                .ok()
                .flatten()
                .map(|v| json!(v))
                .unwrap_or(Value::Null),
            "float8" | "numeric" => row
                .try_get::<_, Option<f64>>(idx)
                .ok()
                .flatten()
                .map(|v| json!(v))
                .unwrap_or(Value::Null),
            "bool" => row
                .try_get::<_, Option<bool>>(idx)
                .ok()
                .flatten()
                .map(|v| json!(v))
                .unwrap_or(Value::Null),
            "json" | "jsonb" => match row.try_get::<_, Option<String>>(idx) {
                Ok(Some(v)) => serde_json::from_str(&v).unwrap_or(Value::String(v)),
                _ => Value::Null,
            },
            _ => {
                // TEXT, VARCHAR, TIMESTAMP, UUID etc: string representation
                match row.try_get::<_, Option<String>>(idx) {
                    Ok(Some(v)) => json!(v),
                    Ok(None) => Value::Null,
                    Err(_) => json!(format!("<{}>", column.type_().name())),
                }
            }
        };
        row_obj.insert(column_name.to_string(), value);
    }
    Value::Object(row_obj)
}

pub async fn introspect_postgres(
    pool: &deadpool_postgres::Pool,
    table: &str,
) -> Result<Introspection, AppError> {
    check_identifier(table, "table")?;
    let client = pool
        .get()
        .await
        .map_err(|e| AppError::Network(format!("Failed to get PostgreSQL connection: {}", e)))?;

    let column_rows = tokio::time::timeout(
        SAMPLE_TIMEOUT,
        client.query(
            "SELECT column_name FROM information_schema.columns
             WHERE table_name = $1 ORDER BY ordinal_position",
            &[&table],
        ),
    )
    .await
    .map_err(|_| AppError::Timeout("Schema introspection timed out".to_string()))?
    .map_err(classify_pg_error)?;

    let columns: Vec<String> = column_rows.iter().map(|r| r.get::<_, String>(0)).collect();
    if columns.is_empty() {
        return Err(AppError::NotFound(format!("Table not found: {}", table)));
    }

    let sample_sql = format!("SELECT * FROM \"{}\" LIMIT {}", table, SAMPLE_ROWS);
    let sample_rows = tokio::time::timeout(SAMPLE_TIMEOUT, client.query(&sample_sql, &[]))
        .await
        .map_err(|_| AppError::Timeout("Schema sampling timed out".to_string()))?
        .map_err(classify_pg_error)?;

    Ok(Introspection {
        columns,
        sample: sample_rows.iter().map(pg_row_to_json).collect(),
    })
}

// ----------------------------------------------------------------------
// MySQL execution
// ----------------------------------------------------------------------

fn mysql_param(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Bool(b) => mysql_async::Value::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                mysql_async::Value::from(i)
            } else {
                mysql_async::Value::from(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => mysql_async::Value::from(s.clone()),
        other => mysql_async::Value::from(other.to_string()),
    }
}

fn mysql_value_to_json(mysql_val: mysql_async::Value) -> Value {
    match mysql_val {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => {
                // Numeric columns often arrive as text; keep them numeric
                if let Ok(i) = s.parse::<i64>() {
                    json!(i)
                } else if let Ok(f) = s.parse::<f64>() {
                    json!(f)
                } else {
                    json!(s)
                }
            }
            Err(_) => Value::Null,
        },
        mysql_async::Value::Int(i) => json!(i),
        mysql_async::Value::UInt(u) => json!(u),
        mysql_async::Value::Float(f) => json!(f),
        mysql_async::Value::Double(d) => json!(d),
        mysql_async::Value::Date(y, m, d, h, min, s, _) => {
            json!(format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}", y, m, d, h, min, s))
        }
        mysql_async::Value::Time(is_neg, d, h, m, s, _) => {
            let sign = if is_neg { "-" } else { "" };
            let total_hours = d * 24 + h as u32;
            json!(format!("{}{}:{:02}:{:02}", sign, total_hours, m, s))
        }
    }
}

fn mysql_row_to_json(row: mysql_async::Row) -> Value {
    let mut row_obj = Map::new();
    let columns = row.columns_ref().to_vec();
    for (idx, column) in columns.iter().enumerate() {
        let value = match row.get_opt::<mysql_async::Value, usize>(idx) {
            Some(Ok(v)) => mysql_value_to_json(v),
            _ => Value::Null,
        };
        row_obj.insert(column.name_str().to_string(), value);
    }
    Value::Object(row_obj)
}

/// Map MySQL failures onto the user-facing error categories.
fn classify_mysql_error(e: mysql_async::Error) -> AppError {
    match &e {
        mysql_async::Error::Server(server_err) => match server_err.code {
            // ER_NO_SUCH_TABLE / ER_BAD_FIELD_ERROR
            1146 => AppError::NotFound(format!("Table not found: {}", server_err.message)),
            1054 => AppError::NotFound(format!("Column not found: {}", server_err.message)),
            // ER_DBACCESS_DENIED / ER_ACCESS_DENIED / ER_TABLEACCESS_DENIED
            1044 | 1045 | 1142 => {
                AppError::AccessDenied(format!("Backend denied access: {}", server_err.message))
            }
            code => AppError::Database(format!("Code: {}, Message: {}", code, server_err.message)),
        },
        mysql_async::Error::Io(_) => AppError::Network(format!("MySQL connection error: {}", e)),
        _ => AppError::Database(format!("Query execution failed: {}", e)),
    }
}

pub async fn run_mysql(
    pool: &mysql_async::Pool,
    allowed_columns: &[String],
    request: &SqlRequest,
) -> Result<QueryResult, AppError> {
    ensure_columns_allowed(allowed_columns, &requested_columns(request))?;
    let statement = build_select(request)?;

    let mut conn = pool
        .get_conn()
        .await
        .map_err(classify_mysql_error)?;

    let start_time = Instant::now();
    let params: Vec<mysql_async::Value> = statement.params.iter().map(mysql_param).collect();
    let mysql_params = if params.is_empty() {
        mysql_async::Params::Empty
    } else {
        mysql_async::Params::Positional(params)
    };

    let rows: Vec<mysql_async::Row> =
        tokio::time::timeout(QUERY_TIMEOUT, conn.exec(&statement.sql, mysql_params))
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "Query timed out after {} seconds",
                    QUERY_TIMEOUT.as_secs()
                ))
            })?
            .map_err(classify_mysql_error)?;

    let json_rows: Vec<Value> = rows.into_iter().map(mysql_row_to_json).collect();
    Ok(QueryResult::new(json_rows, start_time.elapsed().as_millis() as u64))
}

pub async fn introspect_mysql(
    pool: &mysql_async::Pool,
    table: &str,
) -> Result<Introspection, AppError> {
    check_identifier(table, "table")?;
    let mut conn = pool.get_conn().await.map_err(classify_mysql_error)?;

    let columns: Vec<String> = tokio::time::timeout(
        SAMPLE_TIMEOUT,
        conn.exec(
            "SELECT COLUMN_NAME FROM information_schema.COLUMNS
             WHERE TABLE_NAME = ? ORDER BY ORDINAL_POSITION",
            (table,),
        ),
    )
    .await
    .map_err(|_| AppError::Timeout("Schema introspection timed out".to_string()))?
    .map_err(classify_mysql_error)?;

    if columns.is_empty() {
        return Err(AppError::NotFound(format!("Table not found: {}", table)));
    }

    let sample_sql = format!("SELECT * FROM {} LIMIT {}", table, SAMPLE_ROWS);
    let sample_rows: Vec<mysql_async::Row> =
        tokio::time::timeout(SAMPLE_TIMEOUT, conn.query(sample_sql))
            .await
            .map_err(|_| AppError::Timeout("Schema sampling timed out".to_string()))?
            .map_err(classify_mysql_error)?;

    Ok(Introspection {
        columns,
        sample: sample_rows.into_iter().map(mysql_row_to_json).collect(),
    })
}

fn requested_columns(request: &SqlRequest) -> Vec<&str> {
    let mut cols: Vec<&str> = request.columns.iter().map(String::as_str).collect();
    cols.extend(request.filter.keys().map(String::as_str));
    if let Some(ob) = &request.order_by {
        cols.push(ob.as_str());
    }
    cols
}
