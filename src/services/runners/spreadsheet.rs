// Spreadsheet runner: fetches a CSV export (or reads a local file), parses it
// with a quote-aware reader, then filters and projects client-side. Sheets
// have no query engine, so every operation happens on the loaded rows.

use csv::ReaderBuilder;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};

use crate::api::middleware::AppError;
use crate::models::{QueryResult, SpreadsheetRequest};
use crate::services::manager::SheetSource;
use crate::services::runners::{ensure_columns_allowed, Introspection};

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const SAMPLE_ROWS: usize = 3;

async fn load_raw(source: &SheetSource) -> Result<String, AppError> {
    match source {
        SheetSource::PublishedUrl { .. } => {
            let url = source
                .export_url()
                .ok_or_else(|| AppError::Internal("Published source without export URL".to_string()))?;
            let client = reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .map_err(|e| AppError::Internal(format!("HTTP client build failed: {}", e)))?;
            let response = client
                .get(&url)
                .send()
                .await
                .map_err(|e| AppError::Network(format!("Spreadsheet fetch failed: {}", e)))?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(AppError::NotFound("Spreadsheet not found or not published".to_string()));
            }
            if !response.status().is_success() {
                return Err(AppError::Network(format!(
                    "Spreadsheet fetch returned status {}",
                    response.status()
                )));
            }
            response
                .text()
                .await
                .map_err(|e| AppError::Network(format!("Spreadsheet fetch failed: {}", e)))
        }
        SheetSource::LocalFile(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::NotFound(format!("Spreadsheet file not found: {}", path.display()))
            } else {
                AppError::Internal(format!("Failed to read spreadsheet file: {}", e))
            }
        }),
    }
}

/// Bare numerics become JSON numbers so filters like {"age": 36} match.
fn cell_to_json(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
}

/// Quote-aware CSV parse; first record is the header row.
pub fn parse_csv(data: &str) -> Result<(Vec<String>, Vec<Map<String, Value>>), AppError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(data.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| AppError::Validation(format!("Malformed CSV header: {}", e)))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| AppError::Validation(format!("Malformed CSV row: {}", e)))?;
        let mut row = Map::new();
        for (i, header) in headers.iter().enumerate() {
            let cell = record.get(i).unwrap_or("");
            row.insert(header.clone(), cell_to_json(cell));
        }
        rows.push(row);
    }
    Ok((headers, rows))
}

/// Equality match; strings compare case-insensitively, everything else by
/// JSON value equality.
fn cell_matches(cell: &Value, wanted: &Value) -> bool {
    match (cell, wanted) {
        (Value::String(a), Value::String(b)) => a.eq_ignore_ascii_case(b),
        (a, b) => a == b,
    }
}

fn apply_filter(rows: Vec<Map<String, Value>>, filter: &Map<String, Value>) -> Vec<Map<String, Value>> {
    if filter.is_empty() {
        return rows;
    }
    rows.into_iter()
        .filter(|row| {
            filter
                .iter()
                .all(|(col, wanted)| row.get(col).is_some_and(|cell| cell_matches(cell, wanted)))
        })
        .collect()
}

fn apply_select(rows: Vec<Map<String, Value>>, select: &[String]) -> Vec<Map<String, Value>> {
    if select.is_empty() {
        return rows;
    }
    rows.into_iter()
        .map(|mut row| {
            let mut out = Map::new();
            for col in select {
                if let Some(v) = row.remove(col) {
                    out.insert(col.clone(), v);
                }
            }
            out
        })
        .collect()
}

pub async fn run(
    source: &SheetSource,
    allowed_columns: &[String],
    request: &SpreadsheetRequest,
) -> Result<QueryResult, AppError> {
    let requested: Vec<&str> = request
        .select
        .iter()
        .map(String::as_str)
        .chain(request.filter.keys().map(String::as_str))
        .collect();
    ensure_columns_allowed(allowed_columns, &requested)?;

    let start_time = Instant::now();
    let raw = load_raw(source).await?;
    let (headers, rows) = parse_csv(&raw)?;

    for col in &requested {
        if !headers.iter().any(|h| h == col) {
            return Err(AppError::NotFound(format!("Column not found in sheet: {}", col)));
        }
    }

    let limit = request.limit.clamp(1, crate::models::MAX_LIMIT) as usize;
    let rows: Vec<Value> = apply_select(apply_filter(rows, &request.filter), &request.select)
        .into_iter()
        .take(limit)
        .map(Value::Object)
        .collect();

    Ok(QueryResult::new(rows, start_time.elapsed().as_millis() as u64))
}

pub async fn introspect(source: &SheetSource) -> Result<Introspection, AppError> {
    let raw = load_raw(source).await?;
    let (headers, rows) = parse_csv(&raw)?;
    Ok(Introspection {
        columns: headers,
        sample: rows
            .into_iter()
            .take(SAMPLE_ROWS)
            .map(Value::Object)
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn request(filter: Value, select: Vec<&str>, limit: i64) -> SpreadsheetRequest {
        SpreadsheetRequest {
            path: "./people.csv".to_string(),
            sheet: "people".to_string(),
            filter: filter.as_object().cloned().unwrap_or_default(),
            select: select.into_iter().map(String::from).collect(),
            limit,
        }
    }

    #[test]
    fn test_parse_csv_quoted_commas() {
        let (headers, rows) = parse_csv("name,age\nAda,36\n\"Smith, Jr\",40\n").unwrap();
        assert_eq!(headers, vec!["name", "age"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("name").unwrap(), &json!("Smith, Jr"));
        assert_eq!(rows[1].get("age").unwrap(), &json!(40));
    }

    #[test]
    fn test_cell_numeric_coercion() {
        assert_eq!(cell_to_json("42"), json!(42));
        assert_eq!(cell_to_json("4.5"), json!(4.5));
        assert_eq!(cell_to_json("abc"), json!("abc"));
        assert_eq!(cell_to_json(""), Value::Null);
    }

    #[test]
    fn test_filter_is_case_insensitive_for_strings() {
        let (_, rows) = parse_csv("name,city\nAda,London\nBob,Paris\n").unwrap();
        let filter = json!({"city": "london"}).as_object().cloned().unwrap();
        let matched = apply_filter(rows, &filter);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].get("name").unwrap(), &json!("Ada"));
    }

    #[test]
    fn test_select_projects_columns() {
        let (_, rows) = parse_csv("name,age,city\nAda,36,London\n").unwrap();
        let selected = apply_select(rows, &["name".to_string()]);
        assert_eq!(selected[0].len(), 1);
        assert!(selected[0].contains_key("name"));
    }

    #[tokio::test]
    async fn test_run_against_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.csv");
        tokio::fs::write(&path, "name,age\nAda,36\n\"Smith, Jr\",40\nBob,36\n")
            .await
            .unwrap();
        let source = SheetSource::LocalFile(PathBuf::from(&path));

        let result = run(&source, &[], &request(json!({"age": 36}), vec!["name"], 50))
            .await
            .unwrap();
        assert_eq!(result.row_count, 2);
        assert_eq!(result.rows[0], json!({"name": "Ada"}));
    }

    #[tokio::test]
    async fn test_run_rejects_unknown_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.csv");
        tokio::fs::write(&path, "name,age\nAda,36\n").await.unwrap();
        let source = SheetSource::LocalFile(PathBuf::from(&path));

        let err = run(&source, &[], &request(json!({"salary": 1}), vec![], 50))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let source = SheetSource::LocalFile(PathBuf::from("/definitely/missing.csv"));
        let err = run(&source, &[], &request(json!({}), vec![], 50)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
