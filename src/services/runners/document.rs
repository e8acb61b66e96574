// Document runner: executes a validated DocumentRequest against a named
// database + collection via the MongoDB driver.

use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use serde_json::{Map, Value};
use std::time::{Duration, Instant};

use crate::api::middleware::AppError;
use crate::models::{DocumentRequest, QueryResult};
use crate::services::runners::{ensure_columns_allowed, Introspection};

const QUERY_TIMEOUT: Duration = Duration::from_secs(30);
const SAMPLE_TIMEOUT: Duration = Duration::from_secs(3);
const SAMPLE_DOCS: i64 = 3;

/// serde_json -> bson, preserving numeric types where possible.
fn json_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Bson::Int64(i)
            } else {
                Bson::Double(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(json_to_bson).collect()),
        Value::Object(map) => {
            let mut d = Document::new();
            for (k, v) in map {
                d.insert(k.clone(), json_to_bson(v));
            }
            Bson::Document(d)
        }
    }
}

fn map_to_document(map: &Map<String, Value>) -> Document {
    let mut d = Document::new();
    for (k, v) in map {
        d.insert(k.clone(), json_to_bson(v));
    }
    d
}

fn bson_doc_to_json(d: Document) -> Value {
    serde_json::to_value(&d).unwrap_or(Value::Null)
}

/// Map driver failures onto the user-facing error categories.
fn classify_mongo_error(e: mongodb::error::Error) -> AppError {
    use mongodb::error::ErrorKind;
    match e.kind.as_ref() {
        ErrorKind::Authentication { message, .. } => {
            AppError::AccessDenied(format!("Backend denied access: {}", message))
        }
        ErrorKind::Io(_) | ErrorKind::ServerSelection { .. } => {
            AppError::Network(format!("MongoDB connection error: {}", e))
        }
        ErrorKind::Command(cmd) if cmd.code == 13 => {
            // Unauthorized
            AppError::AccessDenied(format!("Backend denied access: {}", cmd.message))
        }
        ErrorKind::Command(cmd) if cmd.code == 26 => {
            // NamespaceNotFound
            AppError::NotFound(format!("Collection not found: {}", cmd.message))
        }
        _ => AppError::Database(format!("Query execution failed: {}", e)),
    }
}

fn requested_fields(request: &DocumentRequest) -> Vec<&str> {
    let mut fields: Vec<&str> = request.filter.keys().map(String::as_str).collect();
    if let Some(p) = &request.projection {
        fields.extend(p.keys().map(String::as_str));
    }
    if let Some(s) = &request.sort {
        fields.extend(s.keys().map(String::as_str));
    }
    fields
}

async fn find_documents(
    client: &mongodb::Client,
    request: &DocumentRequest,
    with_sort: bool,
) -> Result<Vec<Document>, AppError> {
    let collection = client
        .database(&request.db)
        .collection::<Document>(&request.collection);

    let filter = map_to_document(&request.filter);
    let mut find = collection
        .find(filter)
        .limit(request.limit.clamp(1, crate::models::MAX_LIMIT));

    if let Some(projection) = &request.projection {
        find = find.projection(map_to_document(projection));
    }
    if with_sort {
        if let Some(sort) = &request.sort {
            // Values already validated to 1 / -1
            let mut sort_doc = Document::new();
            for (k, v) in sort {
                sort_doc.insert(k.clone(), Bson::Int32(v.as_i64().unwrap_or(1) as i32));
            }
            find = find.sort(sort_doc);
        }
    }

    let cursor = tokio::time::timeout(QUERY_TIMEOUT, find)
        .await
        .map_err(|_| {
            AppError::Timeout(format!(
                "Query timed out after {} seconds",
                QUERY_TIMEOUT.as_secs()
            ))
        })?
        .map_err(classify_mongo_error)?;

    tokio::time::timeout(QUERY_TIMEOUT, cursor.try_collect::<Vec<Document>>())
        .await
        .map_err(|_| {
            AppError::Timeout(format!(
                "Query timed out after {} seconds",
                QUERY_TIMEOUT.as_secs()
            ))
        })?
        .map_err(classify_mongo_error)
}

pub async fn run(
    client: &mongodb::Client,
    allowed_columns: &[String],
    request: &DocumentRequest,
) -> Result<QueryResult, AppError> {
    ensure_columns_allowed(allowed_columns, &requested_fields(request))?;

    let start_time = Instant::now();
    let documents = match find_documents(client, request, true).await {
        Ok(docs) => docs,
        Err(e) if request.sort.is_some() && matches!(e, AppError::Database(_)) => {
            // A bad sort (e.g. unindexed field over the memory limit) should
            // not sink the whole query; degrade to unsorted results.
            tracing::warn!(
                "Sorted find failed on {}.{} ({}); retrying without sort",
                request.db,
                request.collection,
                e
            );
            find_documents(client, request, false).await?
        }
        Err(e) => return Err(e),
    };

    let rows: Vec<Value> = documents.into_iter().map(bson_doc_to_json).collect();
    Ok(QueryResult::new(rows, start_time.elapsed().as_millis() as u64))
}

/// Samples a few documents and unions their keys; document stores have no
/// fixed schema to list.
pub async fn introspect(
    client: &mongodb::Client,
    db: &str,
    collection_name: &str,
) -> Result<Introspection, AppError> {
    let collection = client.database(db).collection::<Document>(collection_name);

    let cursor = tokio::time::timeout(SAMPLE_TIMEOUT, collection.find(doc! {}).limit(SAMPLE_DOCS))
        .await
        .map_err(|_| AppError::Timeout("Schema sampling timed out".to_string()))?
        .map_err(classify_mongo_error)?;

    let documents: Vec<Document> = tokio::time::timeout(SAMPLE_TIMEOUT, cursor.try_collect())
        .await
        .map_err(|_| AppError::Timeout("Schema sampling timed out".to_string()))?
        .map_err(classify_mongo_error)?;

    let mut columns: Vec<String> = Vec::new();
    for d in &documents {
        for key in d.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }

    Ok(Introspection {
        columns,
        sample: documents.into_iter().map(bson_doc_to_json).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_to_bson_preserves_types() {
        assert_eq!(json_to_bson(&json!(42)), Bson::Int64(42));
        assert_eq!(json_to_bson(&json!(4.5)), Bson::Double(4.5));
        assert_eq!(json_to_bson(&json!("x")), Bson::String("x".to_string()));
        assert_eq!(json_to_bson(&json!(true)), Bson::Boolean(true));
        assert_eq!(json_to_bson(&Value::Null), Bson::Null);
    }

    #[test]
    fn test_map_to_document_nested() {
        let mut map = Map::new();
        map.insert("status".to_string(), json!("open"));
        map.insert("qty".to_string(), json!(3));
        let d = map_to_document(&map);
        assert_eq!(d.get_str("status").unwrap(), "open");
        assert_eq!(d.get_i64("qty").unwrap(), 3);
    }

    #[test]
    fn test_requested_fields_include_filter_projection_sort() {
        let request = DocumentRequest {
            db: "shop".to_string(),
            collection: "orders".to_string(),
            filter: {
                let mut m = Map::new();
                m.insert("status".to_string(), json!("open"));
                m
            },
            projection: Some({
                let mut m = Map::new();
                m.insert("total".to_string(), json!(1));
                m
            }),
            sort: Some({
                let mut m = Map::new();
                m.insert("created_at".to_string(), json!(-1));
                m
            }),
            limit: 50,
        };
        let fields = requested_fields(&request);
        assert!(fields.contains(&"status"));
        assert!(fields.contains(&"total"));
        assert!(fields.contains(&"created_at"));

        let allowed = vec!["status".to_string(), "total".to_string()];
        assert!(ensure_columns_allowed(&allowed, &fields).is_err());
    }
}
