use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::{ChatRequest, ChatResponse};
use crate::security::sanitize_json;

fn parse_body(mut raw: Value) -> Result<ChatRequest, AppError> {
    sanitize_json(&mut raw);
    let payload: ChatRequest = serde_json::from_value(raw)
        .map_err(|e| AppError::Validation(format!("Invalid request body: {}", e)))?;
    if payload.message.trim().is_empty() {
        return Err(AppError::Validation("Message cannot be empty".to_string()));
    }
    Ok(payload)
}

/// Conversational endpoint. Runner failures come back as assistant messages.
pub async fn chat(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(raw): Json<Value>,
) -> Result<Json<ChatResponse>, AppError> {
    let payload = parse_body(raw)?;
    state.security.admit(&tenant_id, &payload.message)?;
    tracing::info!("Chat request for tenant {}", tenant_id);

    let work = state
        .orchestrator
        .handle_chat(&tenant_id, payload.user_id.as_deref(), &payload.message);
    let response = tokio::time::timeout(state.config.request_timeout(), work)
        .await
        .map_err(|_| {
            AppError::Timeout(format!(
                "Request exceeded {} seconds",
                state.config.security.request_timeout_secs
            ))
        })??;

    Ok(Json(response))
}

/// Single-shot endpoint. Failures surface as typed HTTP errors.
pub async fn query(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(raw): Json<Value>,
) -> Result<Json<ChatResponse>, AppError> {
    let payload = parse_body(raw)?;
    state.security.admit(&tenant_id, &payload.message)?;
    tracing::info!("Single-shot query for tenant {}", tenant_id);

    let work = state
        .orchestrator
        .handle_query(&tenant_id, payload.user_id.as_deref(), &payload.message);
    let response = tokio::time::timeout(state.config.request_timeout(), work)
        .await
        .map_err(|_| {
            AppError::Timeout(format!(
                "Request exceeded {} seconds",
                state.config.security.request_timeout_secs
            ))
        })??;

    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_body_sanitizes_strings() {
        let payload = parse_body(json!({
            "message": "<script>alert(1)</script>show orders"
        }))
        .unwrap();
        assert_eq!(payload.message, "show orders");
    }

    #[test]
    fn test_parse_body_rejects_empty_message() {
        assert!(parse_body(json!({"message": "   "})).is_err());
        assert!(parse_body(json!({"note": "no message field"})).is_err());
    }
}
