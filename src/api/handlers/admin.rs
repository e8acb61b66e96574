use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::{BackendKind, CreateConnectionRequest, TenantConnection, WhitelistAddRequest};
use crate::services::manager::mask_credentials;

// ---------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------

pub async fn list_connections(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let connections = state
        .storage
        .list_connections(&tenant_id)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    let masked: Vec<serde_json::Value> = connections
        .iter()
        .map(|c| {
            json!({
                "id": c.id,
                "kind": c.kind.as_str(),
                "uri": mask_credentials(&c.uri),
                "read_only": c.read_only,
                "created_at": c.created_at,
            })
        })
        .collect();
    Ok(Json(json!({ "connections": masked })))
}

pub async fn create_connection(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(payload): Json<CreateConnectionRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let kind = BackendKind::parse(&payload.kind)?;
    if payload.uri.trim().is_empty() {
        return Err(AppError::Validation("Connection URI cannot be empty".to_string()));
    }

    let connection = TenantConnection::new(tenant_id.clone(), kind, payload.uri);
    state
        .storage
        .save_connection(&connection)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    tracing::info!(
        "Registered {} connection {} for tenant {}",
        kind.as_str(),
        connection.id,
        tenant_id
    );
    Ok(Json(json!({ "id": connection.id, "kind": kind.as_str() })))
}

// ---------------------------------------------------------------------
// Whitelist
// ---------------------------------------------------------------------

pub async fn list_whitelist(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let entries = state.whitelist.list(&tenant_id).await?;
    Ok(Json(json!({ "resources": entries })))
}

pub async fn add_whitelist(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(payload): Json<WhitelistAddRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if payload.resource.trim().is_empty() {
        return Err(AppError::Validation("Resource name cannot be empty".to_string()));
    }
    state
        .whitelist
        .add(&tenant_id, &payload.resource, payload.columns)
        .await?;
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn remove_whitelist(
    State(state): State<AppState>,
    Path((tenant_id, resource)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let removed = state.whitelist.remove(&tenant_id, &resource).await?;
    if !removed {
        return Err(AppError::NotFound(format!(
            "Resource {:?} is not whitelisted",
            resource
        )));
    }
    Ok(Json(json!({ "status": "removed" })))
}

// ---------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_audit_count")]
    pub count: usize,
}

fn default_audit_count() -> usize {
    50
}

pub async fn list_audit(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(params): Query<AuditQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let records = state
        .storage
        .list_audit(&tenant_id, params.count.min(500))
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
    Ok(Json(json!({ "records": records })))
}
