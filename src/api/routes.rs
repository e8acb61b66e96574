use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::api::handlers::{admin, chat, AppState};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/tenants/{tenant_id}/chat", post(chat::chat))
        .route("/api/tenants/{tenant_id}/query", post(chat::query))
        .route(
            "/api/tenants/{tenant_id}/connections",
            get(admin::list_connections).post(admin::create_connection),
        )
        .route(
            "/api/tenants/{tenant_id}/whitelist",
            get(admin::list_whitelist).post(admin::add_whitelist),
        )
        .route(
            "/api/tenants/{tenant_id}/whitelist/{resource}",
            axum::routing::delete(admin::remove_whitelist),
        )
        .route("/api/tenants/{tenant_id}/audit", get(admin::list_audit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.cache.stats();
    Json(json!({
        "status": "ok",
        "managed_connections": state.manager.connection_count().await,
        "cache": {
            "entries": state.cache.len(),
            "hits": stats.hits,
            "misses": stats.misses,
        },
    }))
}
