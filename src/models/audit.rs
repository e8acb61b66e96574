use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fire-and-forget record of one execution attempt, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Request parameters, truncated before persisting.
    pub params: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    pub duration_ms: u64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(tenant_id: String, tool: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id,
            user_id: None,
            tool,
            target: None,
            params: String::new(),
            row_count: None,
            duration_ms: 0,
            ok: false,
            error: None,
            created_at: Utc::now(),
        }
    }
}
