use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-tenant allow-list entry. An empty `allowed_columns` means every column
/// of the resource is permitted; a resource absent from the registry is
/// denied outright.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowedResource {
    pub tenant_id: String,
    pub resource_name: String,
    pub allowed_columns: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl AllowedResource {
    pub fn new(tenant_id: String, resource_name: String, allowed_columns: Vec<String>) -> Self {
        Self {
            tenant_id,
            resource_name,
            allowed_columns,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WhitelistAddRequest {
    pub resource: String,
    #[serde(default)]
    pub columns: Vec<String>,
}
