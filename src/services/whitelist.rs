use std::collections::HashMap;
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::models::AllowedResource;
use crate::storage::SqliteStorage;

/// Per-tenant allow-list of queryable resources. A resource missing from the
/// map is forbidden; a present resource with an empty column list permits
/// every column.
pub struct WhitelistRegistry {
    storage: Arc<SqliteStorage>,
}

impl WhitelistRegistry {
    pub fn new(storage: Arc<SqliteStorage>) -> Self {
        Self { storage }
    }

    pub async fn get_allowed(
        &self,
        tenant_id: &str,
    ) -> Result<HashMap<String, Vec<String>>, AppError> {
        let entries = self
            .storage
            .list_allowed_resources(tenant_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(entries
            .into_iter()
            .map(|e| (e.resource_name, e.allowed_columns))
            .collect())
    }

    pub async fn add(
        &self,
        tenant_id: &str,
        resource_name: &str,
        allowed_columns: Vec<String>,
    ) -> Result<(), AppError> {
        let entry = AllowedResource::new(
            tenant_id.to_string(),
            resource_name.to_string(),
            allowed_columns,
        );
        self.storage
            .upsert_allowed_resource(&entry)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn remove(&self, tenant_id: &str, resource_name: &str) -> Result<bool, AppError> {
        self.storage
            .remove_allowed_resource(tenant_id, resource_name)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn list(&self, tenant_id: &str) -> Result<Vec<AllowedResource>, AppError> {
        self.storage
            .list_allowed_resources(tenant_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
