use std::sync::Arc;

use serde_json::Value;

use crate::models::AuditRecord;
use crate::storage::SqliteStorage;

/// Audit entries never exceed this many bytes of parameters.
const MAX_PARAMS_LEN: usize = 512;

/// Fire-and-forget audit sink. Every execution attempt is recorded, success
/// or failure; write errors are logged, never propagated to the request.
pub struct AuditLog {
    storage: Arc<SqliteStorage>,
}

impl AuditLog {
    pub fn new(storage: Arc<SqliteStorage>) -> Self {
        Self { storage }
    }

    pub fn record(&self, record: AuditRecord) {
        let storage = self.storage.clone();
        tokio::spawn(async move {
            if let Err(e) = storage.append_audit(&record).await {
                tracing::error!(
                    "Failed to write audit record for tenant {}: {}",
                    record.tenant_id,
                    e
                );
            }
        });
    }

    /// Awaitable variant used where the caller wants the write durably done
    /// (tests, shutdown paths).
    pub async fn record_sync(&self, record: AuditRecord) {
        if let Err(e) = self.storage.append_audit(&record).await {
            tracing::error!(
                "Failed to write audit record for tenant {}: {}",
                record.tenant_id,
                e
            );
        }
    }
}

/// Serializes request params and truncates them for the audit snapshot.
pub fn truncate_params(params: &Value) -> String {
    let mut text = params.to_string();
    if text.len() > MAX_PARAMS_LEN {
        let mut cut = MAX_PARAMS_LEN;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("...");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truncate_params() {
        let small = json!({"table": "orders"});
        assert_eq!(truncate_params(&small), small.to_string());

        let big = json!({"filter": "x".repeat(2000)});
        let truncated = truncate_params(&big);
        assert!(truncated.len() <= MAX_PARAMS_LEN + 3);
        assert!(truncated.ends_with("..."));
    }

    #[tokio::test]
    async fn test_record_sync_persists() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(SqliteStorage::new(dir.path().join("audit.db")).await.unwrap());
        let audit = AuditLog::new(storage.clone());

        let mut record = AuditRecord::new("t1".to_string(), "sheet".to_string());
        record.ok = true;
        audit.record_sync(record).await;

        assert_eq!(storage.list_audit("t1", 10).await.unwrap().len(), 1);
    }
}
