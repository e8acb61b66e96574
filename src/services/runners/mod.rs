// Query runners: execute a validated structured request against one backend
// kind, enforcing the tenant's whitelist before any backend call.

pub mod document;
pub mod spreadsheet;
pub mod sql;

use serde_json::Value;

use crate::api::middleware::AppError;

/// Column list plus sample rows assembled for LLM schema context.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Introspection {
    pub columns: Vec<String>,
    pub sample: Vec<Value>,
}

/// Shared whitelist enforcement. An empty allow-list permits every column;
/// otherwise each requested column/projection/sort/filter key must be a
/// member, and the rejection names the permitted set.
pub fn ensure_columns_allowed(allowed: &[String], requested: &[&str]) -> Result<(), AppError> {
    if allowed.is_empty() {
        return Ok(());
    }
    for col in requested {
        if !allowed.iter().any(|a| a == col) {
            return Err(AppError::AccessDenied(format!(
                "Column {:?} is not permitted for this resource. Allowed columns: {}",
                col,
                allowed.join(", ")
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_allowlist_permits_everything() {
        assert!(ensure_columns_allowed(&[], &["anything", "at_all"]).is_ok());
    }

    #[test]
    fn test_denial_names_permitted_set() {
        let allowed = vec!["id".to_string(), "name".to_string()];
        let err = ensure_columns_allowed(&allowed, &["secret"]).unwrap_err();
        match err {
            AppError::AccessDenied(msg) => {
                assert!(msg.contains("secret"));
                assert!(msg.contains("id, name"));
            }
            other => panic!("expected AccessDenied, got {:?}", other),
        }
    }

    #[test]
    fn test_subset_allowed() {
        let allowed = vec!["id".to_string(), "name".to_string()];
        assert!(ensure_columns_allowed(&allowed, &["name"]).is_ok());
        assert!(ensure_columns_allowed(&allowed, &["id", "name"]).is_ok());
    }
}
