use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::middleware::AppError;

/// Backend kinds a tenant connection can point at.
///
/// Kept as a closed enum so every dispatch point is exhaustively matched;
/// adding a backend kind is a compile-time-checked change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    SqlPg,
    SqlMysql,
    Document,
    Spreadsheet,
}

impl BackendKind {
    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s.to_lowercase().as_str() {
            "sql_pg" | "postgresql" | "postgres" => Ok(BackendKind::SqlPg),
            "sql_mysql" | "mysql" | "mariadb" => Ok(BackendKind::SqlMysql),
            "document" | "mongodb" | "mongo" => Ok(BackendKind::Document),
            "spreadsheet" | "sheet" => Ok(BackendKind::Spreadsheet),
            _ => Err(AppError::Validation(format!("Unsupported backend kind: {}", s))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::SqlPg => "sql_pg",
            BackendKind::SqlMysql => "sql_mysql",
            BackendKind::Document => "document",
            BackendKind::Spreadsheet => "spreadsheet",
        }
    }
}

/// A tenant's configured backend connection. Created by an external setup
/// flow; the gateway consumes these read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConnection {
    pub id: String,
    pub tenant_id: String,
    pub kind: BackendKind,
    pub uri: String,
    pub read_only: bool,
    pub created_at: DateTime<Utc>,
}

impl TenantConnection {
    pub fn new(tenant_id: String, kind: BackendKind, uri: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id,
            kind,
            uri,
            read_only: true,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> ConnKey {
        ConnKey {
            tenant_id: self.tenant_id.clone(),
            connection_id: self.id.clone(),
        }
    }
}

/// Composite key for the managed connection table.
///
/// A struct key rather than string concatenation, so tenant and connection
/// ids can never collide ambiguously.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnKey {
    pub tenant_id: String,
    pub connection_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateConnectionRequest {
    pub kind: String,
    pub uri: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!(BackendKind::parse("postgres").unwrap(), BackendKind::SqlPg);
        assert_eq!(BackendKind::parse("MySQL").unwrap(), BackendKind::SqlMysql);
        assert_eq!(BackendKind::parse("mongodb").unwrap(), BackendKind::Document);
        assert_eq!(BackendKind::parse("sheet").unwrap(), BackendKind::Spreadsheet);
        assert!(BackendKind::parse("oracle").is_err());
    }

    #[test]
    fn test_conn_key_no_collision() {
        // "a" + "bc" and "ab" + "c" would collide under string concatenation
        let k1 = ConnKey { tenant_id: "a".into(), connection_id: "bc".into() };
        let k2 = ConnKey { tenant_id: "ab".into(), connection_id: "c".into() };
        assert_ne!(k1, k2);
    }
}
