// Execution seam between the orchestrator and the backend runners. The
// orchestrator only sees this trait, which keeps its protocol testable with a
// mock that never opens a network connection.

use async_trait::async_trait;
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::models::{QueryResult, StructuredRequest, TenantConnection};
use crate::services::manager::{BackendClient, ConnectionManager};
use crate::services::runners::{self, Introspection};

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run a validated request against the given tenant connection. The
    /// whitelist columns for the target resource are enforced by the runner.
    async fn execute(
        &self,
        connection: &TenantConnection,
        allowed_columns: &[String],
        request: &StructuredRequest,
    ) -> Result<QueryResult, AppError>;

    /// Columns plus a few sample rows for the request's target resource.
    async fn introspect(
        &self,
        connection: &TenantConnection,
        request: &StructuredRequest,
    ) -> Result<Introspection, AppError>;
}

/// Production executor: checks the connection out of the manager, dispatches
/// to the runner matching the backend kind, and releases the in-flight slot
/// on every path.
pub struct GatewayExecutor {
    manager: Arc<ConnectionManager>,
}

impl GatewayExecutor {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    fn kind_mismatch(connection: &TenantConnection, request: &StructuredRequest) -> AppError {
        AppError::Configuration(format!(
            "Connection {} is a {} backend but the request targets {}",
            connection.id,
            connection.kind.as_str(),
            request.kind().as_str()
        ))
    }
}

#[async_trait]
impl QueryExecutor for GatewayExecutor {
    async fn execute(
        &self,
        connection: &TenantConnection,
        allowed_columns: &[String],
        request: &StructuredRequest,
    ) -> Result<QueryResult, AppError> {
        let client = self.manager.get_connection(connection).await?;
        let result = match (&client, request) {
            (BackendClient::Postgres(pool), StructuredRequest::Sql(r)) => {
                runners::sql::run_postgres(pool, allowed_columns, r).await
            }
            (BackendClient::MySql(pool), StructuredRequest::Sql(r)) => {
                runners::sql::run_mysql(pool, allowed_columns, r).await
            }
            (BackendClient::Document(mongo), StructuredRequest::Mongo(r)) => {
                runners::document::run(mongo, allowed_columns, r).await
            }
            (BackendClient::Spreadsheet(source), StructuredRequest::Sheet(r)) => {
                runners::spreadsheet::run(source, allowed_columns, r).await
            }
            _ => Err(Self::kind_mismatch(connection, request)),
        };
        self.manager.release(&connection.key()).await;
        result
    }

    async fn introspect(
        &self,
        connection: &TenantConnection,
        request: &StructuredRequest,
    ) -> Result<Introspection, AppError> {
        let client = self.manager.get_connection(connection).await?;
        let result = match (&client, request) {
            (BackendClient::Postgres(pool), StructuredRequest::Sql(r)) => {
                runners::sql::introspect_postgres(pool, &r.table).await
            }
            (BackendClient::MySql(pool), StructuredRequest::Sql(r)) => {
                runners::sql::introspect_mysql(pool, &r.table).await
            }
            (BackendClient::Document(mongo), StructuredRequest::Mongo(r)) => {
                runners::document::introspect(mongo, &r.db, &r.collection).await
            }
            (BackendClient::Spreadsheet(source), StructuredRequest::Sheet(_)) => {
                runners::spreadsheet::introspect(source).await
            }
            _ => Err(Self::kind_mismatch(connection, request)),
        };
        self.manager.release(&connection.key()).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionsConfig;
    use crate::models::{BackendKind, SpreadsheetRequest};
    use serde_json::Map;

    fn sheet_request() -> StructuredRequest {
        StructuredRequest::Sheet(SpreadsheetRequest {
            path: "./people.csv".to_string(),
            sheet: "people".to_string(),
            filter: Map::new(),
            select: Vec::new(),
            limit: 50,
        })
    }

    #[tokio::test]
    async fn test_kind_mismatch_is_configuration_error() {
        let manager = Arc::new(ConnectionManager::new(&ConnectionsConfig {
            health_interval_secs: 300,
            idle_interval_secs: 600,
            idle_threshold_secs: 1800,
        }));
        let executor = GatewayExecutor::new(manager.clone());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.csv");
        tokio::fs::write(&path, "name\nAda\n").await.unwrap();
        let connection = TenantConnection::new(
            "acme".to_string(),
            BackendKind::Spreadsheet,
            path.to_str().unwrap().to_string(),
        );

        // Sheet connection, SQL request
        let sql: StructuredRequest = serde_json::from_value(serde_json::json!({
            "action": "sql", "dialect": "postgres", "table": "orders"
        }))
        .unwrap();
        let err = executor.execute(&connection, &[], &sql).await.unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));

        // The in-flight slot is released even on the error path
        assert_eq!(manager.active_count(&connection.key()).await, Some(0));
    }

    #[tokio::test]
    async fn test_execute_dispatches_to_sheet_runner() {
        let manager = Arc::new(ConnectionManager::new(&ConnectionsConfig {
            health_interval_secs: 300,
            idle_interval_secs: 600,
            idle_threshold_secs: 1800,
        }));
        let executor = GatewayExecutor::new(manager.clone());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.csv");
        tokio::fs::write(&path, "name,age\nAda,36\n").await.unwrap();
        let connection = TenantConnection::new(
            "acme".to_string(),
            BackendKind::Spreadsheet,
            path.to_str().unwrap().to_string(),
        );

        let result = executor
            .execute(&connection, &[], &sheet_request())
            .await
            .unwrap();
        assert_eq!(result.row_count, 1);
        assert_eq!(manager.active_count(&connection.key()).await, Some(0));
    }
}
