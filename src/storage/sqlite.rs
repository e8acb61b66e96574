use rusqlite::{Connection, Result as SqliteResult};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::{
    AllowedResource, AuditRecord, BackendKind, ConversationTurn, Role, TenantConnection,
};

/// SQLite-backed durable record store: tenant connections, whitelist
/// entries, conversation turns, and the audit log.
/// Uses tokio::Mutex for async-friendly locking.
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        // Handle SQLite URL format (sqlite:./path or sqlite://path)
        let path_str = db_path.as_ref().to_string_lossy();
        let clean_path: &str = if path_str.starts_with("sqlite:") {
            let mut cleaned = path_str.trim_start_matches("sqlite:");
            cleaned = cleaned.trim_start_matches("//");
            cleaned
        } else {
            path_str.as_ref()
        };

        let conn = Connection::open(clean_path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Initialize database schema
    async fn init_schema(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS tenant_connections (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                uri TEXT NOT NULL,
                read_only INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS allowed_resources (
                tenant_id TEXT NOT NULL,
                resource_name TEXT NOT NULL,
                allowed_columns TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(tenant_id, resource_name)
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_turns (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                user_id TEXT,
                tool TEXT NOT NULL,
                target TEXT,
                params TEXT NOT NULL,
                row_count INTEGER,
                duration_ms INTEGER NOT NULL,
                ok INTEGER NOT NULL,
                error TEXT,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_connections_tenant ON tenant_connections(tenant_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_allowed_tenant ON allowed_resources(tenant_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_turns_tenant_created ON conversation_turns(tenant_id, created_at DESC)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_audit_tenant_created ON audit_log(tenant_id, created_at DESC)",
            [],
        )?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Tenant connections (consumed read-only by the gateway; the setup
    // flow that writes them is external, this is its repository surface)
    // ------------------------------------------------------------------

    pub async fn save_connection(&self, record: &TenantConnection) -> SqliteResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO tenant_connections (id, tenant_id, kind, uri, read_only, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            rusqlite::params![
                record.id,
                record.tenant_id,
                record.kind.as_str(),
                record.uri,
                record.read_only as i64,
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn get_connection(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> SqliteResult<Option<TenantConnection>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, kind, uri, read_only, created_at
             FROM tenant_connections WHERE tenant_id = ?1 AND id = ?2",
        )?;
        let mut rows = stmt.query(rusqlite::params![tenant_id, id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_connection(row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_connections(&self, tenant_id: &str) -> SqliteResult<Vec<TenantConnection>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, kind, uri, read_only, created_at
             FROM tenant_connections WHERE tenant_id = ?1 ORDER BY created_at",
        )?;
        let mut rows = stmt.query(rusqlite::params![tenant_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(Self::row_to_connection(row)?);
        }
        Ok(out)
    }

    pub async fn find_connection_by_kind(
        &self,
        tenant_id: &str,
        kind: BackendKind,
    ) -> SqliteResult<Option<TenantConnection>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, kind, uri, read_only, created_at
             FROM tenant_connections WHERE tenant_id = ?1 AND kind = ?2 LIMIT 1",
        )?;
        let mut rows = stmt.query(rusqlite::params![tenant_id, kind.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_connection(row)?)),
            None => Ok(None),
        }
    }

    fn row_to_connection(row: &rusqlite::Row<'_>) -> SqliteResult<TenantConnection> {
        let kind_str: String = row.get(2)?;
        let created_at: String = row.get(5)?;
        Ok(TenantConnection {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            kind: BackendKind::parse(&kind_str).unwrap_or(BackendKind::SqlPg),
            uri: row.get(3)?,
            read_only: row.get::<_, i64>(4)? != 0,
            created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .unwrap_or_else(|_| chrono::Utc::now()),
        })
    }

    // ------------------------------------------------------------------
    // Whitelist entries
    // ------------------------------------------------------------------

    pub async fn upsert_allowed_resource(&self, entry: &AllowedResource) -> SqliteResult<()> {
        let conn = self.conn.lock().await;
        let columns_json = serde_json::to_string(&entry.allowed_columns).unwrap_or_default();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO allowed_resources (tenant_id, resource_name, allowed_columns, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            rusqlite::params![
                entry.tenant_id,
                entry.resource_name,
                columns_json,
                entry.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn remove_allowed_resource(
        &self,
        tenant_id: &str,
        resource_name: &str,
    ) -> SqliteResult<bool> {
        let conn = self.conn.lock().await;
        let affected = conn.execute(
            "DELETE FROM allowed_resources WHERE tenant_id = ?1 AND resource_name = ?2",
            rusqlite::params![tenant_id, resource_name],
        )?;
        Ok(affected > 0)
    }

    pub async fn list_allowed_resources(
        &self,
        tenant_id: &str,
    ) -> SqliteResult<Vec<AllowedResource>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT tenant_id, resource_name, allowed_columns, created_at
             FROM allowed_resources WHERE tenant_id = ?1 ORDER BY resource_name",
        )?;
        let mut rows = stmt.query(rusqlite::params![tenant_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let columns_json: String = row.get(2)?;
            let created_at: String = row.get(3)?;
            out.push(AllowedResource {
                tenant_id: row.get(0)?,
                resource_name: row.get(1)?,
                allowed_columns: serde_json::from_str(&columns_json).unwrap_or_default(),
                created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                    .map(|dt| dt.with_timezone(&chrono::Utc))
                    .unwrap_or_else(|_| chrono::Utc::now()),
            });
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Conversation history
    // ------------------------------------------------------------------

    pub async fn append_turn(&self, turn: &ConversationTurn) -> SqliteResult<()> {
        let conn = self.conn.lock().await;
        let metadata = turn
            .metadata
            .as_ref()
            .map(|m| serde_json::to_string(m).unwrap_or_default());
        conn.execute(
            r#"
            INSERT INTO conversation_turns (id, tenant_id, role, content, metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            rusqlite::params![
                turn.id,
                turn.tenant_id,
                turn.role.as_str(),
                turn.content,
                metadata,
                turn.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Most recent turns, oldest first, for prompt context.
    pub async fn recent_turns(
        &self,
        tenant_id: &str,
        count: usize,
    ) -> SqliteResult<Vec<ConversationTurn>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, role, content, metadata, created_at
             FROM conversation_turns WHERE tenant_id = ?1
             ORDER BY created_at DESC LIMIT ?2",
        )?;
        let mut rows = stmt.query(rusqlite::params![tenant_id, count as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let role_str: String = row.get(2)?;
            let metadata: Option<String> = row.get(4)?;
            let created_at: String = row.get(5)?;
            out.push(ConversationTurn {
                id: row.get(0)?,
                tenant_id: row.get(1)?,
                role: Role::parse(&role_str),
                content: row.get(3)?,
                metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
                created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                    .map(|dt| dt.with_timezone(&chrono::Utc))
                    .unwrap_or_else(|_| chrono::Utc::now()),
            });
        }
        out.reverse();
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Audit log
    // ------------------------------------------------------------------

    pub async fn append_audit(&self, record: &AuditRecord) -> SqliteResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO audit_log (id, tenant_id, user_id, tool, target, params, row_count, duration_ms, ok, error, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            rusqlite::params![
                record.id,
                record.tenant_id,
                record.user_id,
                record.tool,
                record.target,
                record.params,
                record.row_count.map(|c| c as i64),
                record.duration_ms as i64,
                record.ok as i64,
                record.error,
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn list_audit(&self, tenant_id: &str, count: usize) -> SqliteResult<Vec<AuditRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, user_id, tool, target, params, row_count, duration_ms, ok, error, created_at
             FROM audit_log WHERE tenant_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let mut rows = stmt.query(rusqlite::params![tenant_id, count as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let created_at: String = row.get(10)?;
            out.push(AuditRecord {
                id: row.get(0)?,
                tenant_id: row.get(1)?,
                user_id: row.get(2)?,
                tool: row.get(3)?,
                target: row.get(4)?,
                params: row.get(5)?,
                row_count: row.get::<_, Option<i64>>(6)?.map(|c| c as usize),
                duration_ms: row.get::<_, i64>(7)? as u64,
                ok: row.get::<_, i64>(8)? != 0,
                error: row.get(9)?,
                created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                    .map(|dt| dt.with_timezone(&chrono::Utc))
                    .unwrap_or_else(|_| chrono::Utc::now()),
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    async fn temp_storage() -> (tempfile::TempDir, SqliteStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = SqliteStorage::new(dir.path().join("test.db")).await.unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn test_connection_roundtrip() {
        let (_dir, storage) = temp_storage().await;
        let record = TenantConnection::new(
            "t1".to_string(),
            BackendKind::SqlPg,
            "postgresql://localhost/app".to_string(),
        );
        storage.save_connection(&record).await.unwrap();

        let fetched = storage.get_connection("t1", &record.id).await.unwrap().unwrap();
        assert_eq!(fetched.kind, BackendKind::SqlPg);
        assert!(fetched.read_only);

        // Other tenants cannot see it
        assert!(storage.get_connection("t2", &record.id).await.unwrap().is_none());

        let by_kind = storage
            .find_connection_by_kind("t1", BackendKind::SqlPg)
            .await
            .unwrap();
        assert!(by_kind.is_some());
        assert!(storage
            .find_connection_by_kind("t1", BackendKind::Document)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_allowed_resources_roundtrip() {
        let (_dir, storage) = temp_storage().await;
        let entry = AllowedResource::new(
            "t1".to_string(),
            "orders".to_string(),
            vec!["id".to_string(), "name".to_string()],
        );
        storage.upsert_allowed_resource(&entry).await.unwrap();

        let listed = storage.list_allowed_resources("t1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].allowed_columns, vec!["id", "name"]);

        assert!(storage.remove_allowed_resource("t1", "orders").await.unwrap());
        assert!(storage.list_allowed_resources("t1").await.unwrap().is_empty());
        assert!(!storage.remove_allowed_resource("t1", "orders").await.unwrap());
    }

    #[tokio::test]
    async fn test_recent_turns_ordering() {
        let (_dir, storage) = temp_storage().await;
        for (i, role) in [(0, Role::User), (1, Role::Assistant), (2, Role::User)] {
            let mut turn = ConversationTurn::new(
                "t1".to_string(),
                role,
                format!("turn {}", i),
                None,
            );
            turn.created_at = chrono::Utc::now() + chrono::Duration::seconds(i);
            storage.append_turn(&turn).await.unwrap();
        }
        let turns = storage.recent_turns("t1", 2).await.unwrap();
        assert_eq!(turns.len(), 2);
        // Oldest first within the window
        assert_eq!(turns[0].content, "turn 1");
        assert_eq!(turns[1].content, "turn 2");
    }

    #[tokio::test]
    async fn test_audit_roundtrip() {
        let (_dir, storage) = temp_storage().await;
        let mut record = AuditRecord::new("t1".to_string(), "sql".to_string());
        record.target = Some("orders".to_string());
        record.row_count = Some(5);
        record.ok = true;
        storage.append_audit(&record).await.unwrap();

        let listed = storage.list_audit("t1", 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].ok);
        assert_eq!(listed[0].row_count, Some(5));
    }
}
