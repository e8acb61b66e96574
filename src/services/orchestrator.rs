// Agent orchestrator: drives the natural-language protocol from inbound
// message to executed query and summary. Chat mode converts runner failures
// into assistant messages; single-shot mode propagates them as HTTP errors.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::api::middleware::AppError;
use crate::config::Config;
use crate::models::{
    AuditRecord, ChatResponse, ConversationTurn, QueryResult, Role, SpreadsheetRequest,
    SqlDialect, SqlRequest, StructuredRequest, TenantConnection,
};
use crate::services::audit::{truncate_params, AuditLog};
use crate::services::cache::TtlCache;
use crate::services::executor::QueryExecutor;
use crate::services::llm::{ChatMessage, LlmClient};
use crate::services::whitelist::WhitelistRegistry;
use crate::storage::SqliteStorage;

/// Rows serialized into the summarization prompt.
const SUMMARY_ROWS: usize = 5;
/// Rows returned in the response payload.
const PAYLOAD_ROWS: usize = 100;
/// Conversation turns included in prompts.
const HISTORY_TURNS: usize = 10;
/// Below this many whitelisted resources, narrowing is skipped.
const NARROWING_THRESHOLD: usize = 4;

const SYSTEM_PROMPT: &str = "\
You are a data assistant for a read-only query gateway. You can answer \
conversationally, or you can query one of the resources described below by \
replying with ONLY a JSON object. Supported shapes:\n\
  {\"action\": \"sql\", \"dialect\": \"postgres\"|\"mysql\", \"table\": ..., \
\"columns\": [...], \"where\": {col: value}, \"order_by\": ..., \"limit\": N}\n\
  {\"action\": \"mongo\", \"db\": ..., \"collection\": ..., \"filter\": {...}, \
\"projection\": {field: 0|1}, \"sort\": {field: 1|-1}, \"limit\": N}\n\
  {\"action\": \"sheet\", \"path\": ..., \"sheet\": ..., \"filter\": {...}, \
\"select\": [...], \"limit\": N}\n\
Filters are equality-only. Never invent resources or columns that are not \
listed. If the question does not need data, reply with plain text.";

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub auto_register_sheets: bool,
    pub schema_ttl: Duration,
    pub result_ttl: Duration,
    pub max_cacheable_rows: usize,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            auto_register_sheets: config.security.auto_register_sheets,
            schema_ttl: Duration::from_secs(config.cache.schema_ttl_secs),
            result_ttl: Duration::from_secs(config.cache.result_ttl_secs),
            max_cacheable_rows: config.cache.max_cacheable_rows,
        }
    }
}

pub struct AgentOrchestrator {
    llm: Arc<dyn LlmClient>,
    executor: Arc<dyn QueryExecutor>,
    whitelist: Arc<WhitelistRegistry>,
    cache: Arc<TtlCache>,
    storage: Arc<SqliteStorage>,
    audit: Arc<AuditLog>,
    settings: OrchestratorSettings,
}

impl AgentOrchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: Arc<dyn QueryExecutor>,
        whitelist: Arc<WhitelistRegistry>,
        cache: Arc<TtlCache>,
        storage: Arc<SqliteStorage>,
        audit: Arc<AuditLog>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self { llm, executor, whitelist, cache, storage, audit, settings }
    }

    /// Chat mode: runner failures become assistant messages so the
    /// conversation continues.
    pub async fn handle_chat(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
        message: &str,
    ) -> Result<ChatResponse, AppError> {
        self.run_protocol(tenant_id, user_id, message, true).await
    }

    /// Single-shot mode: runner failures propagate as typed errors.
    pub async fn handle_query(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
        message: &str,
    ) -> Result<ChatResponse, AppError> {
        self.run_protocol(tenant_id, user_id, message, false).await
    }

    async fn run_protocol(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
        message: &str,
        chat_mode: bool,
    ) -> Result<ChatResponse, AppError> {
        let start_time = Instant::now();

        let allowed = self.whitelist.get_allowed(tenant_id).await?;
        let history = self
            .storage
            .recent_turns(tenant_id, HISTORY_TURNS)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        // Step 1: narrow to relevant resources
        let relevant = self.narrow_resources(tenant_id, message, &allowed, &history).await;

        // Step 2: cache-backed schema context
        let schema_context = self.build_schema_context(tenant_id, &relevant).await;

        // Step 3: action-or-answer completion
        let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];
        if !schema_context.is_empty() {
            messages.push(ChatMessage::system(format!(
                "Available resources:\n{}",
                schema_context
            )));
        }
        for turn in &history {
            match turn.role {
                Role::User => messages.push(ChatMessage::user(turn.content.clone())),
                Role::Assistant => messages.push(ChatMessage::assistant(turn.content.clone())),
                Role::System => {}
            }
        }
        messages.push(ChatMessage::user(message));

        let completion = self.llm.complete(&messages).await?;

        // Step 4: no action present means a conversational answer
        let Some(mut request) = self.parse_action(tenant_id, &completion) else {
            let response = ChatResponse::conversational(
                completion.trim().to_string(),
                start_time.elapsed().as_millis() as u64,
            );
            self.persist_turns(tenant_id, message, &response.answer, None).await;
            return Ok(response);
        };

        // Step 5: validate, re-check the whitelist, resolve the connection
        let execution = self
            .validate_and_execute(tenant_id, user_id, &mut request, &allowed, start_time)
            .await;

        match execution {
            Ok(result) => {
                // Step 6: truncate and summarize
                let answer = self.summarize(message, &request, &result).await;
                let data: Vec<Value> = result.rows.iter().take(PAYLOAD_ROWS).cloned().collect();
                let response = ChatResponse {
                    tool: Some(request.tool_name().to_string()),
                    target: Some(request.resource_name().to_string()),
                    row_count: Some(result.row_count),
                    data: Some(data),
                    answer,
                    duration_ms: start_time.elapsed().as_millis() as u64,
                };
                self.persist_turns(
                    tenant_id,
                    message,
                    &response.answer,
                    Some(json!({"tool": request.tool_name(), "row_count": result.row_count})),
                )
                .await;
                Ok(response)
            }
            Err(e) if chat_mode => {
                let answer = friendly_error_answer(&e);
                self.persist_turns(tenant_id, message, &answer, None).await;
                Ok(ChatResponse::conversational(
                    answer,
                    start_time.elapsed().as_millis() as u64,
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Step 1. Asks the LLM for a JSON array of relevant resource names; any
    /// parse failure falls back to all whitelisted resources.
    async fn narrow_resources(
        &self,
        tenant_id: &str,
        message: &str,
        allowed: &std::collections::HashMap<String, Vec<String>>,
        history: &[ConversationTurn],
    ) -> Vec<String> {
        let all: Vec<String> = allowed.keys().cloned().collect();
        if all.len() < NARROWING_THRESHOLD {
            return all;
        }

        let recent: String = history
            .iter()
            .rev()
            .take(2)
            .map(|t| t.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Given the question below, reply with ONLY a JSON array of the \
             resource names relevant to answering it, chosen from: {}\n\n\
             Recent context:\n{}\n\nQuestion: {}",
            serde_json::to_string(&all).unwrap_or_default(),
            recent,
            message
        );

        let reply = match self.llm.complete(&[ChatMessage::user(prompt)]).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Resource narrowing call failed for tenant {}: {}", tenant_id, e);
                return all;
            }
        };

        match extract_json_array(&reply)
            .and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
        {
            Some(names) => {
                let filtered: Vec<String> = names
                    .into_iter()
                    .filter(|n| allowed.contains_key(n))
                    .collect();
                if filtered.is_empty() { all } else { filtered }
            }
            None => {
                tracing::warn!(
                    "Resource narrowing reply for tenant {} was not a JSON array; using all resources",
                    tenant_id
                );
                all
            }
        }
    }

    /// Step 2. Introspects each relevant resource through the schema cache.
    async fn build_schema_context(&self, tenant_id: &str, resources: &[String]) -> String {
        let mut sections = Vec::new();
        for resource in resources {
            let cache_key = TtlCache::key("schema", &[tenant_id, resource]);
            if let Some(cached) = self.cache.get(&cache_key) {
                if let Some(text) = cached.as_str() {
                    sections.push(text.to_string());
                }
                continue;
            }
            match self.introspect_resource(tenant_id, resource).await {
                Some(section) => {
                    self.cache.set(
                        cache_key,
                        Value::String(section.clone()),
                        Some(self.settings.schema_ttl),
                    );
                    sections.push(section);
                }
                None => {
                    tracing::debug!(
                        "No introspectable connection for tenant {} resource {}",
                        tenant_id,
                        resource
                    );
                }
            }
        }
        sections.join("\n\n")
    }

    /// Tries the tenant's connections in order until one yields a schema for
    /// the named resource.
    async fn introspect_resource(&self, tenant_id: &str, resource: &str) -> Option<String> {
        let connections = match self.storage.list_connections(tenant_id).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Failed to list connections for tenant {}: {}", tenant_id, e);
                return None;
            }
        };

        for connection in &connections {
            let Some(probe) = probe_request(connection, resource) else {
                continue;
            };
            match self.executor.introspect(connection, &probe).await {
                Ok(info) => {
                    let sample = serde_json::to_string(&info.sample).unwrap_or_default();
                    return Some(format!(
                        "{} ({}): columns [{}]\nsample: {}",
                        resource,
                        connection.kind.as_str(),
                        info.columns.join(", "),
                        sample
                    ));
                }
                Err(e) => {
                    tracing::debug!(
                        "Introspection of {} via connection {} failed: {}",
                        resource,
                        connection.id,
                        e
                    );
                }
            }
        }
        None
    }

    /// Steps 3b/4: pull a structured action out of the completion text, or
    /// None for a conversational answer. A reply that looks like an action
    /// attempt but fails extraction is logged as its own failure before the
    /// conversational fallback.
    fn parse_action(&self, tenant_id: &str, completion: &str) -> Option<StructuredRequest> {
        let text = crate::services::llm::strip_markdown_fences(completion);
        let object = extract_json_object(text);
        let looks_like_action = text.contains("\"action\"");

        match object {
            Some(s) => match serde_json::from_str::<StructuredRequest>(s) {
                Ok(request) => Some(request),
                Err(e) if looks_like_action => {
                    tracing::warn!(
                        "LLM reply for tenant {} contained an action object that failed to parse: {}",
                        tenant_id,
                        e
                    );
                    None
                }
                Err(_) => None,
            },
            None if looks_like_action => {
                tracing::warn!(
                    "LLM reply for tenant {} mentioned an action but no JSON object could be extracted",
                    tenant_id
                );
                None
            }
            None => None,
        }
    }

    /// Step 5 plus the result cache and the audit write.
    async fn validate_and_execute(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
        request: &mut StructuredRequest,
        allowed: &std::collections::HashMap<String, Vec<String>>,
        start_time: Instant,
    ) -> Result<QueryResult, AppError> {
        let outcome = self
            .checked_execute(tenant_id, request, allowed)
            .await;

        let mut record = AuditRecord::new(tenant_id.to_string(), request.tool_name().to_string());
        record.user_id = user_id.map(String::from);
        record.target = Some(request.resource_name().to_string());
        record.params = truncate_params(&serde_json::to_value(&*request).unwrap_or(Value::Null));
        record.duration_ms = start_time.elapsed().as_millis() as u64;
        match &outcome {
            Ok(result) => {
                record.ok = true;
                record.row_count = Some(result.row_count);
            }
            Err(e) => {
                record.ok = false;
                record.error = Some(format!("{}: {}", e.category(), e));
            }
        }
        self.audit.record(record);

        outcome
    }

    async fn checked_execute(
        &self,
        tenant_id: &str,
        request: &mut StructuredRequest,
        allowed: &std::collections::HashMap<String, Vec<String>>,
    ) -> Result<QueryResult, AppError> {
        request.validate()?;

        let resource = request.resource_name().to_string();
        let allowed_columns = match allowed.get(&resource) {
            Some(columns) => columns.clone(),
            None if self.settings.auto_register_sheets
                && matches!(request, StructuredRequest::Sheet(_)) =>
            {
                tracing::info!(
                    "Auto-registering spreadsheet resource {} for tenant {}",
                    resource,
                    tenant_id
                );
                self.whitelist.add(tenant_id, &resource, Vec::new()).await?;
                Vec::new()
            }
            None => {
                return Err(AppError::AccessDenied(format!(
                    "Resource {:?} is not whitelisted for this tenant",
                    resource
                )));
            }
        };

        let kind = request.kind();
        let connection = self
            .storage
            .find_connection_by_kind(tenant_id, kind)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .ok_or_else(|| {
                AppError::Configuration(format!(
                    "No {} connection is configured for this tenant",
                    kind.as_str()
                ))
            })?;

        let request_json = serde_json::to_string(&*request).unwrap_or_default();
        let cache_key = TtlCache::key("result", &[tenant_id, &connection.id, &request_json]);
        if let Some(cached) = self.cache.get(&cache_key) {
            if let Ok(result) = serde_json::from_value::<QueryResult>(cached) {
                tracing::debug!("Result cache hit for tenant {} on {}", tenant_id, resource);
                return Ok(result);
            }
        }

        let result = self.executor.execute(&connection, &allowed_columns, request).await?;
        if result.row_count <= self.settings.max_cacheable_rows {
            if let Ok(value) = serde_json::to_value(&result) {
                self.cache.set(cache_key, value, Some(self.settings.result_ttl));
            }
        }
        Ok(result)
    }

    /// Step 6. A failed summary call degrades to a plain row-count sentence
    /// rather than failing the whole request.
    async fn summarize(
        &self,
        message: &str,
        request: &StructuredRequest,
        result: &QueryResult,
    ) -> String {
        let sample: Vec<&Value> = result.rows.iter().take(SUMMARY_ROWS).collect();
        let prompt = format!(
            "The user asked: {:?}\nA query against {:?} returned {} rows. \
             First rows:\n{}\n\nSummarize the result in one or two short \
             sentences. Do not repeat the raw data verbatim.",
            message,
            request.resource_name(),
            result.row_count,
            serde_json::to_string(&sample).unwrap_or_default()
        );
        match self.llm.complete(&[ChatMessage::user(prompt)]).await {
            Ok(summary) => summary.trim().to_string(),
            Err(e) => {
                tracing::warn!("Summary completion failed: {}", e);
                format!(
                    "Returned {} rows from {}.",
                    result.row_count,
                    request.resource_name()
                )
            }
        }
    }

    /// Persistence failures are logged, never surfaced; losing a history
    /// turn must not fail the request.
    async fn persist_turns(
        &self,
        tenant_id: &str,
        user_message: &str,
        answer: &str,
        metadata: Option<Value>,
    ) {
        let user_turn = ConversationTurn::new(
            tenant_id.to_string(),
            Role::User,
            user_message.to_string(),
            None,
        );
        let assistant_turn = ConversationTurn::new(
            tenant_id.to_string(),
            Role::Assistant,
            answer.to_string(),
            metadata,
        );
        for turn in [&user_turn, &assistant_turn] {
            if let Err(e) = self.storage.append_turn(turn).await {
                tracing::warn!("Failed to persist conversation turn: {}", e);
            }
        }
    }
}

/// Per-kind probe used to introspect a resource through a connection. None
/// when the resource cannot be addressed on that backend (a document store
/// without a database name in its URI, for instance).
fn probe_request(connection: &TenantConnection, resource: &str) -> Option<StructuredRequest> {
    match connection.kind {
        crate::models::BackendKind::SqlPg => Some(StructuredRequest::Sql(SqlRequest {
            dialect: SqlDialect::Postgres,
            table: resource.to_string(),
            columns: Vec::new(),
            filter: serde_json::Map::new(),
            order_by: None,
            limit: 3,
        })),
        crate::models::BackendKind::SqlMysql => Some(StructuredRequest::Sql(SqlRequest {
            dialect: SqlDialect::Mysql,
            table: resource.to_string(),
            columns: Vec::new(),
            filter: serde_json::Map::new(),
            order_by: None,
            limit: 3,
        })),
        crate::models::BackendKind::Document => {
            let db = mongo_default_db(&connection.uri)?;
            Some(StructuredRequest::Mongo(crate::models::DocumentRequest {
                db,
                collection: resource.to_string(),
                filter: serde_json::Map::new(),
                projection: None,
                sort: None,
                limit: 3,
            }))
        }
        crate::models::BackendKind::Spreadsheet => {
            Some(StructuredRequest::Sheet(SpreadsheetRequest {
                path: connection.uri.clone(),
                sheet: resource.to_string(),
                filter: serde_json::Map::new(),
                select: Vec::new(),
                limit: 3,
            }))
        }
    }
}

/// Default database from a mongodb:// URI path segment.
fn mongo_default_db(uri: &str) -> Option<String> {
    let parsed = url::Url::parse(uri).ok()?;
    let db = parsed.path().trim_start_matches('/');
    if db.is_empty() { None } else { Some(db.to_string()) }
}

/// First balanced JSON object in the text, tolerant of surrounding prose.
/// Braces inside string literals are ignored.
pub fn extract_json_object(text: &str) -> Option<&str> {
    extract_balanced(text, '{', '}')
}

/// First balanced JSON array in the text.
pub fn extract_json_array(text: &str) -> Option<&str> {
    extract_balanced(text, '[', ']')
}

fn extract_balanced(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Distinct phrasing per error category for chat mode.
fn friendly_error_answer(error: &AppError) -> String {
    match error {
        AppError::AccessDenied(msg) => format!(
            "I can't query that: {}. Ask your administrator to whitelist it if you need access.",
            msg
        ),
        AppError::NotFound(msg) => format!(
            "I couldn't find what the query referred to: {}. The resource may have been renamed or removed.",
            msg
        ),
        AppError::Timeout(_) => {
            "That query took too long and was cancelled. Try narrowing it down, for example with a filter or a smaller limit.".to_string()
        }
        AppError::Network(msg) => format!(
            "I couldn't reach the data source ({}). It may be temporarily unavailable; please try again shortly.",
            msg
        ),
        AppError::Validation(msg) => format!(
            "The generated query wasn't valid: {}. Try rephrasing your question.",
            msg
        ),
        AppError::Configuration(msg) => format!("This tenant isn't fully configured: {}.", msg),
        other => format!(
            "Something went wrong while running that query ({}). Please try again.",
            other
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BackendKind;
    use crate::services::runners::Introspection;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// LLM stub returning scripted replies in order.
    struct ScriptedLlm {
        replies: Mutex<VecDeque<String>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().map(String::from).collect()),
            })
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, AppError> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| AppError::LlmService("script exhausted".to_string()))
        }
    }

    /// Executor mock that records every execute call.
    struct MockExecutor {
        rows: Vec<Value>,
        executed: Mutex<Vec<StructuredRequest>>,
    }

    impl MockExecutor {
        fn new(rows: Vec<Value>) -> Arc<Self> {
            Arc::new(Self { rows, executed: Mutex::new(Vec::new()) })
        }

        fn execute_count(&self) -> usize {
            self.executed.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl QueryExecutor for MockExecutor {
        async fn execute(
            &self,
            _connection: &TenantConnection,
            _allowed_columns: &[String],
            request: &StructuredRequest,
        ) -> Result<QueryResult, AppError> {
            self.executed.lock().unwrap().push(request.clone());
            let limit = request.limit() as usize;
            let rows: Vec<Value> = self.rows.iter().take(limit).cloned().collect();
            Ok(QueryResult::new(rows, 1))
        }

        async fn introspect(
            &self,
            _connection: &TenantConnection,
            _request: &StructuredRequest,
        ) -> Result<Introspection, AppError> {
            Ok(Introspection {
                columns: vec!["id".to_string(), "status".to_string()],
                sample: vec![serde_json::json!({"id": 1, "status": "open"})],
            })
        }
    }

    async fn build_orchestrator(
        llm: Arc<ScriptedLlm>,
        executor: Arc<MockExecutor>,
        auto_register_sheets: bool,
    ) -> (AgentOrchestrator, Arc<SqliteStorage>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(
            SqliteStorage::new(dir.path().join("gateway.db")).await.unwrap(),
        );
        let whitelist = Arc::new(WhitelistRegistry::new(storage.clone()));
        let cache = Arc::new(TtlCache::new(100, Duration::from_secs(60)));
        let audit = Arc::new(AuditLog::new(storage.clone()));
        let orchestrator = AgentOrchestrator::new(
            llm,
            executor,
            whitelist,
            cache,
            storage.clone(),
            audit,
            OrchestratorSettings {
                auto_register_sheets,
                schema_ttl: Duration::from_secs(300),
                result_ttl: Duration::from_secs(90),
                max_cacheable_rows: 200,
            },
        );
        (orchestrator, storage, dir)
    }

    fn order_rows(n: usize) -> Vec<Value> {
        (0..n)
            .map(|i| serde_json::json!({"id": i, "status": "open"}))
            .collect()
    }

    #[tokio::test]
    async fn test_chat_executes_action_and_summarizes() {
        let llm = ScriptedLlm::new(vec![
            r#"{"action": "sql", "dialect": "postgres", "table": "orders", "limit": 5}"#,
            "You have 5 open orders.",
        ]);
        let executor = MockExecutor::new(order_rows(20));
        let (orchestrator, storage, _dir) = build_orchestrator(llm, executor.clone(), false).await;

        storage
            .save_connection(&TenantConnection::new(
                "acme".to_string(),
                BackendKind::SqlPg,
                "postgresql://u:p@localhost/db".to_string(),
            ))
            .await
            .unwrap();
        orchestrator
            .whitelist
            .add("acme", "orders", Vec::new())
            .await
            .unwrap();

        let response = orchestrator
            .handle_chat("acme", Some("u1"), "show me 5 orders")
            .await
            .unwrap();

        assert_eq!(response.tool.as_deref(), Some("sql"));
        assert_eq!(response.target.as_deref(), Some("orders"));
        assert_eq!(response.row_count, Some(5));
        assert_eq!(response.answer, "You have 5 open orders.");
        assert_eq!(executor.execute_count(), 1);
        let executed = executor.executed.lock().unwrap();
        assert_eq!(executed[0].limit(), 5);
    }

    #[tokio::test]
    async fn test_access_denied_never_reaches_executor() {
        let llm = ScriptedLlm::new(vec![
            r#"{"action": "sql", "dialect": "postgres", "table": "secrets"}"#,
        ]);
        let executor = MockExecutor::new(order_rows(3));
        let (orchestrator, storage, _dir) = build_orchestrator(llm, executor.clone(), false).await;

        storage
            .save_connection(&TenantConnection::new(
                "acme".to_string(),
                BackendKind::SqlPg,
                "postgresql://u:p@localhost/db".to_string(),
            ))
            .await
            .unwrap();
        orchestrator
            .whitelist
            .add("acme", "orders", Vec::new())
            .await
            .unwrap();

        let err = orchestrator
            .handle_query("acme", None, "dump the secrets table")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AccessDenied(_)));
        assert_eq!(executor.execute_count(), 0);
    }

    #[tokio::test]
    async fn test_chat_mode_converts_denial_to_answer() {
        let llm = ScriptedLlm::new(vec![
            r#"{"action": "sql", "dialect": "postgres", "table": "secrets"}"#,
        ]);
        let executor = MockExecutor::new(order_rows(3));
        let (orchestrator, _storage, _dir) = build_orchestrator(llm, executor.clone(), false).await;

        let response = orchestrator
            .handle_chat("acme", None, "dump the secrets table")
            .await
            .unwrap();
        assert!(response.tool.is_none());
        assert!(response.answer.contains("whitelist"));
        assert_eq!(executor.execute_count(), 0);
    }

    #[tokio::test]
    async fn test_plain_text_reply_is_conversational() {
        let llm = ScriptedLlm::new(vec!["Hello! Ask me about your data."]);
        let executor = MockExecutor::new(Vec::new());
        let (orchestrator, _storage, _dir) = build_orchestrator(llm, executor.clone(), false).await;

        let response = orchestrator
            .handle_chat("acme", None, "hi there")
            .await
            .unwrap();
        assert!(response.tool.is_none());
        assert_eq!(response.answer, "Hello! Ask me about your data.");
        assert_eq!(executor.execute_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_action_falls_back_to_text() {
        // Mentions "action" but the object is not valid JSON
        let llm = ScriptedLlm::new(vec![r#"I would run {"action": "sql", "table": }"#]);
        let executor = MockExecutor::new(Vec::new());
        let (orchestrator, _storage, _dir) = build_orchestrator(llm, executor.clone(), false).await;

        let response = orchestrator.handle_chat("acme", None, "orders?").await.unwrap();
        assert!(response.tool.is_none());
        assert_eq!(executor.execute_count(), 0);
    }

    #[tokio::test]
    async fn test_result_cache_skips_second_execution() {
        let llm = ScriptedLlm::new(vec![
            r#"{"action": "sql", "dialect": "postgres", "table": "orders", "limit": 5}"#,
            "Summary one.",
            r#"{"action": "sql", "dialect": "postgres", "table": "orders", "limit": 5}"#,
            "Summary two.",
        ]);
        let executor = MockExecutor::new(order_rows(5));
        let (orchestrator, storage, _dir) = build_orchestrator(llm, executor.clone(), false).await;

        storage
            .save_connection(&TenantConnection::new(
                "acme".to_string(),
                BackendKind::SqlPg,
                "postgresql://u:p@localhost/db".to_string(),
            ))
            .await
            .unwrap();
        orchestrator.whitelist.add("acme", "orders", Vec::new()).await.unwrap();

        orchestrator.handle_chat("acme", None, "show me 5 orders").await.unwrap();
        let second = orchestrator.handle_chat("acme", None, "show me 5 orders").await.unwrap();

        assert_eq!(second.row_count, Some(5));
        assert_eq!(executor.execute_count(), 1);
    }

    #[tokio::test]
    async fn test_auto_register_sheet_resource() {
        let llm = ScriptedLlm::new(vec![
            r#"{"action": "sheet", "path": "./budget.csv", "sheet": "expenses"}"#,
            "Your expenses sheet has 2 rows.",
        ]);
        let executor = MockExecutor::new(order_rows(2));
        let (orchestrator, storage, _dir) = build_orchestrator(llm, executor.clone(), true).await;

        storage
            .save_connection(&TenantConnection::new(
                "acme".to_string(),
                BackendKind::Spreadsheet,
                "./budget.csv".to_string(),
            ))
            .await
            .unwrap();

        let response = orchestrator
            .handle_chat("acme", None, "what's in my expenses sheet?")
            .await
            .unwrap();
        assert_eq!(response.tool.as_deref(), Some("sheet"));

        let allowed = orchestrator.whitelist.get_allowed("acme").await.unwrap();
        assert!(allowed.contains_key("expenses"));
    }

    #[test]
    fn test_extract_json_object_from_prose() {
        let text = "Sure, running this: {\"action\": \"sql\", \"where\": {\"status\": \"open\"}} now";
        let extracted = extract_json_object(text).unwrap();
        assert_eq!(extracted, "{\"action\": \"sql\", \"where\": {\"status\": \"open\"}}");
    }

    #[test]
    fn test_extract_json_object_ignores_braces_in_strings() {
        let text = r#"{"note": "a } inside", "x": 1}"#;
        assert_eq!(extract_json_object(text).unwrap(), text);
    }

    #[test]
    fn test_extract_json_array() {
        let reply = "Relevant: [\"orders\", \"invoices\"] only.";
        assert_eq!(extract_json_array(reply).unwrap(), "[\"orders\", \"invoices\"]");
    }

    #[test]
    fn test_mongo_default_db_from_uri() {
        assert_eq!(
            mongo_default_db("mongodb://localhost:27017/shop").as_deref(),
            Some("shop")
        );
        assert_eq!(mongo_default_db("mongodb://localhost:27017"), None);
    }
}
