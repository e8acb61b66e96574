use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "assistant" => Role::Assistant,
            "system" => Role::System,
            _ => Role::User,
        }
    }
}

/// One persisted turn of a tenant's conversation. Metadata may embed a prior
/// result's row count for continuity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: String,
    pub tenant_id: String,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(tenant_id: String, role: Role, content: String, metadata: Option<Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id,
            role,
            content,
            metadata,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Response for both chat and single-shot query mode.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    /// None when the LLM answered conversationally without executing anything.
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Value>>,
    pub answer: String,
    pub duration_ms: u64,
}

impl ChatResponse {
    pub fn conversational(answer: String, duration_ms: u64) -> Self {
        Self {
            tool: None,
            target: None,
            row_count: None,
            data: None,
            answer,
            duration_ms,
        }
    }
}
