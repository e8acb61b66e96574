use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;

use crate::api::middleware::AppError;
use crate::config::LlmConfig;

/// One message in a completion request, OpenAI chat format.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

/// Completion service seam; the orchestrator only sees this trait so tests
/// can script responses.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, AppError>;
}

/// Reusable retry policy for external calls. Retries run sequentially; no
/// two retries of the same call are ever in flight at once.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff: base * 2^attempt, capped at max_delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        exp.min(self.max_delay)
    }

    /// Credential problems are never retryable; transient service and
    /// network failures are.
    pub fn is_retryable(&self, error: &AppError) -> bool {
        matches!(error, AppError::LlmService(_) | AppError::Network(_) | AppError::Timeout(_))
    }
}

/// HTTP client for an OpenAI-compatible completion gateway.
pub struct LlmService {
    gateway_url: String,
    api_key: Option<String>,
    model: String,
    http_client: HttpClient,
    retry: RetryPolicy,
}

impl LlmService {
    pub fn new(config: &LlmConfig) -> Self {
        if config.api_key.is_none() {
            tracing::error!(
                "LLM_API_KEY is not configured; natural-language queries will fail with a configuration error"
            );
        }
        Self {
            gateway_url: config.gateway_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            http_client: HttpClient::new(),
            retry: RetryPolicy::default(),
        }
    }

    async fn call_once(&self, messages: &[ChatMessage]) -> Result<String, AppError> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            AppError::Configuration(
                "LLM API key is not configured. Set LLM_API_KEY to enable natural-language queries.".to_string(),
            )
        })?;

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.gateway_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&json!({
                "model": self.model,
                "messages": messages,
                "temperature": 0.1,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(format!("LLM gateway timed out: {}", e))
                } else {
                    AppError::Network(format!("Failed to reach LLM gateway: {}", e))
                }
            })?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            // Bad credentials are fatal for the request, not retryable
            return Err(AppError::Configuration(format!(
                "LLM gateway rejected credentials (status {})",
                status
            )));
        }
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::LlmService(format!(
                "LLM gateway returned error {}: {}",
                status, error_text
            )));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::LlmService(format!("Failed to parse LLM response: {}", e)))?;

        let text = result["choices"][0]["message"]["content"]
            .as_str()
            .or_else(|| result["text"].as_str())
            .ok_or_else(|| {
                AppError::LlmService("LLM response does not contain completion text".to_string())
            })?;

        Ok(strip_markdown_fences(text).to_string())
    }
}

#[async_trait]
impl LlmClient for LlmService {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, AppError> {
        let mut attempt = 0;
        loop {
            match self.call_once(messages).await {
                Ok(text) => return Ok(text),
                Err(e) if attempt < self.retry.max_retries && self.retry.is_retryable(&e) => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        "LLM call failed (attempt {}/{}): {}. Retrying in {:?}",
                        attempt + 1,
                        self.retry.max_retries,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Strips ```json fences the model sometimes wraps structured output in.
pub fn strip_markdown_fences(text: &str) -> &str {
    text.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}
