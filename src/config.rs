use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub security: SecurityConfig,
    pub cache: CacheConfig,
    pub connections: ConnectionsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite record store (tenant connections, whitelist, audit).
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub gateway_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Requests admitted per tenant per window.
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
    /// Complexity scores above this are rejected; scores above half of it
    /// are logged but permitted.
    pub complexity_threshold: u32,
    pub request_timeout_secs: u64,
    /// When false, a query against an unregistered spreadsheet resource is
    /// denied like any other resource instead of being auto-whitelisted.
    pub auto_register_sheets: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub schema_ttl_secs: u64,
    pub result_ttl_secs: u64,
    /// Result sets larger than this are never cached.
    pub max_cacheable_rows: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionsConfig {
    pub health_interval_secs: u64,
    pub idle_interval_secs: u64,
    pub idle_threshold_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env before reading the environment
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("database.url", "./gateway.db")?
            .set_default("llm.gateway_url", "https://api.openai.com/v1")?
            .set_default("llm.model", "gpt-4o-mini")?
            .set_default("security.rate_limit_requests", 30)?
            .set_default("security.rate_limit_window_secs", 60)?
            .set_default("security.complexity_threshold", 10)?
            .set_default("security.request_timeout_secs", 30)?
            .set_default("security.auto_register_sheets", false)?
            .set_default("cache.max_entries", 500)?
            .set_default("cache.schema_ttl_secs", 300)?
            .set_default("cache.result_ttl_secs", 90)?
            .set_default("cache.max_cacheable_rows", 200)?
            .set_default("connections.health_interval_secs", 300)?
            .set_default("connections.idle_interval_secs", 600)?
            .set_default("connections.idle_threshold_secs", 1800)?;

        // Load from environment variables
        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port.parse::<u16>().unwrap_or(3000))?;
        }

        if let Ok(database_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", database_url)?;
        }

        if let Ok(gateway_url) = env::var("LLM_GATEWAY_URL") {
            builder = builder.set_override("llm.gateway_url", gateway_url)?;
        }

        if let Ok(api_key) = env::var("LLM_API_KEY") {
            builder = builder.set_override("llm.api_key", api_key)?;
        }

        if let Ok(model) = env::var("LLM_MODEL") {
            builder = builder.set_override("llm.model", model)?;
        }

        if let Ok(auto_register) = env::var("AUTO_REGISTER_SHEETS") {
            builder = builder.set_override(
                "security.auto_register_sheets",
                auto_register.parse::<bool>().unwrap_or(false),
            )?;
        }

        if let Ok(limit) = env::var("RATE_LIMIT_REQUESTS") {
            builder = builder.set_override(
                "security.rate_limit_requests",
                limit.parse::<u32>().unwrap_or(30),
            )?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.security.request_timeout_secs)
    }
}
