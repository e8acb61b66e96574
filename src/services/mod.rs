pub mod audit;
pub mod cache;
pub mod executor;
pub mod llm;
pub mod manager;
pub mod orchestrator;
pub mod runners;
pub mod whitelist;

pub use audit::AuditLog;
pub use cache::{CacheStats, TtlCache};
pub use executor::{GatewayExecutor, QueryExecutor};
pub use llm::{LlmClient, LlmService, RetryPolicy};
pub use manager::ConnectionManager;
pub use orchestrator::{AgentOrchestrator, OrchestratorSettings};
pub use whitelist::WhitelistRegistry;
