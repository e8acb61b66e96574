pub mod admin;
pub mod chat;

use std::sync::Arc;

use crate::config::Config;
use crate::security::SecurityGate;
use crate::services::{AgentOrchestrator, ConnectionManager, TtlCache, WhitelistRegistry};
use crate::storage::SqliteStorage;

/// Shared per-process state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub storage: Arc<SqliteStorage>,
    pub orchestrator: Arc<AgentOrchestrator>,
    pub security: Arc<SecurityGate>,
    pub manager: Arc<ConnectionManager>,
    pub whitelist: Arc<WhitelistRegistry>,
    pub cache: Arc<TtlCache>,
}
