use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use query_gateway::api::handlers::AppState;
use query_gateway::api::routes::create_router;
use query_gateway::config::Config;
use query_gateway::security::SecurityGate;
use query_gateway::services::{
    AgentOrchestrator, AuditLog, ConnectionManager, GatewayExecutor, LlmService,
    OrchestratorSettings, TtlCache, WhitelistRegistry,
};
use query_gateway::storage::SqliteStorage;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?);

    let storage = Arc::new(
        SqliteStorage::new(&config.database.url).await.map_err(|e| {
            error!("Failed to initialize database: {}", e);
            e
        })?,
    );

    let manager = Arc::new(ConnectionManager::new(&config.connections));
    manager.spawn_sweeps().await;

    let cache = Arc::new(TtlCache::new(
        config.cache.max_entries,
        Duration::from_secs(config.cache.result_ttl_secs),
    ));
    let whitelist = Arc::new(WhitelistRegistry::new(storage.clone()));
    let audit = Arc::new(AuditLog::new(storage.clone()));
    let llm = Arc::new(LlmService::new(&config.llm));
    let executor = Arc::new(GatewayExecutor::new(manager.clone()));
    let orchestrator = Arc::new(AgentOrchestrator::new(
        llm,
        executor,
        whitelist.clone(),
        cache.clone(),
        storage.clone(),
        audit,
        OrchestratorSettings::from_config(&config),
    ));
    let security = Arc::new(SecurityGate::new(&config.security));

    let state = AppState {
        config: config.clone(),
        storage,
        orchestrator,
        security,
        manager: manager.clone(),
        whitelist,
        cache,
    };
    let app = create_router(state);

    let addr: SocketAddr = config.server_address().parse()?;
    info!("Query gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(manager))
        .await?;

    Ok(())
}

async fn shutdown_signal(manager: Arc<ConnectionManager>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received; closing backend connections");
    manager.shutdown().await;
}
