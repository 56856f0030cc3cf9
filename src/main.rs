use std::sync::Arc;

use anyhow::Context;

use todo_sync::api::{HttpTodoApi, TodoApi};
use todo_sync::cli;
use todo_sync::config::{ServerConfig, SyncConfig};
use todo_sync::network::NetworkLink;
use todo_sync::offline::OfflineStorage;
use todo_sync::server;
use todo_sync::store::{LibSqlStore, LocalStore};
use todo_sync::sync::{HealthMonitor, SyncEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    match std::env::args().nth(1).as_deref() {
        Some("serve") => run_server().await,
        None | Some("client") => run_client().await,
        Some(other) => {
            eprintln!("Unknown mode: {other}");
            eprintln!("Usage: todo-sync [serve|client]");
            std::process::exit(2);
        }
    }
}

async fn run_server() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    eprintln!("📝 todo-sync backend v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/api/todos", config.port);
    eprintln!("   Health: http://0.0.0.0:{}/api/health", config.port);

    server::serve(&config)
        .await
        .with_context(|| format!("backend failed on port {}", config.port))
}

async fn run_client() -> anyhow::Result<()> {
    let config = SyncConfig::from_env();

    eprintln!("📝 todo-sync v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Backend: {}", config.api_base_url);
    eprintln!("   Offline store: {}", config.db_path.display());
    eprintln!("   Type `help` for commands, `quit` to exit.\n");

    // ── Offline store ───────────────────────────────────────────────────
    // Opened lazily by the worker on first request.
    let store: Arc<dyn LocalStore> = Arc::new(LibSqlStore::open_local(&config.db_path));
    let link = NetworkLink::default();
    let storage = Arc::new(OfflineStorage::new(
        store,
        link.clone(),
        config.store_timeout,
    ));

    // ── Engine + monitor ────────────────────────────────────────────────
    let api: Arc<dyn TodoApi> = Arc::new(HttpTodoApi::new(config.api_base_url.clone()));
    let engine = Arc::new(SyncEngine::new(
        Arc::clone(&api),
        Arc::clone(&storage),
        &config,
    ));

    let loaded = engine.load_todos().await;
    tracing::info!(count = loaded.len(), online = engine.is_online(), "Client ready");

    let monitor = Arc::new(HealthMonitor::new(
        api,
        Arc::clone(&engine),
        Arc::clone(&storage),
        link.clone(),
        &config,
    ));
    let monitor_handle = monitor.spawn();

    cli::run(engine, storage, link)
        .await
        .context("reading commands from stdin")?;

    monitor_handle.abort();
    Ok(())
}
