//! Integration tests for the offline-first client against a live backend.
//!
//! Each test spins up the Axum backend on a random port and drives the real
//! HTTP client, store worker, façade and sync engine against it.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::time::timeout;

use todo_sync::api::{HttpTodoApi, TodoApi};
use todo_sync::config::SyncConfig;
use todo_sync::network::{LinkState, NetworkLink};
use todo_sync::offline::OfflineStorage;
use todo_sync::server::{TodoBoard, todo_routes};
use todo_sync::store::{LibSqlStore, LocalStore};
use todo_sync::sync::{HealthMonitor, SyncEngine, SyncOutcome};
use todo_sync::todos::{Connectivity, OperationKind, TodoPatch};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Start the backend on a random port, return (base url, board).
async fn start_server(board: Arc<TodoBoard>) -> String {
    let app = todo_routes(board);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    format!("http://127.0.0.1:{port}/api")
}

/// A base url nothing listens on.
fn dead_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}/api")
}

fn config(api_base_url: String) -> SyncConfig {
    SyncConfig {
        api_base_url,
        request_timeout: Duration::from_millis(500),
        health_timeout: Duration::from_millis(500),
        health_interval: Duration::from_secs(3600),
        ..SyncConfig::default()
    }
}

struct Client {
    engine: Arc<SyncEngine>,
    storage: Arc<OfflineStorage>,
    link: NetworkLink,
    monitor: Arc<HealthMonitor>,
}

fn client(store: Arc<dyn LocalStore>, config: &SyncConfig) -> Client {
    let link = NetworkLink::default();
    let storage = Arc::new(OfflineStorage::new(store, link.clone(), config.store_timeout));
    let api: Arc<dyn TodoApi> = Arc::new(HttpTodoApi::new(config.api_base_url.clone()));
    let engine = Arc::new(SyncEngine::new(Arc::clone(&api), Arc::clone(&storage), config));
    let monitor = Arc::new(HealthMonitor::new(
        api,
        Arc::clone(&engine),
        Arc::clone(&storage),
        link.clone(),
        config,
    ));
    Client {
        engine,
        storage,
        link,
        monitor,
    }
}

// ── HTTP client ──────────────────────────────────────────────────────

#[tokio::test]
async fn http_client_round_trip() {
    timeout(TEST_TIMEOUT, async {
        let url = start_server(TodoBoard::seeded()).await;
        let api = HttpTodoApi::new(url);

        let health = api.health_check().await.unwrap();
        assert!(health.success);

        assert_eq!(api.get_todos().await.unwrap().len(), 2);

        let created = api.create_todo("  buy milk ").await.unwrap();
        assert_eq!(created.text, "buy milk");

        let updated = api
            .update_todo(created.id, &TodoPatch::completed(true))
            .await
            .unwrap();
        assert!(updated.completed);

        let removed = api.delete_todo(created.id).await.unwrap();
        assert_eq!(removed.id, created.id);

        let err = api.delete_todo(created.id).await.unwrap_err();
        assert_eq!(err.to_string(), "Todo not found (HTTP 404)");

        let err = api.create_todo("   ").await.unwrap_err();
        assert!(err.to_string().contains("HTTP 400"));
    })
    .await
    .expect("test timed out");
}

// ── Online path ──────────────────────────────────────────────────────

#[tokio::test]
async fn online_mutations_reach_server_and_snapshot() {
    timeout(TEST_TIMEOUT, async {
        let board = TodoBoard::seeded();
        let url = start_server(Arc::clone(&board)).await;
        let c = client(Arc::new(LibSqlStore::in_memory()), &config(url));

        assert_eq!(c.engine.load_todos().await.len(), 2);

        let todo = c.engine.add_todo("write docs").await.unwrap();
        c.engine.toggle_todo(todo.id).await.unwrap();
        c.engine.delete_todo(1).await.unwrap();

        let server = board.todos().await;
        assert_eq!(server.len(), 2);
        assert!(server.iter().any(|t| t.id == todo.id && t.completed));

        let snapshot = c.storage.get_todos_offline().await;
        assert_eq!(snapshot.len(), 2);
        assert!(c.storage.get_sync_queue().await.unwrap().is_empty());
        assert!(c.engine.is_online());
    })
    .await
    .expect("test timed out");
}

// ── Offline path and recovery ────────────────────────────────────────

#[tokio::test]
async fn offline_changes_drain_after_reconnect() {
    timeout(TEST_TIMEOUT, async {
        let board = TodoBoard::new();
        let url = start_server(Arc::clone(&board)).await;
        let c = client(Arc::new(LibSqlStore::in_memory()), &config(url));

        c.link.set(LinkState::Down);
        c.monitor.handle_link(LinkState::Down).await;
        assert_eq!(c.engine.connectivity(), Connectivity::Offline);

        c.engine.add_todo("buy milk").await.unwrap();
        c.engine.add_todo("walk dog").await.unwrap();
        let queue = c.storage.get_sync_queue().await.unwrap();
        assert_eq!(queue.len(), 2);
        assert!(queue.iter().all(|op| op.kind == OperationKind::Create));
        assert!(board.todos().await.is_empty());

        assert_eq!(
            c.engine.sync_offline_data().await.unwrap(),
            SyncOutcome::Skipped
        );

        c.link.set(LinkState::Up);
        c.monitor.handle_link(LinkState::Up).await;

        assert!(c.engine.is_online());
        assert!(c.storage.get_sync_queue().await.unwrap().is_empty());
        let server = board.todos().await;
        assert_eq!(server.len(), 2);
        assert!(server.iter().all(|t| t.updated_at.is_some()));
        assert_eq!(c.storage.get_todos_offline().await.len(), 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unreachable_backend_queues_and_survives_restart() {
    timeout(TEST_TIMEOUT, async {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("offline.db");
        let config = config(dead_url());

        {
            let c = client(Arc::new(LibSqlStore::open_local(&db_path)), &config);
            let todo = c.engine.add_todo("survive restart").await.unwrap();
            assert_eq!(c.engine.connectivity(), Connectivity::Offline);
            c.engine.edit_todo(todo.id, "survived restart").await.unwrap();
        }

        // A fresh client over the same file sees the snapshot and the queue.
        let c = client(Arc::new(LibSqlStore::open_local(&db_path)), &config);
        let loaded = c.engine.load_todos().await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].text, "survived restart");

        let queue = c.storage.get_sync_queue().await.unwrap();
        assert_eq!(
            queue.iter().map(|op| op.kind).collect::<Vec<_>>(),
            vec![OperationKind::Create, OperationKind::Update]
        );
        assert!(queue[0].sequence_id < queue[1].sequence_id);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn monitor_goes_online_when_backend_answers() {
    timeout(TEST_TIMEOUT, async {
        let url = start_server(TodoBoard::new()).await;
        let c = client(Arc::new(LibSqlStore::in_memory()), &config(url));
        c.engine.set_connectivity(Connectivity::Offline);

        let task = Arc::clone(&c.monitor).spawn();
        let mut rx = c.engine.subscribe_connectivity();
        while !rx.borrow_and_update().is_online() {
            rx.changed().await.unwrap();
        }
        task.abort();
    })
    .await
    .expect("test timed out");
}
