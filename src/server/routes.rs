//! REST endpoints for the todo backend.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::todos::model::{ApiResponse, HealthReport, Todo, TodoPatch, validate_text};

/// In-memory todo list owned by the backend.
#[derive(Debug, Default)]
pub struct TodoBoard {
    inner: Mutex<Board>,
}

#[derive(Debug, Default)]
struct Board {
    todos: Vec<Todo>,
    last_id: i64,
}

impl Board {
    /// Millisecond clock, bumped past every id handed out so far.
    fn next_id(&mut self) -> i64 {
        let id = Utc::now().timestamp_millis().max(self.last_id.saturating_add(1));
        self.last_id = id;
        id
    }

    fn replace(&mut self, todos: Vec<Todo>) {
        let max_id = todos.iter().map(|t| t.id).max().unwrap_or(0);
        self.last_id = self.last_id.max(max_id);
        self.todos = todos;
    }
}

impl TodoBoard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A board with two starter todos.
    pub fn seeded() -> Arc<Self> {
        let mut board = Board::default();
        board.replace(vec![
            Todo {
                id: 1,
                text: "Learn Rust".into(),
                completed: false,
                created_at: None,
                updated_at: None,
            },
            Todo {
                id: 2,
                text: "Write code".into(),
                completed: true,
                created_at: None,
                updated_at: None,
            },
        ]);
        Arc::new(Self {
            inner: Mutex::new(board),
        })
    }

    pub async fn todos(&self) -> Vec<Todo> {
        self.inner.lock().await.todos.clone()
    }
}

/// Build the router with the `/api` REST routes.
pub fn todo_routes(board: Arc<TodoBoard>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/todos", get(list_todos).post(create_todo))
        .route("/api/todos/sync", post(sync_todos))
        .route("/api/todos/{id}", put(update_todo).delete(delete_todo))
        .layer(CorsLayer::permissive())
        .with_state(board)
}

type Reply<T> = (StatusCode, Json<ApiResponse<T>>);

fn failure<T>(status: StatusCode, message: &str) -> Reply<T> {
    (status, Json(ApiResponse::failure(message)))
}

fn parse_id<T>(raw: &str) -> Result<i64, Reply<T>> {
    raw.parse()
        .map_err(|_| failure(StatusCode::BAD_REQUEST, "Invalid todo id"))
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(HealthReport {
        success: true,
        message: "Server is running".into(),
        timestamp: Some(Utc::now()),
    })
}

// ── Todos ───────────────────────────────────────────────────────────────

async fn list_todos(State(board): State<Arc<TodoBoard>>) -> impl IntoResponse {
    let todos = board.todos().await;
    (StatusCode::OK, Json(ApiResponse::ok(todos, "Todos fetched")))
}

#[derive(Deserialize)]
struct CreateRequest {
    #[serde(default)]
    text: Option<String>,
}

async fn create_todo(
    State(board): State<Arc<TodoBoard>>,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Reply<Todo> {
    let text = body.ok().and_then(|Json(req)| req.text).unwrap_or_default();
    let text = match validate_text(&text) {
        Ok(text) => text,
        Err(e) => return failure(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    let mut inner = board.inner.lock().await;
    let todo = Todo {
        id: inner.next_id(),
        text,
        completed: false,
        created_at: Some(Utc::now()),
        updated_at: None,
    };
    inner.todos.push(todo.clone());
    info!(todo_id = todo.id, "Todo created");

    (StatusCode::CREATED, Json(ApiResponse::ok(todo, "Todo created")))
}

async fn update_todo(
    State(board): State<Arc<TodoBoard>>,
    Path(id): Path<String>,
    body: Result<Json<TodoPatch>, JsonRejection>,
) -> Reply<Todo> {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    let Ok(Json(patch)) = body else {
        return failure(StatusCode::BAD_REQUEST, "Invalid update payload");
    };

    let mut inner = board.inner.lock().await;
    let Some(todo) = inner.todos.iter_mut().find(|t| t.id == id) else {
        return failure(StatusCode::NOT_FOUND, "Todo not found");
    };
    if let Err(e) = todo.apply(&patch) {
        return failure(StatusCode::BAD_REQUEST, &e.to_string());
    }
    debug!(todo_id = id, "Todo updated");

    (StatusCode::OK, Json(ApiResponse::ok(todo.clone(), "Todo updated")))
}

async fn delete_todo(State(board): State<Arc<TodoBoard>>, Path(id): Path<String>) -> Reply<Todo> {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(reply) => return reply,
    };

    let mut inner = board.inner.lock().await;
    match inner.todos.iter().position(|t| t.id == id) {
        Some(index) => {
            let removed = inner.todos.remove(index);
            info!(todo_id = id, "Todo deleted");
            (StatusCode::OK, Json(ApiResponse::ok(removed, "Todo deleted")))
        }
        None => failure(StatusCode::NOT_FOUND, "Todo not found"),
    }
}

#[derive(Deserialize)]
struct SyncRequest {
    todos: Vec<Todo>,
}

/// Replace the whole list with the client's and stamp every record.
async fn sync_todos(
    State(board): State<Arc<TodoBoard>>,
    body: Result<Json<SyncRequest>, JsonRejection>,
) -> Reply<Vec<Todo>> {
    let Ok(Json(SyncRequest { todos })) = body else {
        return failure(StatusCode::BAD_REQUEST, "Invalid sync payload");
    };
    if todos.iter().any(|t| validate_text(&t.text).is_err()) {
        return failure(StatusCode::BAD_REQUEST, "Todo text must not be empty");
    }

    let now = Utc::now();
    let todos: Vec<Todo> = todos
        .into_iter()
        .map(|mut t| {
            t.updated_at = Some(now);
            t
        })
        .collect();

    let mut inner = board.inner.lock().await;
    inner.replace(todos.clone());
    info!(count = todos.len(), "Todos synced");

    (StatusCode::OK, Json(ApiResponse::ok(todos, "Todos synced")))
}
