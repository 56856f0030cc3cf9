//! In-process [`TodoApi`] double for engine and monitor tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::api::TodoApi;
use crate::error::RemoteError;
use crate::todos::model::{HealthReport, Todo, TodoPatch, next_local_id, validate_text};

#[derive(Default)]
pub struct StubApi {
    /// The server's list.
    pub server: Mutex<Vec<Todo>>,
    /// Every call hangs forever, so callers hit their timeout.
    pub hang: AtomicBool,
    /// Every call fails with a network error.
    pub down: AtomicBool,
    /// Fail only the bulk sync.
    pub fail_sync: AtomicBool,
    /// Response override for the bulk sync.
    pub sync_reply: Mutex<Option<Vec<Todo>>>,
    /// Delay applied to the bulk sync.
    pub sync_delay: Mutex<Duration>,
    pub calls: AtomicUsize,
    pub health_calls: AtomicUsize,
}

impl StubApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hanging() -> Self {
        let api = Self::default();
        api.hang.store(true, Ordering::SeqCst);
        api
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn set_hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    pub fn reply_to_sync_with(&self, todos: Vec<Todo>) {
        *self.sync_reply.lock().unwrap_or_else(PoisonError::into_inner) = Some(todos);
    }

    pub fn delay_sync(&self, delay: Duration) {
        *self.sync_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub fn server_todos(&self) -> Vec<Todo> {
        self.server.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("connection refused".into()));
        }
        Ok(())
    }

    fn not_found(id: i64) -> RemoteError {
        RemoteError::Http {
            status: 404,
            message: format!("Todo {id} not found"),
        }
    }
}

#[async_trait]
impl TodoApi for StubApi {
    async fn get_todos(&self) -> Result<Vec<Todo>, RemoteError> {
        self.enter().await?;
        Ok(self.server_todos())
    }

    async fn create_todo(&self, text: &str) -> Result<Todo, RemoteError> {
        self.enter().await?;
        let text = validate_text(text).map_err(|e| RemoteError::Http {
            status: 400,
            message: e.to_string(),
        })?;
        let mut server = self.server.lock().unwrap_or_else(PoisonError::into_inner);
        let todo = Todo {
            id: next_local_id(&server),
            text,
            completed: false,
            created_at: Some(Utc::now()),
            updated_at: None,
        };
        server.push(todo.clone());
        Ok(todo)
    }

    async fn update_todo(&self, id: i64, patch: &TodoPatch) -> Result<Todo, RemoteError> {
        self.enter().await?;
        let mut server = self.server.lock().unwrap_or_else(PoisonError::into_inner);
        let todo = server
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| Self::not_found(id))?;
        todo.apply(patch).map_err(|e| RemoteError::Http {
            status: 400,
            message: e.to_string(),
        })?;
        Ok(todo.clone())
    }

    async fn delete_todo(&self, id: i64) -> Result<Todo, RemoteError> {
        self.enter().await?;
        let mut server = self.server.lock().unwrap_or_else(PoisonError::into_inner);
        let index = server
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| Self::not_found(id))?;
        Ok(server.remove(index))
    }

    async fn sync_todos(&self, todos: &[Todo]) -> Result<Vec<Todo>, RemoteError> {
        self.enter().await?;
        let delay = *self.sync_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_sync.load(Ordering::SeqCst) {
            return Err(RemoteError::Http {
                status: 500,
                message: "Sync failed on server".into(),
            });
        }
        let reply = self
            .sync_reply
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| todos.to_vec());
        *self.server.lock().unwrap_or_else(PoisonError::into_inner) = reply.clone();
        Ok(reply)
    }

    async fn health_check(&self) -> Result<HealthReport, RemoteError> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        Ok(HealthReport {
            success: true,
            message: "ok".into(),
            timestamp: Some(Utc::now()),
        })
    }
}
