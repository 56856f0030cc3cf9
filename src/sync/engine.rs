//! Reconciliation flow: optimistic mutations, offline fallback, queue drain.
//!
//! Every mutation is applied to the in-memory list first. While online the
//! matching API call is raced against the request timeout; if it fails the
//! engine goes offline and records the change in the offline snapshot and the
//! pending queue instead. [`SyncEngine::sync_offline_data`] later pushes the
//! whole snapshot to the server and clears exactly the entries it read.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};

use crate::api::TodoApi;
use crate::config::SyncConfig;
use crate::error::{Error, RemoteError, Result, ValidationError};
use crate::offline::OfflineStorage;
use crate::todos::model::{
    Connectivity, OperationKind, SyncAction, SyncStatus, Todo, TodoPatch, next_local_id,
    validate_text,
};

/// Result of a call to [`SyncEngine::sync_offline_data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Offline; nothing was attempted.
    Skipped,
    /// Another drain holds the guard.
    AlreadyRunning,
    /// The pending queue was empty.
    Nothing,
    /// The snapshot was pushed and the drained entries removed.
    Synced { operations: usize, todos: usize },
}

/// Client-side state and the flows that mutate it.
pub struct SyncEngine {
    api: Arc<dyn TodoApi>,
    storage: Arc<OfflineStorage>,
    request_timeout: Duration,
    success_reset: Duration,
    error_reset: Duration,
    todos: RwLock<Vec<Todo>>,
    connectivity: watch::Sender<Connectivity>,
    sync_status: Arc<watch::Sender<SyncStatus>>,
    /// Bumped on every status change; a reset timer only fires if it still matches.
    status_generation: Arc<AtomicU64>,
    last_error: Mutex<Option<String>>,
    drain: tokio::sync::Mutex<()>,
}

impl SyncEngine {
    /// Starts online with an empty list. Call [`load_todos`](Self::load_todos) next.
    pub fn new(api: Arc<dyn TodoApi>, storage: Arc<OfflineStorage>, config: &SyncConfig) -> Self {
        let (connectivity, _) = watch::channel(Connectivity::Online);
        let (sync_status, _) = watch::channel(SyncStatus::Idle);
        Self {
            api,
            storage,
            request_timeout: config.request_timeout,
            success_reset: config.success_reset,
            error_reset: config.error_reset,
            todos: RwLock::new(Vec::new()),
            connectivity,
            sync_status: Arc::new(sync_status),
            status_generation: Arc::new(AtomicU64::new(0)),
            last_error: Mutex::new(None),
            drain: tokio::sync::Mutex::new(()),
        }
    }

    // ── State ───────────────────────────────────────────────────────

    pub async fn todos(&self) -> Vec<Todo> {
        self.todos.read().await.clone()
    }

    pub fn connectivity(&self) -> Connectivity {
        *self.connectivity.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.connectivity().is_online()
    }

    /// Set connectivity. Returns the previous value if it changed.
    pub fn set_connectivity(&self, next: Connectivity) -> Option<Connectivity> {
        let mut previous = None;
        self.connectivity.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            previous = Some(*current);
            *current = next;
            true
        });
        if previous.is_some() {
            info!(connectivity = ?next, "Connectivity changed");
        }
        previous
    }

    pub fn subscribe_connectivity(&self) -> watch::Receiver<Connectivity> {
        self.connectivity.subscribe()
    }

    pub fn sync_status(&self) -> SyncStatus {
        *self.sync_status.borrow()
    }

    pub fn subscribe_sync_status(&self) -> watch::Receiver<SyncStatus> {
        self.sync_status.subscribe()
    }

    /// Message of the most recent user-visible failure.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_last_error(&self, message: Option<String>) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = message;
    }

    // ── Loading ─────────────────────────────────────────────────────

    /// Fetch from the server when online, else fall back to the offline snapshot.
    pub async fn load_todos(&self) -> Vec<Todo> {
        self.set_last_error(None);

        if self.is_online() {
            match self.remote("get_todos", self.api.get_todos()).await {
                Ok(todos) => {
                    info!(count = todos.len(), "Loaded todos from server");
                    *self.todos.write().await = todos.clone();
                    self.persist_logged(&todos).await;
                    return todos;
                }
                Err(e) => {
                    warn!(error = %e, "Server load failed, falling back to offline snapshot");
                    self.set_connectivity(Connectivity::Offline);
                }
            }
        }

        let todos = self.storage.get_todos_offline().await;
        info!(count = todos.len(), "Loaded todos from offline snapshot");
        *self.todos.write().await = todos.clone();
        todos
    }

    // ── Mutations ───────────────────────────────────────────────────

    /// Create a todo. Returns the server's record, or the optimistic one if queued.
    pub async fn add_todo(&self, text: &str) -> Result<Todo> {
        self.set_last_error(None);
        let text = self.validated(validate_text(text))?;

        let now = Utc::now();
        let optimistic = {
            let mut todos = self.todos.write().await;
            let todo = Todo {
                id: next_local_id(&todos),
                text: text.clone(),
                completed: false,
                created_at: Some(now),
                updated_at: Some(now),
            };
            todos.push(todo.clone());
            todo
        };

        if self.is_online() {
            match self.remote("create_todo", self.api.create_todo(&text)).await {
                Ok(saved) => {
                    debug!(todo_id = saved.id, temp_id = optimistic.id, "Server accepted new todo");
                    let snapshot = self.replace_record(optimistic.id, saved.clone()).await;
                    self.persist_logged(&snapshot).await;
                    return Ok(saved);
                }
                Err(e) => self.fall_offline("create_todo", &e),
            }
        }

        if let Err(e) = self.record_offline(OperationKind::Create, &optimistic).await {
            let snapshot = {
                let mut todos = self.todos.write().await;
                todos.retain(|t| t.id != optimistic.id);
                todos.clone()
            };
            self.persist_logged(&snapshot).await;
            return Err(self.surface(e));
        }
        Ok(optimistic)
    }

    /// Flip completion of the todo with `id`.
    pub async fn toggle_todo(&self, id: i64) -> Result<Todo> {
        self.set_last_error(None);
        let completed = {
            let todos = self.todos.read().await;
            let todo = todos.iter().find(|t| t.id == id);
            let todo = self.validated(todo.ok_or(ValidationError::NotFound { id }))?;
            !todo.completed
        };
        self.update(id, TodoPatch::completed(completed)).await
    }

    /// Replace the text of the todo with `id`.
    pub async fn edit_todo(&self, id: i64, text: &str) -> Result<Todo> {
        self.set_last_error(None);
        let text = self.validated(validate_text(text))?;
        self.update(id, TodoPatch::text(text)).await
    }

    /// Remove the todo with `id`. Returns the removed record.
    pub async fn delete_todo(&self, id: i64) -> Result<Todo> {
        self.set_last_error(None);
        let (index, removed) = {
            let mut todos = self.todos.write().await;
            let index = todos.iter().position(|t| t.id == id);
            let index = self.validated(index.ok_or(ValidationError::NotFound { id }))?;
            (index, todos.remove(index))
        };

        if self.is_online() {
            match self.remote("delete_todo", self.api.delete_todo(id)).await {
                Ok(_) => {
                    debug!(todo_id = id, "Server deleted todo");
                    let snapshot = self.todos().await;
                    self.persist_logged(&snapshot).await;
                    return Ok(removed);
                }
                Err(e) => self.fall_offline("delete_todo", &e),
            }
        }

        if let Err(e) = self.record_offline(OperationKind::Delete, &removed).await {
            let snapshot = {
                let mut todos = self.todos.write().await;
                let index = index.min(todos.len());
                todos.insert(index, removed);
                todos.clone()
            };
            self.persist_logged(&snapshot).await;
            return Err(self.surface(e));
        }
        Ok(removed)
    }

    async fn update(&self, id: i64, patch: TodoPatch) -> Result<Todo> {
        let updated = {
            let mut todos = self.todos.write().await;
            let todo = todos.iter_mut().find(|t| t.id == id);
            let todo = self.validated(todo.ok_or(ValidationError::NotFound { id }))?;
            self.validated(todo.apply(&patch))?;
            todo.clone()
        };

        if self.is_online() {
            match self.remote("update_todo", self.api.update_todo(id, &patch)).await {
                Ok(saved) => {
                    debug!(todo_id = id, "Server accepted update");
                    let snapshot = self.replace_record(id, saved.clone()).await;
                    self.persist_logged(&snapshot).await;
                    return Ok(saved);
                }
                Err(e) => self.fall_offline("update_todo", &e),
            }
        }

        self.record_offline(OperationKind::Update, &updated)
            .await
            .map_err(|e| self.surface(e))?;
        Ok(updated)
    }

    // ── Drain ───────────────────────────────────────────────────────

    /// Push the offline snapshot to the server and clear the drained queue entries.
    pub async fn sync_offline_data(&self) -> Result<SyncOutcome> {
        if !self.is_online() {
            debug!("Offline, sync skipped");
            return Ok(SyncOutcome::Skipped);
        }
        let Ok(_guard) = self.drain.try_lock() else {
            debug!("Sync already running");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        self.set_status(SyncStatus::Syncing);
        match self.drain_queue().await {
            Ok(outcome) => {
                if let SyncOutcome::Synced { operations, todos } = outcome {
                    info!(operations, todos, "Offline changes synced");
                }
                self.set_status(SyncStatus::Success);
                self.schedule_reset(self.success_reset);
                Ok(outcome)
            }
            Err(e) => {
                warn!(error = %e, "Sync failed");
                self.set_last_error(Some(format!("Sync failed: {e}")));
                self.set_status(SyncStatus::Error);
                self.schedule_reset(self.error_reset);
                Err(e)
            }
        }
    }

    async fn drain_queue(&self) -> Result<SyncOutcome> {
        let queue = self.storage.get_sync_queue().await?;
        if queue.is_empty() {
            return Ok(SyncOutcome::Nothing);
        }

        let snapshot = self.storage.load_todos_offline().await?;
        let authoritative = self
            .remote("sync_todos", self.api.sync_todos(&snapshot))
            .await?;

        self.storage.save_todos_offline(&authoritative).await?;
        *self.todos.write().await = authoritative.clone();

        for operation in &queue {
            if let Err(e) = self.storage.clear_sync_task(operation.sequence_id).await {
                warn!(sequence_id = operation.sequence_id, error = %e, "Failed to clear synced operation");
            }
        }

        Ok(SyncOutcome::Synced {
            operations: queue.len(),
            todos: authoritative.len(),
        })
    }

    fn set_status(&self, status: SyncStatus) {
        let generation = &self.status_generation;
        self.sync_status.send_modify(|current| {
            generation.fetch_add(1, Ordering::SeqCst);
            *current = status;
        });
    }

    /// Return to idle after `after`, unless the status changed in the meantime.
    fn schedule_reset(&self, after: Duration) {
        let expected = self.status_generation.load(Ordering::SeqCst);
        let status = Arc::clone(&self.sync_status);
        let generation = Arc::clone(&self.status_generation);

        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            status.send_if_modified(|current| {
                if generation.load(Ordering::SeqCst) != expected {
                    return false;
                }
                generation.fetch_add(1, Ordering::SeqCst);
                *current = SyncStatus::Idle;
                true
            });
        });
    }

    // ── Helpers ─────────────────────────────────────────────────────

    /// Race an API call against the request timeout.
    async fn remote<T>(
        &self,
        operation: &str,
        call: impl Future<Output = std::result::Result<T, RemoteError>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::timeout(operation, self.request_timeout)),
        }
    }

    fn fall_offline(&self, operation: &str, error: &Error) {
        warn!(operation, error = %error, "Server call failed, switching to offline mode");
        self.set_connectivity(Connectivity::Offline);
    }

    /// Persist the current list and queue one pending operation.
    async fn record_offline(&self, kind: OperationKind, payload: &Todo) -> Result<()> {
        let snapshot = self.todos().await;
        self.storage.save_todos_offline(&snapshot).await?;
        let sequence_id = self
            .storage
            .add_sync_task(SyncAction::new(kind, payload.clone()))
            .await?;
        debug!(sequence_id, todo_id = payload.id, kind = %kind, "Queued offline change");
        Ok(())
    }

    /// Swap the record with `id` for `record`. Returns the resulting list.
    async fn replace_record(&self, id: i64, record: Todo) -> Vec<Todo> {
        let mut todos = self.todos.write().await;
        if let Some(slot) = todos.iter_mut().find(|t| t.id == id) {
            *slot = record;
        }
        todos.clone()
    }

    /// Persist a snapshot the server already holds. Failure is only logged.
    async fn persist_logged(&self, todos: &[Todo]) {
        if let Err(e) = self.storage.save_todos_offline(todos).await {
            warn!(error = %e, "Failed to persist offline snapshot");
        }
    }

    fn validated<T>(&self, result: std::result::Result<T, ValidationError>) -> Result<T> {
        result.map_err(|e| self.surface(e.into()))
    }

    fn surface(&self, error: Error) -> Error {
        self.set_last_error(Some(error.to_string()));
        error
    }
}
