//! Offline storage façade: request/response API over the store worker.
//!
//! Every call is tagged with a fresh correlation id and waits for the reply
//! carrying the same id. Replies are routed by id, never by arrival order, so
//! concurrent calls may complete in any order. A call that sees no reply
//! within the bound fails with a timeout; its waiter is removed either way.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{OnceCell, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, RemoteError, Result};
use crate::network::NetworkLink;
use crate::store::LocalStore;
use crate::todos::model::{PendingOperation, SyncAction, Todo};
use crate::worker::{
    Envelope, Inbound, StoreWorker, WorkerControl, WorkerNotification, WorkerOptions,
    WorkerPhase, WorkerReply, WorkerRequest,
};

type PendingTable = Arc<Mutex<HashMap<String, oneshot::Sender<WorkerReply>>>>;

fn lock(table: &PendingTable) -> MutexGuard<'_, HashMap<String, oneshot::Sender<WorkerReply>>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Live link to a started worker.
struct Connection {
    inbox: mpsc::UnboundedSender<Inbound>,
    notifications: broadcast::Sender<WorkerNotification>,
    _worker: JoinHandle<()>,
    _dispatcher: JoinHandle<()>,
}

/// Removes a waiter from the pending table when the call ends, however it ends.
struct PendingGuard<'a> {
    table: &'a PendingTable,
    message_id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.table).remove(&self.message_id);
    }
}

/// Client-side handle to the offline store.
pub struct OfflineStorage {
    store: Arc<dyn LocalStore>,
    link: NetworkLink,
    options: WorkerOptions,
    timeout: Duration,
    pending: PendingTable,
    connection: OnceCell<Connection>,
}

impl OfflineStorage {
    /// Create a façade. The worker is not started until the first call.
    pub fn new(store: Arc<dyn LocalStore>, link: NetworkLink, timeout: Duration) -> Self {
        Self {
            store,
            link,
            options: WorkerOptions::default(),
            timeout,
            pending: Arc::new(Mutex::new(HashMap::new())),
            connection: OnceCell::new(),
        }
    }

    /// Builder: start the worker in the waiting phase.
    pub fn with_worker_options(mut self, options: WorkerOptions) -> Self {
        self.options = options;
        self
    }

    /// Whether the worker has been started.
    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }

    /// Number of calls still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        lock(&self.pending).len()
    }

    // ── Operations ──────────────────────────────────────────────────

    /// Replace the offline snapshot.
    pub async fn save_todos_offline(&self, todos: &[Todo]) -> Result<()> {
        match self
            .request(WorkerRequest::SaveTodosOffline {
                todos: todos.to_vec(),
            })
            .await?
        {
            WorkerReply::TodosSavedOffline { .. } => Ok(()),
            other => Err(unexpected("TODOS_SAVED_OFFLINE", &other)),
        }
    }

    /// Read the offline snapshot, failing if the worker cannot answer.
    pub async fn load_todos_offline(&self) -> Result<Vec<Todo>> {
        match self.request(WorkerRequest::GetTodosOffline).await? {
            WorkerReply::TodosLoadedOffline { todos, .. } => Ok(todos),
            other => Err(unexpected("TODOS_LOADED_OFFLINE", &other)),
        }
    }

    /// Read the offline snapshot. Any failure yields an empty list.
    pub async fn get_todos_offline(&self) -> Vec<Todo> {
        match self.load_todos_offline().await {
            Ok(todos) => todos,
            Err(e) => {
                warn!(error = %e, "Failed to load offline todos");
                Vec::new()
            }
        }
    }

    /// Queue a pending operation. Returns its sequence id.
    pub async fn add_sync_task(&self, action: SyncAction) -> Result<i64> {
        match self.request(WorkerRequest::AddSyncTask { action }).await? {
            WorkerReply::SyncTaskAdded { id: Some(id), .. } => Ok(id),
            other => Err(unexpected("SYNC_TASK_ADDED", &other)),
        }
    }

    /// All pending operations in enqueue order.
    pub async fn get_sync_queue(&self) -> Result<Vec<PendingOperation>> {
        match self.request(WorkerRequest::GetSyncQueue).await? {
            WorkerReply::SyncQueueLoaded { queue, .. } => Ok(queue),
            other => Err(unexpected("SYNC_QUEUE_LOADED", &other)),
        }
    }

    /// Remove one pending operation by sequence id.
    pub async fn clear_sync_task(&self, id: i64) -> Result<()> {
        match self.request(WorkerRequest::ClearSyncTask { id }).await? {
            WorkerReply::SyncTaskCleared { .. } => Ok(()),
            other => Err(unexpected("SYNC_TASK_CLEARED", &other)),
        }
    }

    /// Ask the worker for the link state, falling back to the local signal.
    pub async fn check_network_status(&self) -> bool {
        match self.request(WorkerRequest::CheckNetworkStatus).await {
            Ok(WorkerReply::NetworkStatus { is_online }) => is_online,
            Ok(other) => {
                warn!(reply = ?other, "Unexpected reply to CHECK_NETWORK_STATUS");
                self.link.state().is_up()
            }
            Err(e) => {
                debug!(error = %e, "Network status check failed, using link state");
                self.link.state().is_up()
            }
        }
    }

    /// Subscribe to the worker's network notifications, starting it if needed.
    pub async fn subscribe_notifications(&self) -> broadcast::Receiver<WorkerNotification> {
        self.connect().await.notifications.subscribe()
    }

    // ── Plumbing ────────────────────────────────────────────────────

    /// Start the worker on first use. Concurrent callers share one start.
    async fn connect(&self) -> &Connection {
        self.connection
            .get_or_init(|| async {
                let handle = StoreWorker::spawn(
                    Arc::clone(&self.store),
                    self.link.clone(),
                    self.options,
                );

                if *handle.phase.borrow() == WorkerPhase::Installed {
                    info!("Store worker waiting, telling it to take control");
                    // A failed send surfaces as WorkerGone on the first request
                    let _ = handle
                        .inbox
                        .send(Inbound::Control(WorkerControl::SkipWaiting));
                }

                let dispatcher = tokio::spawn(route_replies(handle.replies, Arc::clone(&self.pending)));

                Connection {
                    inbox: handle.inbox,
                    notifications: handle.notifications,
                    _worker: handle.task,
                    _dispatcher: dispatcher,
                }
            })
            .await
    }

    async fn request(&self, request: WorkerRequest) -> Result<WorkerReply> {
        let connection = self.connect().await;
        let kind = request.kind();
        let message_id = Uuid::new_v4().to_string();

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(message_id.clone(), tx);
        let _guard = PendingGuard {
            table: &self.pending,
            message_id: message_id.clone(),
        };

        connection
            .inbox
            .send(Inbound::Request(Envelope::new(message_id.clone(), request)))
            .map_err(|_| RemoteError::WorkerGone)?;
        debug!(message_id = %message_id, request = kind, "Store request sent");

        let reply = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(RemoteError::WorkerGone.into()),
            Err(_) => {
                warn!(message_id = %message_id, request = kind, "Store request timed out");
                return Err(Error::timeout(kind, self.timeout));
            }
        };

        if let Some(error) = reply.error() {
            return Err(RemoteError::Store(error.to_string()).into());
        }
        Ok(reply)
    }
}

/// Route each reply to the waiter registered under its id.
async fn route_replies(
    mut replies: mpsc::UnboundedReceiver<Envelope<WorkerReply>>,
    pending: PendingTable,
) {
    while let Some(Envelope { message_id, body }) = replies.recv().await {
        let waiter = lock(&pending).remove(&message_id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(body);
            }
            None => debug!(message_id = %message_id, "Reply for unknown or expired request dropped"),
        }
    }
    debug!("Reply channel closed");
}

fn unexpected(expected: &str, got: &WorkerReply) -> Error {
    RemoteError::InvalidResponse(format!("expected {expected}, got {got:?}")).into()
}
