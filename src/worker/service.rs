//! Store worker: the background context that owns the local store.
//!
//! The worker shares no state with its callers. It reads [`Inbound`] messages
//! from its inbox, handles each request on its own task (so replies may come
//! back out of order), and pushes tagged replies onto the reply channel.
//! Link transitions are re-broadcast as [`WorkerNotification`]s.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::protocol::{
    Envelope, Inbound, WorkerControl, WorkerNotification, WorkerReply, WorkerRequest,
};
use crate::network::{LinkState, NetworkLink};
use crate::store::LocalStore;

/// Notification broadcast capacity.
const NOTIFICATION_CAPACITY: usize = 64;

/// Lifecycle phase of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    /// Started but waiting to take control. Requests are buffered.
    Installed,
    /// Serving requests.
    Activated,
}

/// Startup options.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerOptions {
    /// Start in [`WorkerPhase::Installed`] until a `SKIP_WAITING` arrives.
    pub wait_for_activation: bool,
}

/// Everything a client needs to talk to a running worker.
pub struct WorkerHandle {
    pub inbox: mpsc::UnboundedSender<Inbound>,
    pub replies: mpsc::UnboundedReceiver<Envelope<WorkerReply>>,
    pub notifications: broadcast::Sender<WorkerNotification>,
    pub phase: watch::Receiver<WorkerPhase>,
    pub task: JoinHandle<()>,
}

/// The background store context.
pub struct StoreWorker {
    store: Arc<dyn LocalStore>,
    link: NetworkLink,
    replies: mpsc::UnboundedSender<Envelope<WorkerReply>>,
    notifications: broadcast::Sender<WorkerNotification>,
    phase: watch::Sender<WorkerPhase>,
}

impl StoreWorker {
    /// Spawn a worker on the current runtime.
    pub fn spawn(
        store: Arc<dyn LocalStore>,
        link: NetworkLink,
        options: WorkerOptions,
    ) -> WorkerHandle {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let (notify_tx, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let initial = if options.wait_for_activation {
            WorkerPhase::Installed
        } else {
            WorkerPhase::Activated
        };
        let (phase_tx, phase_rx) = watch::channel(initial);

        let mut link_rx = link.subscribe();
        link_rx.borrow_and_update();

        let worker = Self {
            store,
            link,
            replies: reply_tx,
            notifications: notify_tx.clone(),
            phase: phase_tx,
        };
        let task = tokio::spawn(worker.run(inbox_rx, link_rx));

        info!(phase = ?initial, "Store worker started");
        WorkerHandle {
            inbox: inbox_tx,
            replies: reply_rx,
            notifications: notify_tx,
            phase: phase_rx,
            task,
        }
    }

    async fn run(
        self,
        mut inbox: mpsc::UnboundedReceiver<Inbound>,
        mut link_rx: watch::Receiver<LinkState>,
    ) {
        let mut waiting: VecDeque<Envelope<WorkerRequest>> = VecDeque::new();

        loop {
            tokio::select! {
                msg = inbox.recv() => {
                    match msg {
                        Some(Inbound::Control(WorkerControl::SkipWaiting)) => {
                            if *self.phase.borrow() == WorkerPhase::Installed {
                                self.phase.send_replace(WorkerPhase::Activated);
                                info!(buffered = waiting.len(), "Store worker activated");
                                while let Some(envelope) = waiting.pop_front() {
                                    self.dispatch(envelope);
                                }
                            }
                        }
                        Some(Inbound::Request(envelope)) => {
                            if *self.phase.borrow() == WorkerPhase::Activated {
                                self.dispatch(envelope);
                            } else {
                                debug!(message_id = %envelope.message_id, "Worker waiting, request buffered");
                                waiting.push_back(envelope);
                            }
                        }
                        None => {
                            debug!("Store worker inbox closed");
                            break;
                        }
                    }
                }

                Ok(()) = link_rx.changed() => {
                    let state = *link_rx.borrow_and_update();
                    let notification = match state {
                        LinkState::Up => WorkerNotification::NetworkOnline,
                        LinkState::Down => WorkerNotification::NetworkOffline,
                    };
                    // Ok if nobody is subscribed yet
                    let _ = self.notifications.send(notification);
                }
            }
        }

        info!("Store worker stopped");
    }

    /// Handle one request on its own task and send the tagged reply.
    fn dispatch(&self, envelope: Envelope<WorkerRequest>) {
        let store = Arc::clone(&self.store);
        let link = self.link.clone();
        let replies = self.replies.clone();

        tokio::spawn(async move {
            let Envelope { message_id, body } = envelope;
            let kind = body.kind();
            let reply = handle_request(store.as_ref(), &link, body).await;
            if let Some(error) = reply.error() {
                warn!(message_id = %message_id, request = kind, error, "Store request failed");
            } else {
                debug!(message_id = %message_id, request = kind, "Store request handled");
            }
            if replies.send(Envelope::new(message_id, reply)).is_err() {
                debug!(request = kind, "Reply dropped, client gone");
            }
        });
    }
}

/// Execute a single request against the store.
pub async fn handle_request(
    store: &dyn LocalStore,
    link: &NetworkLink,
    request: WorkerRequest,
) -> WorkerReply {
    match request {
        WorkerRequest::SaveTodosOffline { todos } => match store.replace_snapshot(&todos).await {
            Ok(()) => WorkerReply::TodosSavedOffline {
                success: true,
                error: None,
            },
            Err(e) => WorkerReply::TodosSavedOffline {
                success: false,
                error: Some(e.to_string()),
            },
        },
        WorkerRequest::GetTodosOffline => WorkerReply::TodosLoadedOffline {
            todos: store.read_snapshot().await,
            error: None,
        },
        WorkerRequest::AddSyncTask { action } => match store.enqueue_pending(&action).await {
            Ok(id) => WorkerReply::SyncTaskAdded {
                success: true,
                id: Some(id),
                error: None,
            },
            Err(e) => WorkerReply::SyncTaskAdded {
                success: false,
                id: None,
                error: Some(e.to_string()),
            },
        },
        WorkerRequest::GetSyncQueue => match store.read_pending_queue().await {
            Ok(queue) => WorkerReply::SyncQueueLoaded { queue, error: None },
            Err(e) => WorkerReply::SyncQueueLoaded {
                queue: Vec::new(),
                error: Some(e.to_string()),
            },
        },
        WorkerRequest::ClearSyncTask { id } => match store.remove_pending(id).await {
            Ok(()) => WorkerReply::SyncTaskCleared {
                success: true,
                error: None,
            },
            Err(e) => WorkerReply::SyncTaskCleared {
                success: false,
                error: Some(e.to_string()),
            },
        },
        WorkerRequest::CheckNetworkStatus => WorkerReply::NetworkStatus {
            is_online: link.state().is_up(),
        },
    }
}
