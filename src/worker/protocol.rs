//! Message protocol between the storage façade and the store worker.
//!
//! Every message is JSON-serializable with a SCREAMING_SNAKE_CASE `type` tag.
//! Requests and replies travel inside an [`Envelope`] carrying the correlation id.

use serde::{Deserialize, Serialize};

use crate::todos::model::{PendingOperation, SyncAction, Todo};

/// A request or reply tagged with its correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(rename = "messageId")]
    pub message_id: String,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Envelope<T> {
    pub fn new(message_id: impl Into<String>, body: T) -> Self {
        Self {
            message_id: message_id.into(),
            body,
        }
    }
}

/// Requests the façade sends to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerRequest {
    SaveTodosOffline { todos: Vec<Todo> },
    GetTodosOffline,
    AddSyncTask { action: SyncAction },
    GetSyncQueue,
    ClearSyncTask { id: i64 },
    CheckNetworkStatus,
}

impl WorkerRequest {
    /// Wire name, for logs and timeout messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SaveTodosOffline { .. } => "SAVE_TODOS_OFFLINE",
            Self::GetTodosOffline => "GET_TODOS_OFFLINE",
            Self::AddSyncTask { .. } => "ADD_SYNC_TASK",
            Self::GetSyncQueue => "GET_SYNC_QUEUE",
            Self::ClearSyncTask { .. } => "CLEAR_SYNC_TASK",
            Self::CheckNetworkStatus => "CHECK_NETWORK_STATUS",
        }
    }
}

/// Replies the worker sends back, one per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerReply {
    TodosSavedOffline {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    TodosLoadedOffline {
        todos: Vec<Todo>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    SyncTaskAdded {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    SyncQueueLoaded {
        queue: Vec<PendingOperation>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    SyncTaskCleared {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    NetworkStatus {
        #[serde(rename = "isOnline")]
        is_online: bool,
    },
}

impl WorkerReply {
    /// The failure the store reported, if any.
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::TodosSavedOffline { success, error }
            | Self::SyncTaskAdded { success, error, .. }
            | Self::SyncTaskCleared { success, error } => match error {
                Some(e) => Some(e.as_str()),
                None if !success => Some("unknown error"),
                None => None,
            },
            Self::TodosLoadedOffline { error, .. } | Self::SyncQueueLoaded { error, .. } => {
                error.as_deref()
            }
            Self::NetworkStatus { .. } => None,
        }
    }
}

/// Lifecycle control messages. These never get a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerControl {
    /// Activate a waiting worker so it starts serving requests.
    SkipWaiting,
}

/// Notifications the worker broadcasts to every subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerNotification {
    NetworkOnline,
    NetworkOffline,
}

/// Everything the worker's inbox accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Control(WorkerControl),
    Request(Envelope<WorkerRequest>),
}
