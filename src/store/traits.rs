//! `LocalStore` trait: durable snapshot and pending-queue storage.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::todos::model::{PendingOperation, SyncAction, Todo};

/// Backend-agnostic storage for the local todo snapshot and the pending queue.
///
/// Implementations initialize lazily: the first call to any method sets up the
/// schema, exactly once, and concurrent first callers share that setup.
#[async_trait]
pub trait LocalStore: Send + Sync {
    // ── Snapshot ────────────────────────────────────────────────────

    /// Atomically replace the whole snapshot, stamping each record's
    /// `updated_at`. On failure the previous snapshot is left intact.
    async fn replace_snapshot(&self, todos: &[Todo]) -> Result<(), StorageError>;

    /// Read the full snapshot in saved order. Empty if none exists or the
    /// read fails.
    async fn read_snapshot(&self) -> Vec<Todo>;

    // ── Pending queue ───────────────────────────────────────────────

    /// Append one operation. Returns its strictly increasing sequence id.
    async fn enqueue_pending(&self, action: &SyncAction) -> Result<i64, StorageError>;

    /// All queued operations in enqueue order.
    async fn read_pending_queue(&self) -> Result<Vec<PendingOperation>, StorageError>;

    /// Delete one queued operation. No error if it is already gone.
    async fn remove_pending(&self, sequence_id: i64) -> Result<(), StorageError>;
}
