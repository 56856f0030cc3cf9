//! libSQL backend: async `LocalStore` implementation.
//!
//! The database is opened lazily on first use and migrated exactly once per
//! store instance. Supports local file and in-memory databases.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::store::migrations;
use crate::store::traits::LocalStore;
use crate::todos::model::{OperationKind, PendingOperation, SyncAction, Todo};

/// Where the database lives.
#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

/// Opened database plus the single connection reused for every operation.
struct Opened {
    _db: LibSqlDatabase,
    conn: Connection,
}

/// libSQL-backed local store.
pub struct LibSqlStore {
    location: Location,
    opened: OnceCell<Opened>,
    /// Serializes statements on the shared connection so a snapshot
    /// transaction never interleaves with another request.
    gate: Mutex<()>,
    #[cfg(test)]
    init_runs: std::sync::atomic::AtomicUsize,
}

impl LibSqlStore {
    /// A store backed by a local database file. Nothing is opened until first use.
    pub fn open_local(path: &Path) -> Self {
        Self::with_location(Location::File(path.to_path_buf()))
    }

    /// An in-memory store (for tests and throwaway sessions).
    pub fn in_memory() -> Self {
        Self::with_location(Location::Memory)
    }

    fn with_location(location: Location) -> Self {
        Self {
            location,
            opened: OnceCell::new(),
            gate: Mutex::new(()),
            #[cfg(test)]
            init_runs: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Whether schema setup has already run.
    pub fn is_initialized(&self) -> bool {
        self.opened.initialized()
    }

    /// Get the connection, opening and migrating the database on first call.
    ///
    /// Concurrent first callers await the same initialization. A failed
    /// initialization is not memoized.
    async fn conn(&self) -> Result<&Connection, StorageError> {
        let opened = self.opened.get_or_try_init(|| self.initialize()).await?;
        Ok(&opened.conn)
    }

    async fn initialize(&self) -> Result<Opened, StorageError> {
        #[cfg(test)]
        self.init_runs
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let db = match &self.location {
            Location::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StorageError::Open(format!("Failed to create store directory: {e}"))
                    })?;
                }
                libsql::Builder::new_local(path).build().await
            }
            Location::Memory => libsql::Builder::new_local(":memory:").build().await,
        }
        .map_err(|e| StorageError::Open(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StorageError::Open(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;

        match &self.location {
            Location::File(path) => info!(path = %path.display(), "Offline store opened"),
            Location::Memory => info!("In-memory offline store opened"),
        }
        Ok(Opened { _db: db, conn })
    }

    async fn try_read_snapshot(&self) -> Result<Vec<Todo>, StorageError> {
        let conn = self.conn().await?;
        let _gate = self.gate.lock().await;
        let mut rows = conn
            .query(
                &format!("SELECT {TODO_COLUMNS} FROM todos ORDER BY position ASC"),
                (),
            )
            .await
            .map_err(|e| StorageError::Query(format!("read_snapshot: {e}")))?;

        let mut todos = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StorageError::Query(format!("read_snapshot row: {e}")))?
        {
            todos.push(row_to_todo(&row)?);
        }
        Ok(todos)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Column list for todo SELECT queries.
const TODO_COLUMNS: &str = "id, text, completed, created_at, updated_at";

/// Column list for pending queue SELECT queries.
const QUEUE_COLUMNS: &str = "id, kind, payload, enqueued_at, retry_count";

fn row_to_todo(row: &libsql::Row) -> Result<Todo, StorageError> {
    let id: i64 = row
        .get(0)
        .map_err(|e| StorageError::Query(format!("todo.id: {e}")))?;
    let text: String = row
        .get(1)
        .map_err(|e| StorageError::Query(format!("todo.text: {e}")))?;
    let completed: i64 = row.get(2).unwrap_or(0);
    let created_at = row.get::<String>(3).ok().map(|s| parse_datetime(&s));
    let updated_at = row.get::<String>(4).ok().map(|s| parse_datetime(&s));

    Ok(Todo {
        id,
        text,
        completed: completed != 0,
        created_at,
        updated_at,
    })
}

fn row_to_pending(row: &libsql::Row) -> Result<PendingOperation, StorageError> {
    let sequence_id: i64 = row
        .get(0)
        .map_err(|e| StorageError::Query(format!("sync_queue.id: {e}")))?;
    let kind_str: String = row
        .get(1)
        .map_err(|e| StorageError::Query(format!("sync_queue.kind: {e}")))?;
    let kind: OperationKind = kind_str.parse().map_err(StorageError::Serialization)?;
    let payload_str: String = row
        .get(2)
        .map_err(|e| StorageError::Query(format!("sync_queue.payload: {e}")))?;
    let payload: Todo = serde_json::from_str(&payload_str)
        .map_err(|e| StorageError::Serialization(format!("sync_queue.payload: {e}")))?;
    let enqueued_str: String = row
        .get(3)
        .map_err(|e| StorageError::Query(format!("sync_queue.enqueued_at: {e}")))?;
    let retry_count: i64 = row.get(4).unwrap_or(0);

    Ok(PendingOperation {
        sequence_id,
        kind,
        payload,
        enqueued_at: parse_datetime(&enqueued_str),
        retry_count: u32::try_from(retry_count).unwrap_or(0),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl LocalStore for LibSqlStore {
    async fn replace_snapshot(&self, todos: &[Todo]) -> Result<(), StorageError> {
        let conn = self.conn().await?;
        let _gate = self.gate.lock().await;
        let stamped_at = Utc::now().to_rfc3339();

        let tx = conn
            .transaction()
            .await
            .map_err(|e| StorageError::Transaction(format!("begin: {e}")))?;

        let written = async {
            tx.execute("DELETE FROM todos", ())
                .await
                .map_err(|e| StorageError::Transaction(format!("clear snapshot: {e}")))?;

            for (position, todo) in todos.iter().enumerate() {
                tx.execute(
                    "INSERT INTO todos (id, position, text, completed, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        todo.id,
                        position as i64,
                        todo.text.as_str(),
                        todo.completed as i64,
                        todo.created_at.map(|d| d.to_rfc3339()),
                        stamped_at.as_str(),
                    ],
                )
                .await
                .map_err(|e| {
                    StorageError::Transaction(format!("insert todo {}: {e}", todo.id))
                })?;
            }
            Ok::<(), StorageError>(())
        }
        .await;

        match written {
            Ok(()) => {
                tx.commit()
                    .await
                    .map_err(|e| StorageError::Transaction(format!("commit: {e}")))?;
                debug!(count = todos.len(), "Snapshot replaced");
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Snapshot rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn read_snapshot(&self) -> Vec<Todo> {
        match self.try_read_snapshot().await {
            Ok(todos) => todos,
            Err(e) => {
                warn!(error = %e, "Failed to read snapshot, returning empty");
                Vec::new()
            }
        }
    }

    async fn enqueue_pending(&self, action: &SyncAction) -> Result<i64, StorageError> {
        let conn = self.conn().await?;
        let _gate = self.gate.lock().await;
        let payload = serde_json::to_string(&action.payload)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let mut rows = conn
            .query(
                "INSERT INTO sync_queue (kind, payload, enqueued_at, retry_count)
                 VALUES (?1, ?2, ?3, 0) RETURNING id",
                params![
                    action.kind.as_str(),
                    payload,
                    action.enqueued_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StorageError::Transaction(format!("enqueue_pending: {e}")))?;

        let sequence_id = match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map_err(|e| StorageError::Query(format!("enqueue_pending id: {e}")))?,
            Ok(None) => {
                return Err(StorageError::Query(
                    "enqueue_pending returned no id".to_string(),
                ));
            }
            Err(e) => return Err(StorageError::Query(format!("enqueue_pending row: {e}"))),
        };

        debug!(sequence_id, kind = %action.kind, todo_id = action.payload.id, "Pending operation queued");
        Ok(sequence_id)
    }

    async fn read_pending_queue(&self) -> Result<Vec<PendingOperation>, StorageError> {
        let conn = self.conn().await?;
        let _gate = self.gate.lock().await;
        let mut rows = conn
            .query(
                &format!("SELECT {QUEUE_COLUMNS} FROM sync_queue ORDER BY id ASC"),
                (),
            )
            .await
            .map_err(|e| StorageError::Query(format!("read_pending_queue: {e}")))?;

        let mut queue = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StorageError::Query(format!("read_pending_queue row: {e}")))?
        {
            queue.push(row_to_pending(&row)?);
        }
        Ok(queue)
    }

    async fn remove_pending(&self, sequence_id: i64) -> Result<(), StorageError> {
        let conn = self.conn().await?;
        let _gate = self.gate.lock().await;
        let removed = conn
            .execute(
                "DELETE FROM sync_queue WHERE id = ?1",
                params![sequence_id],
            )
            .await
            .map_err(|e| StorageError::Transaction(format!("remove_pending: {e}")))?;

        debug!(sequence_id, removed, "Pending operation removed");
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
