//! Todo data model: records, pending operations, and the REST envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A single to-do item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    /// Unique within a snapshot. Temporary until the server assigns one.
    pub id: i64,
    /// Never empty after trimming.
    pub text: String,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Todo {
    /// Create a new, not-completed todo. The text is trimmed and must not be empty.
    pub fn new(id: i64, text: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            id,
            text: validate_text(text)?,
            completed: false,
            created_at: Some(Utc::now()),
            updated_at: None,
        })
    }

    /// Builder: set completion.
    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }

    /// Apply a partial update in place, stamping `updated_at`.
    pub fn apply(&mut self, patch: &TodoPatch) -> Result<(), ValidationError> {
        if let Some(text) = &patch.text {
            self.text = validate_text(text)?;
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        self.updated_at = Some(Utc::now());
        Ok(())
    }

    /// Equality ignoring the timestamps the store and server stamp on write.
    pub fn same_content(&self, other: &Todo) -> bool {
        self.id == other.id && self.text == other.text && self.completed == other.completed
    }
}

/// Trim `text`, rejecting empty input.
pub fn validate_text(text: &str) -> Result<String, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyText);
    }
    Ok(trimmed.to_string())
}

/// Pick a temporary id for a record the server has not acknowledged yet.
///
/// Millisecond clock, bumped past every id already in `existing`.
pub fn next_local_id(existing: &[Todo]) -> i64 {
    let max_id = existing.iter().map(|t| t.id).max().unwrap_or(0);
    Utc::now().timestamp_millis().max(max_id.saturating_add(1))
}

/// Partial update body for `PUT /api/todos/:id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl TodoPatch {
    pub fn completed(completed: bool) -> Self {
        Self {
            text: None,
            completed: Some(completed),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            completed: None,
        }
    }
}

/// Kind of mutation recorded in the pending queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl std::str::FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(format!("unknown operation kind: {other}")),
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutation waiting to be queued. The store assigns its sequence id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAction {
    pub kind: OperationKind,
    /// Snapshot of the record at the time of the operation.
    pub payload: Todo,
    pub enqueued_at: DateTime<Utc>,
}

impl SyncAction {
    pub fn new(kind: OperationKind, payload: Todo) -> Self {
        Self {
            kind,
            payload,
            enqueued_at: Utc::now(),
        }
    }
}

/// A queued mutation as stored in the pending queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    /// Strictly increasing, never reused.
    pub sequence_id: i64,
    pub kind: OperationKind,
    pub payload: Todo,
    pub enqueued_at: DateTime<Utc>,
    /// Reserved; the current drain never increments it.
    pub retry_count: u32,
}

/// Envelope wrapping every REST response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: message.into(),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: message.into(),
            error: None,
        }
    }
}

/// Body of `GET /api/health`. Unlike the other endpoints it carries no `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Whether the backend is believed reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }
}

/// Progress of the most recent drain of the pending queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Success,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_todo_trims_text() {
        let todo = Todo::new(1, "  buy milk  ").unwrap();
        assert_eq!(todo.text, "buy milk");
        assert!(!todo.completed);
        assert!(todo.created_at.is_some());
        assert!(todo.updated_at.is_none());
    }

    #[test]
    fn new_todo_rejects_blank_text() {
        assert_eq!(Todo::new(1, "   ").unwrap_err(), ValidationError::EmptyText);
        assert_eq!(Todo::new(1, "").unwrap_err(), ValidationError::EmptyText);
    }

    #[test]
    fn apply_patch_updates_fields() {
        let mut todo = Todo::new(1, "write code").unwrap();
        todo.apply(&TodoPatch::completed(true)).unwrap();
        assert!(todo.completed);
        assert!(todo.updated_at.is_some());

        todo.apply(&TodoPatch::text(" review code ")).unwrap();
        assert_eq!(todo.text, "review code");
        assert!(todo.completed);
    }

    #[test]
    fn apply_patch_rejects_blank_text() {
        let mut todo = Todo::new(1, "keep me").unwrap();
        assert!(todo.apply(&TodoPatch::text(" ")).is_err());
        assert_eq!(todo.text, "keep me");
    }

    #[test]
    fn local_id_is_unique_against_existing() {
        let far_future = Utc::now().timestamp_millis() + 1_000_000;
        let existing = vec![Todo::new(far_future, "x").unwrap()];
        assert_eq!(next_local_id(&existing), far_future + 1);
        assert!(next_local_id(&[]) > 0);
    }

    #[test]
    fn local_id_saturates_at_max() {
        let existing = vec![Todo::new(i64::MAX, "x").unwrap()];
        assert_eq!(next_local_id(&existing), i64::MAX);
    }

    #[test]
    fn todo_wire_format_is_camel_case() {
        let json = r#"{"id":7,"text":"buy milk","completed":false,"createdAt":"2024-05-01T10:00:00.000Z"}"#;
        let todo: Todo = serde_json::from_str(json).unwrap();
        assert_eq!(todo.id, 7);
        assert!(todo.created_at.is_some());
        assert!(todo.updated_at.is_none());

        let out = serde_json::to_string(&todo).unwrap();
        assert!(out.contains("\"createdAt\""));
        assert!(!out.contains("updatedAt"));
    }

    #[test]
    fn operation_kind_serde() {
        assert_eq!(serde_json::to_string(&OperationKind::Create).unwrap(), "\"CREATE\"");
        let parsed: OperationKind = serde_json::from_str("\"DELETE\"").unwrap();
        assert_eq!(parsed, OperationKind::Delete);
        assert_eq!("UPDATE".parse::<OperationKind>().unwrap(), OperationKind::Update);
        assert!("PATCH".parse::<OperationKind>().is_err());
    }

    #[test]
    fn envelope_without_data() {
        let json = r#"{"success":false,"message":"Todo not found"}"#;
        let parsed: ApiResponse<Todo> = serde_json::from_str(json).unwrap();
        assert!(!parsed.success);
        assert!(parsed.data.is_none());
        assert_eq!(parsed.message, "Todo not found");
    }

    #[test]
    fn envelope_with_data() {
        let json = r#"{"success":true,"data":{"id":3,"text":"a","completed":true}}"#;
        let parsed: ApiResponse<Todo> = serde_json::from_str(json).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.data.map(|t| t.id), Some(3));
        assert!(parsed.message.is_empty());
    }

    #[test]
    fn pending_operation_serde() {
        let op = PendingOperation {
            sequence_id: 3,
            kind: OperationKind::Update,
            payload: Todo::new(1, "t").unwrap(),
            enqueued_at: Utc::now(),
            retry_count: 0,
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"sequenceId\":3"));
        assert!(json.contains("\"kind\":\"UPDATE\""));
        assert!(json.contains("\"retryCount\":0"));
    }
}
