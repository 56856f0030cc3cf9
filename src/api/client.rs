//! HTTP client for the todo backend.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use crate::error::RemoteError;
use crate::todos::model::{ApiResponse, HealthReport, Todo, TodoPatch};

/// Stateless access to the backend's REST contract. No retries.
#[async_trait]
pub trait TodoApi: Send + Sync {
    /// `GET /todos`
    async fn get_todos(&self) -> Result<Vec<Todo>, RemoteError>;

    /// `POST /todos`. The server assigns the id and timestamps.
    async fn create_todo(&self, text: &str) -> Result<Todo, RemoteError>;

    /// `PUT /todos/{id}`
    async fn update_todo(&self, id: i64, patch: &TodoPatch) -> Result<Todo, RemoteError>;

    /// `DELETE /todos/{id}`. Returns the removed record.
    async fn delete_todo(&self, id: i64) -> Result<Todo, RemoteError>;

    /// `POST /todos/sync`. Replaces the server's list; returns the authoritative one.
    async fn sync_todos(&self, todos: &[Todo]) -> Result<Vec<Todo>, RemoteError>;

    /// `GET /health`
    async fn health_check(&self) -> Result<HealthReport, RemoteError>;
}

/// [`TodoApi`] over reqwest.
pub struct HttpTodoApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTodoApi {
    /// `base_url` includes the `/api` prefix, e.g. `http://localhost:3001/api`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{endpoint}", self.base_url)
    }

    /// Send a request and return the raw body of a 2xx response.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
    ) -> Result<(StatusCode, String), RemoteError> {
        let mut request = self.client.request(method.clone(), self.url(endpoint));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        debug!(%method, endpoint, status = status.as_u16(), "Backend responded");

        if !status.is_success() {
            return Err(error_from_body(status, &text));
        }
        Ok((status, text))
    }

    /// Send a request and unwrap the `data` of the envelope.
    async fn call<T, B>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
    ) -> Result<T, RemoteError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let (status, text) = self.send(method, endpoint, body).await?;
        unwrap_envelope(status, endpoint, &text)
    }
}

#[async_trait]
impl TodoApi for HttpTodoApi {
    async fn get_todos(&self) -> Result<Vec<Todo>, RemoteError> {
        self.call(Method::GET, "/todos", None::<&()>).await
    }

    async fn create_todo(&self, text: &str) -> Result<Todo, RemoteError> {
        self.call(Method::POST, "/todos", Some(&json!({ "text": text })))
            .await
    }

    async fn update_todo(&self, id: i64, patch: &TodoPatch) -> Result<Todo, RemoteError> {
        self.call(Method::PUT, &format!("/todos/{id}"), Some(patch))
            .await
    }

    async fn delete_todo(&self, id: i64) -> Result<Todo, RemoteError> {
        self.call(Method::DELETE, &format!("/todos/{id}"), None::<&()>)
            .await
    }

    async fn sync_todos(&self, todos: &[Todo]) -> Result<Vec<Todo>, RemoteError> {
        self.call(Method::POST, "/todos/sync", Some(&json!({ "todos": todos })))
            .await
    }

    async fn health_check(&self) -> Result<HealthReport, RemoteError> {
        let (_, text) = self.send(Method::GET, "/health", None::<&()>).await?;
        serde_json::from_str(&text).map_err(|e| RemoteError::InvalidResponse(format!("/health: {e}")))
    }
}

/// Map a non-2xx response to an error, preferring the envelope's message.
/// Take `data` out of a 2xx envelope. `success: false` is a failure whatever the status.
fn unwrap_envelope<T: DeserializeOwned>(
    status: StatusCode,
    endpoint: &str,
    body: &str,
) -> Result<T, RemoteError> {
    let envelope: ApiResponse<T> = serde_json::from_str(body)
        .map_err(|e| RemoteError::InvalidResponse(format!("{endpoint}: {e}")))?;
    if !envelope.success {
        return Err(error_from_body(status, body));
    }
    envelope
        .data
        .ok_or_else(|| RemoteError::InvalidResponse(format!("{endpoint}: response has no data")))
}

fn error_from_body(status: StatusCode, body: &str) -> RemoteError {
    let message = serde_json::from_str::<ApiResponse<serde_json::Value>>(body)
        .ok()
        .map(|envelope| envelope.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

    RemoteError::Http {
        status: status.as_u16(),
        message,
    }
}
