//! Task submission gateway.
//!
//! Proxies summarization tasks to the server, gated on the credential
//! lifecycle: a request without a configured credential fails fast, a
//! rejected credential and an unreachable server are both folded back
//! into the server status monitor so the whole client agrees on what the
//! last observation was.

use recap_auth::AuthSessionManager;
use recap_status::{AuthValidity, ServerStatusMonitor, StatusPatch};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Task types the client proxies.
pub const TASK_SUMMARIZE_EMAIL: &str = "summarize_email";
pub const TASK_SUMMARIZE_CHAT: &str = "summarize_chat";

/// Gateway error type.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// No credential is configured locally; the request was never sent.
    #[error("No credential configured")]
    CredentialNotConfigured,

    /// The server rejected the credential (HTTP 401/403).
    #[error("Server rejected the credential (HTTP {0})")]
    CredentialRejected(u16),

    /// The server accepted the request but the task failed.
    #[error("Task failed: HTTP {status}: {message}")]
    TaskFailed { status: u16, message: String },

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias using GatewayError.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// A task submission.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRequest {
    /// Task type (e.g. "summarize_email").
    #[serde(rename = "type")]
    pub task_type: String,
    /// Opaque task payload; the scraped content shape is owned by the
    /// collaborators that produce it.
    pub data: serde_json::Value,
}

impl TaskRequest {
    /// Build a task request of an arbitrary type.
    pub fn new(task_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            data,
        }
    }

    /// An email summarization task.
    pub fn summarize_email(data: serde_json::Value) -> Self {
        Self::new(TASK_SUMMARIZE_EMAIL, data)
    }

    /// A chat summarization task.
    pub fn summarize_chat(data: serde_json::Value) -> Self {
        Self::new(TASK_SUMMARIZE_CHAT, data)
    }
}

/// A completed task as returned by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    /// Server-assigned task ID.
    pub task_id: String,
    /// Task status as reported by the server.
    pub status: String,
    /// Task result payload, when present.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Submits tasks to the server using the current credential and folds
/// request outcomes back into the server status.
#[derive(Clone)]
pub struct TaskGateway {
    auth: AuthSessionManager,
    monitor: ServerStatusMonitor,
    http_client: reqwest::Client,
    server_url: String,
}

impl TaskGateway {
    /// Create a new gateway.
    pub fn new(
        auth: AuthSessionManager,
        monitor: ServerStatusMonitor,
        server_url: impl Into<String>,
    ) -> Self {
        Self {
            auth,
            monitor,
            http_client: reqwest::Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Execute a task against the server.
    ///
    /// Preconditions: a credential must be configured (not necessarily
    /// validated). There is no client-side timeout; task duration is
    /// bounded by the server.
    pub async fn execute(&self, request: TaskRequest) -> GatewayResult<TaskResponse> {
        let headers = self.auth.get_auth_headers();
        if headers.is_empty() {
            warn!(task_type = %request.task_type, "Task submission without a configured credential");
            return Err(GatewayError::CredentialNotConfigured);
        }

        debug!(task_type = %request.task_type, "Submitting task");
        let mut builder = self
            .http_client
            .post(format!("{}/tasks", self.server_url))
            .json(&request);
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                if e.is_connect() || e.is_timeout() {
                    warn!(error = %e, "Task request could not reach the server");
                    self.monitor.set_status(StatusPatch {
                        reachable: Some(false),
                        ..Default::default()
                    });
                } else {
                    warn!(error = %e, "Task request transport failure");
                }
                return Err(GatewayError::Http(e));
            }
        };

        let code = response.status().as_u16();
        if code == 401 || code == 403 {
            warn!(code, "Server rejected the credential during task submission");
            // An HTTP response proves reachability; record both facts
            self.monitor.set_status(StatusPatch {
                reachable: Some(true),
                auth_valid: Some(AuthValidity::Invalid),
                http_status: Some(Some(code)),
                ..Default::default()
            });
            return Err(GatewayError::CredentialRejected(code));
        }

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|parsed| parsed.error)
                .unwrap_or(body);
            warn!(code, "Task failed on the server");
            return Err(GatewayError::TaskFailed {
                status: code,
                message,
            });
        }

        let task = response.json::<TaskResponse>().await?;
        info!(task_id = %task.task_id, status = %task.status, "Task completed");
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recap_bus::NotificationBus;
    use recap_storage::{CredentialStore, KeyValueStore, SessionStore, StorageKeys};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn spawn_canned_server(response: &'static str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{addr}")
    }

    fn build_gateway(
        server_url: &str,
        credential: Option<&str>,
    ) -> (TaskGateway, ServerStatusMonitor) {
        let fast = Arc::new(SessionStore::new());
        let durable = Arc::new(SessionStore::new());
        if let Some(token) = credential {
            fast.set(StorageKeys::CREDENTIAL_FAST_BACKUP, token).unwrap();
            durable.set(StorageKeys::CREDENTIAL, token).unwrap();
        }
        let store = CredentialStore::new(fast, durable);
        let bus = NotificationBus::new();
        let auth = AuthSessionManager::new(store.clone(), bus.clone(), server_url);
        let monitor = ServerStatusMonitor::new(auth.clone(), store, bus, server_url);
        let gateway = TaskGateway::new(auth, monitor.clone(), server_url);
        (gateway, monitor)
    }

    const UNREACHABLE: &str = "http://127.0.0.1:9";

    #[tokio::test]
    async fn test_execute_without_credential_fails_fast() {
        let (gateway, _) = build_gateway(UNREACHABLE, None);

        let err = gateway
            .execute(TaskRequest::summarize_email(serde_json::json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::CredentialNotConfigured));
    }

    #[tokio::test]
    async fn test_execute_success() {
        let server = spawn_canned_server(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 64\r\nConnection: close\r\n\r\n{\"taskId\":\"t-1\",\"status\":\"done\",\"result\":{\"summary\":\"3 emails\"}}",
        )
        .await;
        let (gateway, _) = build_gateway(&server, Some("tok_123"));

        let response = gateway
            .execute(TaskRequest::summarize_email(serde_json::json!({
                "subject": "hello"
            })))
            .await
            .unwrap();
        assert_eq!(response.task_id, "t-1");
        assert_eq!(response.status, "done");
        assert_eq!(
            response.result.unwrap()["summary"],
            serde_json::json!("3 emails")
        );
    }

    #[tokio::test]
    async fn test_execute_credential_rejected_updates_monitor() {
        let server = spawn_canned_server(
            "HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let (gateway, monitor) = build_gateway(&server, Some("tok_bad"));

        let err = gateway
            .execute(TaskRequest::summarize_chat(serde_json::json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::CredentialRejected(401)));

        let status = monitor.get_status();
        assert!(status.reachable);
        assert_eq!(status.auth_valid, AuthValidity::Invalid);
        assert_eq!(status.http_status, Some(401));
    }

    #[tokio::test]
    async fn test_execute_task_error_carries_server_message() {
        let server = spawn_canned_server(
            "HTTP/1.1 422 Unprocessable Entity\r\nContent-Type: application/json\r\nContent-Length: 28\r\nConnection: close\r\n\r\n{\"error\":\"content too long\"}",
        )
        .await;
        let (gateway, _) = build_gateway(&server, Some("tok_123"));

        let err = gateway
            .execute(TaskRequest::summarize_email(serde_json::json!({})))
            .await
            .unwrap_err();
        match err {
            GatewayError::TaskFailed { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "content too long");
            }
            other => panic!("Expected TaskFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_execute_unreachable_updates_monitor() {
        let (gateway, monitor) = build_gateway(UNREACHABLE, Some("tok_123"));

        let err = gateway
            .execute(TaskRequest::summarize_email(serde_json::json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Http(_)));
        assert!(!monitor.get_status().reachable);
    }

    #[test]
    fn test_task_request_wire_format() {
        let request = TaskRequest::summarize_chat(serde_json::json!({"messages": []}));
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded["type"], "summarize_chat");
        assert!(encoded["data"]["messages"].is_array());
    }
}
