//! Loopback HTTP API for injecting events.
//!
//! ```text
//! POST /api/event   {"prompt": "...", "source": "cron-box", "channel_id": "123"}
//! GET  /api/health
//! ```
//!
//! The server binds 127.0.0.1 only. Requests are never authenticated.

use std::net::{Ipv4Addr, SocketAddr};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::agent::{EnqueueOutcome, EventQueue};
use crate::error::TransportError;
use crate::event::Event;

/// Maximum JSON body size for event requests (64 KB).
const MAX_BODY_BYTES: usize = 64 * 1024;

const DEFAULT_SOURCE: &str = "api";

#[derive(Debug, Deserialize)]
struct EventRequest {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    channel_id: Option<serde_json::Value>,
    #[serde(default)]
    dedupe_key: Option<String>,
}

impl EventRequest {
    fn channel_id(&self) -> Option<String> {
        match self.channel_id.as_ref()? {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn error_response(status: StatusCode, message: &str) -> ApiResponse {
    (status, Json(serde_json::json!({ "error": message })))
}

/// Build the API routes over a queue handle.
pub fn routes(queue: EventQueue) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/event", post(event_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(queue)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn event_handler(State(queue): State<EventQueue>, body: Bytes) -> ApiResponse {
    let request: EventRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!("Rejected API event: {}", e);
            return error_response(StatusCode::BAD_REQUEST, "invalid JSON");
        }
    };
    let prompt = request.prompt.as_deref().map(str::trim).unwrap_or_default();
    if prompt.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "prompt is required");
    }

    let source = request
        .source
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SOURCE)
        .to_string();
    let mut event = Event::api(&source, prompt);
    if let Some(channel_id) = request.channel_id() {
        event = event.with_channel(channel_id);
    }
    if let Some(key) = request.dedupe_key.as_deref().filter(|k| !k.trim().is_empty()) {
        event = event.with_dedupe_key(key.trim());
    }

    let status = match queue.enqueue(event) {
        EnqueueOutcome::Queued { depth } => {
            tracing::info!("API event from {} queued (depth {})", source, depth);
            "queued"
        }
        EnqueueOutcome::Deduped { key } => {
            tracing::info!("API event from {} deduped on {}", source, key);
            "deduped"
        }
        EnqueueOutcome::Closed => {
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "agent is shutting down");
        }
    };
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": status, "source": source })),
    )
}

/// A running loopback API server.
pub struct ApiServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ApiServer {
    /// Bind `127.0.0.1:port` and serve in the background. Port 0 picks a
    /// free port; see [`ApiServer::addr`].
    pub async fn start(port: u16, queue: EventQueue) -> Result<Self, TransportError> {
        let bind = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let listener = tokio::net::TcpListener::bind(bind)
            .await
            .map_err(|e| TransportError::StartupFailed {
                name: "api".to_string(),
                reason: format!("Failed to bind to {}: {}", bind, e),
            })?;
        let addr = listener
            .local_addr()
            .map_err(|e| TransportError::StartupFailed {
                name: "api".to_string(),
                reason: e.to_string(),
            })?;
        tracing::info!("Loopback API listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let app = routes(queue);
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                    tracing::info!("Loopback API shutting down");
                })
                .await
            {
                tracing::error!("Loopback API error: {}", e);
            }
        });

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::agent::event_queue;
    use crate::event::EventKind;

    async fn post_event(app: Router, body: &'static str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::post("/api/event")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (queue, _rx) = event_queue();
        let response = routes(queue)
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_post_event_queues() {
        let (queue, mut rx) = event_queue();
        let (status, body) = post_event(
            routes(queue),
            r#"{"source": "test-harness", "prompt": "hello world", "channel_id": 123456}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"status": "queued", "source": "test-harness"}));
        let (event, _release) = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Api);
        assert_eq!(event.prompt, "hello world");
        assert_eq!(event.source_id.as_deref(), Some("api:test-harness"));
        assert_eq!(event.channel_id.as_deref(), Some("123456"));
    }

    #[tokio::test]
    async fn test_default_source() {
        let (queue, _rx) = event_queue();
        let (status, body) = post_event(routes(queue), r#"{"prompt": "no source"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source"], "api");
    }

    #[tokio::test]
    async fn test_rejects_missing_prompt_and_bad_json() {
        let (queue, _rx) = event_queue();
        let (status, body) = post_event(routes(queue.clone()), r#"{"source": "test"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "prompt is required");

        let (status, _) = post_event(routes(queue), "not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_dedupe_key_is_honored() {
        let (queue, _rx) = event_queue();
        let app = routes(queue);
        let body = r#"{"prompt": "sweep", "dedupe_key": "job:sweep"}"#;
        let (_, first) = post_event(app.clone(), body).await;
        let (_, second) = post_event(app, body).await;
        assert_eq!(first["status"], "queued");
        assert_eq!(second["status"], "deduped");
    }

    #[tokio::test]
    async fn test_closed_queue_is_unavailable() {
        let (queue, rx) = event_queue();
        drop(rx);
        let (status, _) = post_event(routes(queue), r#"{"prompt": "late"}"#).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_server_binds_loopback() {
        let (queue, _rx) = event_queue();
        let mut server = ApiServer::start(0, queue).await.unwrap();
        assert!(server.addr().ip().is_loopback());
        assert_ne!(server.addr().port(), 0);
        server.shutdown().await;
    }
}
