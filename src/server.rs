//! HTTP server exposing the message log to a UI.
//!
//! This module provides an HTTP server that:
//! - Serves the message log via GET /messages
//! - Accepts chat turns via POST /chat
//! - Queues a manual triage cycle via POST /refresh
//!
//! # Architecture
//!
//! ```text
//! UI ──→ POST /chat ──→ pipeline ──→ analysis endpoint
//!  │                        ↓
//!  └──→ GET /messages ←── message log ←── scheduler ←── POST /refresh
//! ```

use crate::messages::Message;
use crate::pipeline::TriagePipeline;
use crate::scheduler::{SchedulerStats, StatsSnapshot, Trigger};
use axum::{
    extract::{Query, State},
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, error::TrySendError};
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

/// Shared server state
pub struct ServerState {
    /// Pipeline used for chat turns and log access
    pipeline: Arc<TriagePipeline>,
    /// Scheduler trigger queue
    triggers: mpsc::Sender<Trigger>,
    /// Scheduler counters, when a scheduler is running
    stats: Option<Arc<SchedulerStats>>,
}

impl ServerState {
    /// Create new server state
    pub fn new(pipeline: Arc<TriagePipeline>, triggers: mpsc::Sender<Trigger>) -> Self {
        Self {
            pipeline,
            triggers,
            stats: None,
        }
    }

    /// Report scheduler counters on /health.
    pub fn with_stats(mut self, stats: Arc<SchedulerStats>) -> Self {
        self.stats = Some(stats);
        self
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub messages: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<StatsSnapshot>,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Query parameters for GET /messages
#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<usize>,
}

/// Request body for POST /chat
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// Response from POST /chat
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub delivered: bool,
}

/// Generic status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

/// GET /health
async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        messages: state.pipeline.log().len(),
        scheduler: state.stats.as_ref().map(|s| s.snapshot()),
    })
}

/// GET /messages
async fn list_messages(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<MessagesQuery>,
) -> Json<Vec<Message>> {
    let log = state.pipeline.log();
    Json(match query.limit {
        Some(limit) => log.tail(limit),
        None => log.messages(),
    })
}

/// POST /chat
///
/// Records the user's message, asks the analysis endpoint, and records the
/// reply (or an apology when the endpoint fails).
async fn chat(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let text = request.message.trim();
    if text.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "INVALID_MESSAGE",
            "Message must not be empty",
        ));
    }

    let reply = state.pipeline.send_chat(text).await.map_err(|e| {
        tracing::error!("Failed to record chat turn: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "PERSISTENCE_ERROR", e.to_string())
    })?;

    Ok(Json(ChatResponse {
        reply: reply.text,
        delivered: reply.delivered,
    }))
}

/// POST /refresh
async fn refresh(
    State(state): State<Arc<ServerState>>,
) -> Result<(StatusCode, Json<StatusResponse>), ApiError> {
    match state.triggers.try_send(Trigger::Manual) {
        Ok(()) => Ok((
            StatusCode::ACCEPTED,
            Json(StatusResponse {
                status: "accepted".to_string(),
                message: "Triage cycle requested".to_string(),
            }),
        )),
        Err(TrySendError::Full(_)) => Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "SCHEDULER_BUSY",
            "Too many pending triggers",
        )),
        Err(TrySendError::Closed(_)) => Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "SCHEDULER_STOPPED",
            "Scheduler is not running",
        )),
    }
}

/// DELETE /messages
async fn clear_messages(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.pipeline.log().clear().map_err(|e| {
        tracing::error!("Failed to clear message log: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "PERSISTENCE_ERROR", e.to_string())
    })?;

    Ok(Json(StatusResponse {
        status: "ok".to_string(),
        message: "Message log cleared".to_string(),
    }))
}

/// Build the router without binding it.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/messages", get(list_messages).delete(clear_messages))
        .route("/chat", post(chat))
        .route("/refresh", post(refresh))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
    state: ServerState,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(Arc::new(state));

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Triage agent server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
