//! HTTP server for viewers.
//!
//! This module provides an HTTP server that:
//! - Serves the viewer page and static assets from the public root
//! - Streams `"frame"` events to every viewer over a WebSocket at `/ws`
//! - Accepts `"trackingData"` events on the same socket (or via
//!   POST /tracking) and appends them to the tracking log
//!
//! Each viewer session is one task selecting over broadcast frames, incoming
//! socket messages and server shutdown. Tracking replies are written back on
//! the submitting viewer's socket only.
//!
//! # Architecture
//!
//! ```text
//! CaptureLoop ──→ Broadcaster ──→ GET /ws ──→ viewers
//!                                    │
//!        viewers ──→ "trackingData" ─┴──→ TrackingLog ──→ tracking_data.json
//! ```

use crate::channel::{Broadcaster, ClientEvent, ServerEvent, TrackingResult};
use crate::core::history::{HistorySummary, SharedHistory};
use crate::error::TrackingError;
use crate::tracking::{TrackingEntry, TrackingLog};
use crate::transparency::{SharedStats, StatsSnapshot};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderValue, Method, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use uuid::Uuid;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub host: String,
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Root for the viewer page and static assets
    pub public_dir: PathBuf,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(host: impl Into<String>, port: u16, public_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            port,
            public_dir: public_dir.into(),
        }
    }
}

/// Shared server state
pub struct ServerState {
    broadcaster: Broadcaster,
    tracking: TrackingLog,
    stats: SharedStats,
    history: SharedHistory,
    /// Cancelled when the server stops, ending open viewer sessions
    shutdown: CancellationToken,
}

impl ServerState {
    /// Create new server state
    pub fn new(
        broadcaster: Broadcaster,
        tracking: TrackingLog,
        stats: SharedStats,
        history: SharedHistory,
    ) -> Self {
        Self {
            broadcaster,
            tracking,
            stats,
            history,
            shutdown: CancellationToken::new(),
        }
    }

    /// Append a tracking event and count the outcome.
    async fn append_tracking(
        &self,
        payload: serde_json::Value,
    ) -> Result<TrackingEntry, TrackingError> {
        let result = self.tracking.append(payload).await;
        match &result {
            Ok(_) => self.stats.record_tracking_appended(),
            Err(_) => self.stats.record_tracking_failed(),
        }
        result
    }

    /// Handle one text message from a viewer, returning the reply if any.
    async fn handle_client_text(&self, viewer_id: Uuid, text: &str) -> Option<ServerEvent> {
        match ClientEvent::parse(text) {
            Ok(ClientEvent::TrackingData(data)) => {
                let result = match self.append_tracking(data).await {
                    Ok(_) => {
                        tracing::debug!(%viewer_id, "Tracking data saved");
                        TrackingResult::success()
                    }
                    Err(e) => TrackingResult::failure(e),
                };
                Some(ServerEvent::TrackingResult(result))
            }
            Err(e) => {
                tracing::warn!(%viewer_id, "Ignoring unrecognised viewer message: {e}");
                None
            }
        }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub stats: StatsSnapshot,
    pub history: HistorySummary,
    pub viewers: usize,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /status
async fn status(State(state): State<Arc<ServerState>>) -> Json<StatusResponse> {
    let history = state.history.read().await.summary();
    Json(StatusResponse {
        stats: state.stats.snapshot(),
        history,
        viewers: state.broadcaster.viewer_count(),
    })
}

/// POST /tracking
///
/// Appends the JSON object body to the tracking log and returns the stored
/// entry.
async fn tracking(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<TrackingEntry>, (StatusCode, Json<ErrorResponse>)> {
    state.append_tracking(payload).await.map(Json).map_err(|e| {
        let (status, code) = match e {
            TrackingError::InvalidPayload(_) => (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "PERSISTENCE_ERROR"),
        };
        (
            status,
            Json(ErrorResponse {
                error: e.to_string(),
                code: code.to_string(),
            }),
        )
    })
}

/// GET /ws
async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> Response {
    ws.on_upgrade(move |socket| handle_viewer(socket, state))
}

async fn handle_viewer(mut socket: WebSocket, state: Arc<ServerState>) {
    let viewer_id = Uuid::new_v4();
    state.stats.record_viewer_connected();
    tracing::info!(%viewer_id, "A viewer connected");

    let mut frames = state.broadcaster.subscribe();

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(text) => {
                    if socket.send(Message::Text(text.to_string())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(%viewer_id, "Viewer lagged, skipped {n} frames");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let Some(reply) = state.handle_client_text(viewer_id, &text).await else {
                        continue;
                    };
                    // Replies go to this viewer only
                    match reply.to_message() {
                        Ok(message) => {
                            if socket.send(Message::Text(message.to_string())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::error!(%viewer_id, "Failed to encode reply: {e}"),
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = state.shutdown.cancelled() => break,
        }
    }

    state.stats.record_viewer_disconnected();
    tracing::info!(%viewer_id, "A viewer disconnected");
}

/// Build the router.
pub fn router(state: Arc<ServerState>, public_dir: PathBuf) -> Router {
    Router::new()
        .route_service("/", ServeFile::new(public_dir.join("index.html")))
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/tracking", post(tracking))
        .fallback_service(ServeDir::new(public_dir))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
    state: Arc<ServerState>,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let viewers_shutdown = state.shutdown.clone();
    let app = router(state, config.public_dir.clone());

    let ip: IpAddr = config.host.parse()?;
    let addr = SocketAddr::new(ip, config.port);
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Server running at http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
                viewers_shutdown.cancel();
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
