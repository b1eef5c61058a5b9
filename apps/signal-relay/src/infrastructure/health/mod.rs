//! Health Check, Status and Metrics Endpoint
//!
//! HTTP surface over the published relay stats. Read-only apart from the
//! reconnect trigger, which is forwarded to the relay as an event.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health status with per-bridge stats
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (every required bridge connected)
//! - `GET /status` - Per-bridge status and retained violations
//! - `GET /api/service-status` - Upstream-open flag per bridge
//! - `POST /api/bridges/{name}/reconnect` - Explicit reconnect trigger
//! - `GET /metrics` - Prometheus metrics in text format

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::RelayStats;
use crate::domain::snapshot::{ConnectionStatus, Violation};
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::runtime::RelayHandle;

// =============================================================================
// Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Relay version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Per-bridge state.
    pub bridges: Vec<BridgeHealth>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every bridge connected.
    Healthy,
    /// Required bridges connected, some optional bridge is not.
    Degraded,
    /// A required bridge is not connected.
    Unhealthy,
}

/// One bridge in the health response.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeHealth {
    /// Whether overall health depends on it.
    pub required: bool,
    /// Relay stats.
    #[serde(flatten)]
    pub stats: RelayStats,
}

/// One bridge in the `/status` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    /// Last status broadcast to clients.
    pub status: ConnectionStatus,
    /// Latest non-empty violation batch.
    pub last_violations: Arc<[Violation]>,
    /// Registered clients.
    pub clients: usize,
    /// Whether the upstream socket is open.
    pub upstream_open: bool,
    /// Commands waiting for the link.
    pub queue_depth: usize,
    /// Reconnect attempts since the last open.
    pub reconnect_attempts: u32,
}

impl From<RelayStats> for BridgeStatus {
    fn from(stats: RelayStats) -> Self {
        Self {
            status: stats.status,
            last_violations: stats.last_violations,
            clients: stats.clients,
            upstream_open: stats.upstream_open,
            queue_depth: stats.queue_depth,
            reconnect_attempts: stats.reconnect_attempts,
        }
    }
}

#[derive(Debug, Serialize)]
struct ReconnectAccepted {
    bridge: &'static str,
    accepted: bool,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    bridges: Vec<RelayHandle>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, bridges: Vec<RelayHandle>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            bridges,
        }
    }

    fn bridge(&self, name: &str) -> Option<&RelayHandle> {
        self.bridges.iter().find(|bridge| bridge.name() == name)
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/status", get(status_handler))
        .route("/api/service-status", get(service_status_handler))
        .route("/api/bridges/{name}/reconnect", post(reconnect_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let is_ready = state
        .bridges
        .iter()
        .filter(|bridge| bridge.required())
        .all(|bridge| bridge.stats().upstream_open);

    if is_ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn status_handler(
    State(state): State<Arc<HealthServerState>>,
) -> Json<BTreeMap<&'static str, BridgeStatus>> {
    Json(
        state
            .bridges
            .iter()
            .map(|bridge| (bridge.name(), BridgeStatus::from(bridge.stats())))
            .collect(),
    )
}

async fn service_status_handler(
    State(state): State<Arc<HealthServerState>>,
) -> Json<BTreeMap<&'static str, bool>> {
    Json(
        state
            .bridges
            .iter()
            .map(|bridge| (bridge.name(), bridge.stats().upstream_open))
            .collect(),
    )
}

async fn reconnect_handler(
    State(state): State<Arc<HealthServerState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let Some(bridge) = state.bridge(&name) else {
        return (StatusCode::NOT_FOUND, format!("unknown bridge: {name}")).into_response();
    };

    let accepted = bridge.request_reconnect();
    tracing::info!(bridge = bridge.name(), accepted, "Reconnect requested over HTTP");

    let status = if accepted {
        StatusCode::ACCEPTED
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReconnectAccepted {
            bridge: bridge.name(),
            accepted,
        }),
    )
        .into_response()
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let bridges: Vec<BridgeHealth> = state
        .bridges
        .iter()
        .map(|bridge| BridgeHealth {
            required: bridge.required(),
            stats: bridge.stats(),
        })
        .collect();

    HealthResponse {
        status: determine_health_status(&bridges),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        bridges,
    }
}

fn determine_health_status(bridges: &[BridgeHealth]) -> HealthStatus {
    if bridges
        .iter()
        .any(|bridge| bridge.required && !bridge.stats.upstream_open)
    {
        HealthStatus::Unhealthy
    } else if bridges.iter().all(|bridge| bridge.stats.upstream_open) {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
