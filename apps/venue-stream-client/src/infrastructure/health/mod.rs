//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint reporting the state of every stream client the binary
//! runs, plus Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON status per service
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (every client has a live connection)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::streaming::{ConnectionState, ServiceKind};
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::stream::StreamClient;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Binary version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// One entry per stream client.
    pub services: Vec<ServiceHealth>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every client is connected.
    Healthy,
    /// Some clients are connected.
    Degraded,
    /// No client is connected.
    Unhealthy,
}

/// Snapshot of one stream client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceHealth {
    /// Venue service.
    pub service: ServiceKind,
    /// Physical connection state.
    pub state: ConnectionState,
    /// Whether the current connection has logged in.
    pub authenticated: bool,
    /// Registered handlers.
    pub watches: usize,
    /// Physical connections established so far.
    pub connects: u64,
}

impl ServiceHealth {
    fn of(client: &StreamClient) -> Self {
        Self {
            service: client.service(),
            state: client.state(),
            authenticated: client.is_authenticated(),
            watches: client.active_watches(),
            connects: client.connects(),
        }
    }

    /// Whether this client is ready to serve.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.is_alive() && (!self.service.requires_login() || self.authenticated)
    }
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    clients: Vec<StreamClient>,
}

impl HealthServerState {
    /// Create state reporting on `clients`.
    #[must_use]
    pub fn new(version: String, clients: Vec<StreamClient>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            clients,
        }
    }

    /// Snapshot every client.
    #[must_use]
    pub fn snapshot(&self) -> HealthResponse {
        let services: Vec<ServiceHealth> = self.clients.iter().map(ServiceHealth::of).collect();
        HealthResponse {
            status: determine_health_status(&services),
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            current_time: Utc::now(),
            services,
        }
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
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
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
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = state.snapshot();
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
    let response = state.snapshot();
    let is_ready =
        !response.services.is_empty() && response.services.iter().all(ServiceHealth::is_ready);

    if is_ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
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
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn determine_health_status(services: &[ServiceHealth]) -> HealthStatus {
    let alive = services.iter().filter(|s| s.state.is_alive()).count();

    if alive == 0 {
        HealthStatus::Unhealthy
    } else if alive == services.len() {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::NoopLogger;
    use crate::infrastructure::config::ClientConfig;

    fn service(service: ServiceKind, state: ConnectionState, authenticated: bool) -> ServiceHealth {
        ServiceHealth {
            service,
            state,
            authenticated,
            watches: 1,
            connects: 1,
        }
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }

    #[test]
    fn status_counts_live_connections() {
        let up = service(ServiceKind::Public, ConnectionState::Alive, false);
        let down = service(ServiceKind::Private, ConnectionState::Disconnected, false);

        assert_eq!(determine_health_status(&[up.clone()]), HealthStatus::Healthy);
        assert_eq!(
            determine_health_status(&[up, down.clone()]),
            HealthStatus::Degraded
        );
        assert_eq!(determine_health_status(&[down]), HealthStatus::Unhealthy);
        assert_eq!(determine_health_status(&[]), HealthStatus::Unhealthy);
    }

    #[test]
    fn private_service_needs_login_to_be_ready() {
        assert!(service(ServiceKind::Public, ConnectionState::Alive, false).is_ready());
        assert!(!service(ServiceKind::Private, ConnectionState::Alive, false).is_ready());
        assert!(service(ServiceKind::Private, ConnectionState::Alive, true).is_ready());
        assert!(!service(ServiceKind::Public, ConnectionState::Connecting, false).is_ready());
    }

    #[tokio::test]
    async fn snapshot_reports_idle_client() {
        let client = StreamClient::builder(ClientConfig::new(
            "ws://127.0.0.1:9/ws/v5/public",
            ServiceKind::Public,
        ))
        .logger(Arc::new(NoopLogger))
        .build();
        let state = HealthServerState::new("test".to_string(), vec![client]);

        let response = state.snapshot();
        assert_eq!(response.status, HealthStatus::Unhealthy);
        assert_eq!(
            response.services,
            vec![ServiceHealth {
                service: ServiceKind::Public,
                state: ConnectionState::Disconnected,
                authenticated: false,
                watches: 0,
                connects: 0,
            }]
        );
    }
}
