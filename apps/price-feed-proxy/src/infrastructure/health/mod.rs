//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, session reporting and Prometheus
//! metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health status with per-session detail
//! - `GET /healthz` - liveness probe (simple OK)
//! - `GET /readyz` - readiness probe (ready until shutdown begins)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::SessionRegistry;
use crate::domain::session::{SessionSnapshot, SessionState};
use crate::infrastructure::metrics::get_metrics_handle;

/// Poll failures after which a session that never produced a sample counts
/// as degraded.
const DEGRADED_FAILURE_THRESHOLD: u64 = 3;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Proxy version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Registered sessions.
    pub session_count: usize,
    /// Unreleased subscriber handles across all sessions.
    pub subscriber_count: usize,
    /// Per-session detail.
    pub sessions: Vec<SessionSnapshot>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every session is producing samples.
    Healthy,
    /// Some session has only ever failed to read.
    Degraded,
    /// Shutting down.
    Unhealthy,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    registry: SessionRegistry,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, registry: SessionRegistry) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            registry,
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

/// Build the health router.
#[must_use]
pub fn router(state: Arc<HealthServerState>) -> Router {
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
    if state.registry.is_shutting_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    } else {
        (StatusCode::OK, "READY")
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

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let sessions = state.registry.snapshot();

    HealthResponse {
        status: determine_health_status(state.registry.is_shutting_down(), &sessions),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        session_count: sessions.len(),
        subscriber_count: sessions.iter().map(|s| s.subscriber_count).sum(),
        sessions,
    }
}

fn determine_health_status(shutting_down: bool, sessions: &[SessionSnapshot]) -> HealthStatus {
    if shutting_down {
        return HealthStatus::Unhealthy;
    }

    let starved = sessions.iter().any(|s| {
        s.state == SessionState::Running
            && s.samples_published == 0
            && s.poll_failures >= DEGRADED_FAILURE_THRESHOLD
    });

    if starved {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
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

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::application::ports::MockPriceSource;
    use crate::application::services::RegistryConfig;
    use crate::domain::feed::{DEFAULT_EXCHANGE, FeedKey};
    use crate::domain::session::SessionId;

    fn snapshot(state: SessionState, published: u64, failures: u64) -> SessionSnapshot {
        SessionSnapshot {
            id: SessionId(1),
            key: FeedKey::normalize("", "BTCUSD", DEFAULT_EXCHANGE).unwrap(),
            state,
            subscriber_count: 1,
            samples_published: published,
            samples_unobserved: 0,
            receivers: 1,
            poll_failures: failures,
            last_sample: None,
            started_at: Utc::now(),
        }
    }

    fn state() -> Arc<HealthServerState> {
        let registry = SessionRegistry::new(Arc::new(MockPriceSource::new()), RegistryConfig::default());
        Arc::new(HealthServerState::new("1.2.3".to_string(), registry))
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn empty_registry_is_healthy() {
        assert_eq!(determine_health_status(false, &[]), HealthStatus::Healthy);
    }

    #[test]
    fn starved_session_is_degraded() {
        let sessions = [
            snapshot(SessionState::Running, 10, 1),
            snapshot(SessionState::Running, 0, 5),
        ];
        assert_eq!(determine_health_status(false, &sessions), HealthStatus::Degraded);
    }

    #[test]
    fn occasional_failures_stay_healthy() {
        let sessions = [snapshot(SessionState::Running, 10, 50)];
        assert_eq!(determine_health_status(false, &sessions), HealthStatus::Healthy);
    }

    #[test]
    fn shutting_down_is_unhealthy() {
        assert_eq!(determine_health_status(true, &[]), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn health_endpoint_reports_json() {
        let response = router(state())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["version"], "1.2.3");
        assert_eq!(json["session_count"], 0);
        assert_eq!(json["subscriber_count"], 0);
    }

    #[tokio::test]
    async fn readiness_flips_on_shutdown() {
        let state = state();

        let ready = router(Arc::clone(&state))
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ready.status(), StatusCode::OK);

        state.registry.shutdown().await;

        let not_ready = router(state)
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(not_ready.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn liveness_is_ok() {
        let response = router(state())
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
