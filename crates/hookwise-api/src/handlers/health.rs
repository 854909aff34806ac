//! Health check handlers for orchestration probes.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use hookwise_core::Clock;
use serde::Serialize;
use tracing::{debug, error, instrument};

use crate::AppState;

/// Health check response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: HealthStatus,
    /// When the check ran.
    pub timestamp: DateTime<Utc>,
    /// Individual component checks.
    pub checks: HealthChecks,
    /// Service version.
    pub version: String,
}

/// Overall health status.
#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Critical systems failing.
    Unhealthy,
}

/// Individual component health results.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Database connectivity.
    pub database: ComponentHealth,
}

/// Health of one component.
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    /// Whether the component is up.
    pub up: bool,
    /// Error message when down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Primary health check: verifies database connectivity.
#[instrument(name = "health_check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Response {
    let database = match state.storage.health_check().await {
        Ok(()) => ComponentHealth { up: true, message: None },
        Err(e) => {
            error!(error = %e, "database health check failed");
            ComponentHealth { up: false, message: Some(e.to_string()) }
        },
    };

    let healthy = database.up;
    let response = HealthResponse {
        status: if healthy { HealthStatus::Healthy } else { HealthStatus::Unhealthy },
        timestamp: state.clock.now_utc(),
        checks: HealthChecks { database },
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let status_code =
        if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(response)).into_response()
}

/// Readiness probe: ready to accept traffic when the database answers.
#[instrument(name = "readiness_check", skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Response {
    health_check(State(state)).await
}

/// Liveness probe: the process is responding, no dependency checks.
#[instrument(name = "liveness_check", skip(state))]
pub async fn liveness_check(State(state): State<AppState>) -> Response {
    debug!("liveness check");

    let response = serde_json::json!({
        "status": "alive",
        "timestamp": state.clock.now_utc(),
        "service": "hookwise-api",
    });

    (StatusCode::OK, Json(response)).into_response()
}
