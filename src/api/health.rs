use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::time::Instant;

use crate::controller::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    store: ComponentHealth,
}

/// Health status of a component
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ComponentHealth {
    fn healthy(latency_ms: u64) -> Self {
        Self {
            status: "healthy".to_string(),
            latency_ms: Some(latency_ms),
            error: None,
        }
    }

    fn unhealthy(error: String) -> Self {
        Self {
            status: "unhealthy".to_string(),
            latency_ms: None,
            error: Some(error),
        }
    }
}

async fn check_store(state: &AppState) -> ComponentHealth {
    let start = Instant::now();
    match state.store.ping().await {
        Ok(()) => ComponentHealth::healthy(start.elapsed().as_millis() as u64),
        Err(e) => ComponentHealth::unhealthy(e.to_string()),
    }
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store = check_store(&state).await;
    let healthy = store.status == "healthy";

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        timestamp: chrono::Utc::now(),
        checks: HealthChecks { store },
    };
    tracing::debug!(healthy, "health check completed");

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(response))
}

/// GET /health/ready - 200 once the store answers
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// GET /health/live
pub async fn liveness_check() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_health() {
        let health = ComponentHealth::healthy(42);
        assert_eq!(health.status, "healthy");
        assert_eq!(health.latency_ms, Some(42));

        let health = ComponentHealth::unhealthy("connection refused".to_string());
        assert_eq!(health.status, "unhealthy");
        assert_eq!(health.error.as_deref(), Some("connection refused"));
    }
}
