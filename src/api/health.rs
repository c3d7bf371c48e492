use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::time::Instant;

use crate::controller::AppState;
use crate::domain::Category;

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
    models: ModelsHealth,
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

#[derive(Debug, Serialize)]
pub struct ModelsHealth {
    active: Vec<Category>,
    training: Vec<Category>,
}

/// GET /health
///
/// Store reachability plus which categories are active or training
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store = check_store(&state).await;
    let healthy = store.status == "healthy";

    let training = Category::all()
        .into_iter()
        .filter(|c| state.training.is_running(*c))
        .collect();
    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        timestamp: chrono::Utc::now(),
        checks: HealthChecks {
            store,
            models: ModelsHealth {
                active: state.registry.active_categories().await,
                training,
            },
        },
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(response))
}

async fn check_store(state: &AppState) -> ComponentHealth {
    let start = Instant::now();
    match state.store.is_loaded(Category::default()).await {
        Ok(_) => ComponentHealth::healthy(start.elapsed().as_millis() as u64),
        Err(err) => ComponentHealth::unhealthy(err.to_string()),
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
    fn test_component_health_healthy() {
        let health = ComponentHealth::healthy(42);
        assert_eq!(health.status, "healthy");
        assert_eq!(health.latency_ms, Some(42));
        assert!(health.error.is_none());
    }

    #[test]
    fn test_component_health_unhealthy() {
        let health = ComponentHealth::unhealthy("Permission denied".to_string());
        assert_eq!(health.status, "unhealthy");
        assert!(health.latency_ms.is_none());
        assert_eq!(health.error, Some("Permission denied".to_string()));
    }
}
