//! Health check and service info handlers

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct InfoResponse {
    pub service: String,
    pub version: String,
    pub mode: Option<String>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub backend_mode: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub backend: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Service identity, shown at the root path
pub async fn index(State(state): State<AppState>) -> Json<InfoResponse> {
    Json(InfoResponse {
        service: state.config.observability.service_name.clone(),
        version: ragbridge_common::VERSION.to_string(),
        mode: state
            .service
            .as_ref()
            .map(|s| s.mode().as_str().to_string()),
    })
}

/// Liveness probe - always returns healthy if server is running
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        backend_mode: state
            .service
            .as_ref()
            .map(|s| s.mode().as_str().to_string())
            .unwrap_or_else(|| "not initialized".to_string()),
    })
}

/// Readiness probe - reports whether the answer backend is usable
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    let backend_check = match &state.service {
        Some(service) => CheckResult {
            status: "up".to_string(),
            mode: Some(service.mode().as_str().to_string()),
            error: None,
        },
        None => CheckResult {
            status: "down".to_string(),
            mode: None,
            error: Some("answer backend is not configured".to_string()),
        },
    };

    let all_healthy = backend_check.status == "up";

    Json(ReadyResponse {
        status: if all_healthy { "ready" } else { "not_ready" }.to_string(),
        checks: HealthChecks {
            backend: backend_check,
        },
    })
}
