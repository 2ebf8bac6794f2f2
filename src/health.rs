use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::app::AppState;

pub const SERVICE_NAME: &str = "hostbus";

/// Overall health status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Error,
}

/// Reachability of the storage backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseStatus {
    Connected,
    Disconnected,
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub service: String,
    pub database: DatabaseStatus,
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        let status_code = match self.status {
            HealthStatus::Ok => StatusCode::OK,
            HealthStatus::Error => StatusCode::SERVICE_UNAVAILABLE,
        };

        (status_code, Json(self)).into_response()
    }
}

/// Handler for the health endpoint
pub async fn health_handler(State(state): State<AppState>) -> HealthResponse {
    let (status, database) = match state.storage.ping().await {
        Ok(()) => (HealthStatus::Ok, DatabaseStatus::Connected),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed: storage unreachable");
            (HealthStatus::Error, DatabaseStatus::Disconnected)
        }
    };

    HealthResponse {
        status,
        service: SERVICE_NAME.to_string(),
        database,
    }
}
