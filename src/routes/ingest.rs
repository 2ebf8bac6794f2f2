use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    routing::post,
};
use chrono::{SecondsFormat, Utc};
use tower_http::decompression::RequestDecompressionLayer;

use super::restrict;
use crate::app::AppState;
use crate::auth::{CurrentOrgId, CurrentUserId};
use crate::error::{AppError, ErrorWithContext};
use crate::middleware::INGEST_PATH;
use crate::models::{IngestRequest, IngestResponse, Report, Role};
use crate::storage::{HostStore, StorageError};
use crate::validation::json_rejection;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route(
            INGEST_PATH,
            restrict(post(ingest), [Role::Editor, Role::Admin]),
        )
        // Agents may send `Content-Encoding: gzip`
        .route_layer(RequestDecompressionLayer::new())
}

/// Store the latest report for a host, replacing any earlier one.
pub async fn ingest(
    State(state): State<AppState>,
    CurrentOrgId(org_id): CurrentOrgId,
    CurrentUserId(user_id): CurrentUserId,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<IngestResponse>), ErrorWithContext> {
    let Json(payload) = payload.map_err(json_rejection)?;

    if payload.meta.host_id.trim().is_empty() {
        return Err(AppError::bad_request("missing host_id in meta").into());
    }
    if payload.meta.hostname.trim().is_empty() {
        return Err(AppError::bad_request("missing hostname in meta").into());
    }

    let report = Report {
        id: payload.meta.host_id.clone(),
        received_at: Utc::now(),
        meta: payload.meta,
        data: payload.data,
        errors: payload.errors,
    };

    state
        .storage
        .save_host(&report, org_id, user_id)
        .await
        .map_err(|e| match e {
            StorageError::Conflict(_) => {
                tracing::warn!(
                    host_id = %report.id,
                    org_id = %org_id,
                    "Ingest for a host registered to another organization"
                );
                AppError::conflict("host is registered to another organization")
            }
            other => {
                tracing::error!(error = %other, host_id = %report.id, "Failed to store host data");
                AppError::from(other)
            }
        })?;

    tracing::info!(
        host_id = %report.id,
        hostname = %report.meta.hostname,
        org_id = %org_id,
        user_id = %user_id,
        errors = report.errors.len(),
        "Host report ingested"
    );

    Ok((
        StatusCode::CREATED,
        Json(IngestResponse {
            status: "ok".to_string(),
            report_id: report.id,
            received_at: report.received_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            message: "Host data updated successfully".to_string(),
        }),
    ))
}
