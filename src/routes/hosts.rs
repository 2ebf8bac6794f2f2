use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
};
use serde::Serialize;

use super::{restrict, storage_error};
use crate::app::AppState;
use crate::auth::{CurrentOrgId, CurrentUserId};
use crate::error::AppError;
use crate::models::{HostSummary, Report, Role};
use crate::storage::HostStore;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/hosts", get(list_hosts))
        .route(
            "/api/v1/hosts/{host_id}",
            get(get_host).merge(restrict(delete(delete_host), [Role::Editor, Role::Admin])),
        )
}

#[derive(Debug, Serialize)]
pub struct HostList {
    pub hosts: Vec<HostSummary>,
    pub total: usize,
}

/// Hosts of the caller's organization, most recently seen first
pub async fn list_hosts(
    State(state): State<AppState>,
    CurrentOrgId(org_id): CurrentOrgId,
) -> Result<Json<HostList>, AppError> {
    let hosts = state.storage.list_hosts(org_id).await?;
    let total = hosts.len();
    Ok(Json(HostList { hosts, total }))
}

pub async fn get_host(
    State(state): State<AppState>,
    CurrentOrgId(org_id): CurrentOrgId,
    Path(host_id): Path<String>,
) -> Result<Json<Report>, AppError> {
    let report = state
        .storage
        .get_host(&host_id, org_id)
        .await
        .map_err(storage_error("host"))?;
    Ok(Json(report))
}

pub async fn delete_host(
    State(state): State<AppState>,
    CurrentOrgId(org_id): CurrentOrgId,
    CurrentUserId(user_id): CurrentUserId,
    Path(host_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state
        .storage
        .delete_host(&host_id, org_id)
        .await
        .map_err(storage_error("host"))?;

    tracing::info!(host_id = %host_id, org_id = %org_id, user_id = %user_id, "Host deleted");
    Ok(StatusCode::NO_CONTENT)
}
