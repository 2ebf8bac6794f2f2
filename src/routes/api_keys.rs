use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{blocking, storage_error};
use crate::app::AppState;
use crate::auth::CurrentUserId;
use crate::error::{AppError, ErrorWithContext};
use crate::models::{ApiKey, CreateApiKeyRequest, CreateApiKeyResponse, NewApiKey};
use crate::storage::ApiKeyStore;
use crate::validation::ValidatedJson;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/api-keys", get(list_api_keys).post(create_api_key))
        .route("/api/v1/api-keys/{id}", delete(delete_api_key))
}

#[derive(Debug, Serialize)]
pub struct ApiKeyList {
    pub api_keys: Vec<ApiKey>,
    pub total: usize,
}

/// Generate, persist and return a new key for `user_id`.
///
/// The plaintext is only returned once the hash is stored, so a caller never
/// holds a key the server cannot verify.
pub(crate) async fn issue_key(
    state: &AppState,
    user_id: Uuid,
    name: String,
    expires_at: Option<DateTime<Utc>>,
) -> Result<CreateApiKeyResponse, AppError> {
    if let Some(expires_at) = expires_at {
        if expires_at <= Utc::now() {
            return Err(AppError::bad_request("expires_at must be in the future"));
        }
    }

    let credentials = state.credentials.clone();
    let generated = blocking(move || credentials.generate_api_key()).await??;

    let stored = state
        .storage
        .create_api_key(NewApiKey {
            user_id,
            key_hash: generated.hash.clone(),
            key_prefix: generated.prefix.clone(),
            name,
            expires_at,
        })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, user_id = %user_id, "Failed to store API key");
            AppError::from(e)
        })?;

    tracing::info!(user_id = %user_id, key_id = %stored.id, name = %stored.name, "API key issued");

    Ok(CreateApiKeyResponse {
        id: stored.id,
        key: generated.into_plaintext(),
        name: stored.name,
        expires_at: stored.expires_at,
        created_at: stored.created_at,
    })
}

pub async fn create_api_key(
    State(state): State<AppState>,
    CurrentUserId(user_id): CurrentUserId,
    ValidatedJson(req): ValidatedJson<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<CreateApiKeyResponse>), ErrorWithContext> {
    let issued = issue_key(&state, user_id, req.name, req.expires_at).await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

pub async fn list_api_keys(
    State(state): State<AppState>,
    CurrentUserId(user_id): CurrentUserId,
) -> Result<Json<ApiKeyList>, AppError> {
    let api_keys = state.storage.get_api_keys_by_user(user_id).await?;
    let total = api_keys.len();
    Ok(Json(ApiKeyList { api_keys, total }))
}

/// Delete one of the caller's keys. Keys of other users are reported missing.
pub async fn delete_api_key(
    State(state): State<AppState>,
    CurrentUserId(user_id): CurrentUserId,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let key_id = id
        .parse::<Uuid>()
        .map_err(|_| AppError::not_found("API key not found"))?;

    state
        .storage
        .delete_api_key(key_id, user_id)
        .await
        .map_err(storage_error("API key"))?;

    tracing::info!(user_id = %user_id, key_id = %key_id, "API key deleted");
    Ok(StatusCode::NO_CONTENT)
}
