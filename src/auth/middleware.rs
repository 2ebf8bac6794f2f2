//! The authentication stage.
//!
//! Resolves the presented API key to an active user and publishes an
//! [`AuthContext`]. Every failure is terminal and fails closed.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use super::context::AuthContext;
use super::token::ApiKeyExtractor;
use crate::app::AppState;
use crate::credentials::{is_expired, key_prefix};
use crate::error::{AppError, ErrorContext, ErrorWithContext};
use crate::storage::{ApiKeyStore, StorageError, UserStore};

/// Middleware requiring a valid API key
///
/// # Example
///
/// ```rust,ignore
/// let protected = Router::new()
///     .route("/hosts", get(list_hosts))
///     .layer(axum::middleware::from_fn_with_state(state.clone(), RequireApiKey::middleware));
/// ```
pub struct RequireApiKey;

impl RequireApiKey {
    pub async fn middleware(
        State(state): State<AppState>,
        mut request: Request,
        next: Next,
    ) -> Result<Response, ErrorWithContext> {
        let Some(presented) = ApiKeyExtractor::from_headers(request.headers()) else {
            tracing::warn!(path = %request.uri().path(), "Request without API key");
            return Err(AppError::unauthorized("missing API key").with_context(
                ErrorContext::new()
                    .with_message("Please provide an API key in the X-API-Key header"),
            ));
        };

        let context = authenticate(&state, presented).await?;
        tracing::debug!(
            user_id = %context.user_id,
            key_id = %context.api_key_id,
            "Request authenticated"
        );

        state.recorder.record(context.api_key_id);
        request.extensions_mut().insert(context);

        Ok(next.run(request).await)
    }
}

async fn authenticate(state: &AppState, presented: String) -> Result<AuthContext, AppError> {
    let prefix = key_prefix(&presented).to_string();

    let candidates = state
        .storage
        .get_api_keys_by_prefix(&prefix)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "API key lookup failed");
            AppError::internal(format!("authentication error: {e}"))
        })?;

    // Same response whether the prefix is unknown or the secret is wrong
    let invalid = || {
        tracing::warn!(key_prefix = %prefix, "Invalid API key presented");
        AppError::unauthorized("invalid API key")
    };

    let credentials = state.credentials.clone();
    let matched = tokio::task::spawn_blocking(move || {
        if candidates.is_empty() {
            // Unknown prefixes pay one verification too
            credentials.verify_api_key_decoy(&presented);
            return None;
        }
        candidates
            .into_iter()
            .find(|candidate| credentials.verify_api_key(&presented, &candidate.key_hash))
    })
    .await
    .map_err(|e| AppError::internal(format!("API key verification task failed: {e}")))?;

    let Some(key) = matched else {
        return Err(invalid());
    };

    if is_expired(key.expires_at) {
        tracing::warn!(key_id = %key.id, "Expired API key presented");
        return Err(AppError::unauthorized("API key expired"));
    }

    let user = match state.storage.get_user_by_id(key.user_id).await {
        Ok(user) if user.is_active => user,
        Ok(_) | Err(StorageError::NotFound) => {
            tracing::warn!(user_id = %key.user_id, key_id = %key.id, "API key for inactive user");
            return Err(AppError::unauthorized("user account is inactive"));
        }
        Err(e) => {
            tracing::error!(user_id = %key.user_id, error = %e, "User lookup failed");
            return Err(AppError::internal(format!("authentication error: {e}")));
        }
    };

    Ok(AuthContext {
        user_id: user.id,
        api_key_id: key.id,
        user,
    })
}
