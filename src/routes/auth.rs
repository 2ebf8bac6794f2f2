use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};

use super::api_keys::issue_key;
use super::{blocking, storage_error};
use crate::app::AppState;
use crate::auth::CurrentUser;
use crate::error::{AppError, ErrorWithContext};
use crate::models::{
    CreateApiKeyResponse, CredentialsKeyRequest, LoginRequest, LoginResponse, RegisterRequest,
    User,
};
use crate::storage::{NewOwner, OrganizationStore, StorageError, UserStore};
use crate::validation::ValidatedJson;

/// Name given to keys issued by a password login
pub const SESSION_KEY_NAME: &str = "Web UI Session";

/// Name given to credential-issued keys when the caller picks none
pub const DEFAULT_KEY_NAME: &str = "API Key";

pub(crate) fn register_routes() -> Router<AppState> {
    Router::new().route("/api/v1/auth/register", post(register))
}

pub(crate) fn login_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/auth/login", post(login))
        .route("/api/v1/auth/api-key", post(issue_key_with_credentials))
}

pub(crate) fn routes() -> Router<AppState> {
    Router::new().route("/api/v1/auth/me", get(me))
}

/// Create an organization and its first user, who becomes its admin
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<(StatusCode, Json<User>), ErrorWithContext> {
    match state.storage.get_user_by_username(&req.username).await {
        Ok(_) => return Err(AppError::conflict("username already exists").into()),
        Err(StorageError::NotFound) => {}
        Err(e) => return Err(AppError::from(e).into()),
    }
    match state.storage.get_user_by_email(&req.email).await {
        Ok(_) => return Err(AppError::conflict("email already exists").into()),
        Err(StorageError::NotFound) => {}
        Err(e) => return Err(AppError::from(e).into()),
    }
    match state.storage.get_organization_by_name(&req.org_name).await {
        Ok(_) => return Err(AppError::conflict("organization name already exists").into()),
        Err(StorageError::NotFound) => {}
        Err(e) => return Err(AppError::from(e).into()),
    }

    let credentials = state.credentials.clone();
    let password = req.password;
    let password_hash = blocking(move || credentials.hash_password(&password))
        .await?
        .map_err(AppError::from)?;

    let (org, user) = state
        .storage
        .register_organization(
            &req.org_name,
            NewOwner {
                username: req.username,
                email: req.email,
                password_hash,
            },
        )
        .await
        .map_err(AppError::from)?;

    tracing::info!(
        user_id = %user.id,
        org_id = %org.id,
        organization = %org.name,
        "Registered organization and admin user"
    );

    Ok((StatusCode::CREATED, Json(user)))
}

/// Exchange a username and password for a fresh session key
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<Json<LoginResponse>, ErrorWithContext> {
    let user = verify_login(&state, req.username, req.password).await?;
    let issued = issue_key(&state, user.id, SESSION_KEY_NAME.to_string(), None).await?;

    tracing::info!(user_id = %user.id, key_id = %issued.id, "User logged in");

    Ok(Json(LoginResponse {
        user,
        token: issued.key,
    }))
}

/// Issue a named API key by presenting username and password.
///
/// Lets agents bootstrap a key without a browser session.
pub async fn issue_key_with_credentials(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CredentialsKeyRequest>,
) -> Result<(StatusCode, Json<CreateApiKeyResponse>), ErrorWithContext> {
    let user = verify_login(&state, req.username, req.password).await?;
    let name = req.name.unwrap_or_else(|| DEFAULT_KEY_NAME.to_string());
    let issued = issue_key(&state, user.id, name, req.expires_at).await?;

    Ok((StatusCode::CREATED, Json(issued)))
}

pub async fn me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}

/// Check a password login.
///
/// Unknown users and wrong passwords get the same answer. Whether an account
/// is inactive is only revealed to callers who know its password.
async fn verify_login(state: &AppState, username: String, password: String) -> Result<User, AppError> {
    let invalid = || AppError::unauthorized("invalid credentials");

    let user = match state.storage.get_user_by_username(&username).await {
        Ok(user) => user,
        Err(StorageError::NotFound) => {
            tracing::warn!(username = %username, "Login for unknown user");
            return Err(invalid());
        }
        Err(e) => return Err(storage_error("user")(e)),
    };

    let credentials = state.credentials.clone();
    let hash = user.password_hash.clone();
    let matches = blocking(move || credentials.check_password(&password, &hash)).await?;
    if !matches {
        tracing::warn!(user_id = %user.id, "Login with wrong password");
        return Err(invalid());
    }

    if !user.is_active {
        tracing::warn!(user_id = %user.id, "Login to inactive account");
        return Err(AppError::unauthorized("account is inactive"));
    }

    Ok(user)
}
