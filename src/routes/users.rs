use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    routing::{delete, get, put},
};
use serde::Serialize;
use uuid::Uuid;

use super::{blocking, restrict, storage_error};
use crate::app::AppState;
use crate::auth::{CurrentOrgId, CurrentUserId};
use crate::error::{AppError, ErrorContext, ErrorWithContext};
use crate::models::{CreateUserRequest, NewUser, ParseRoleError, Role, UpdateRoleRequest, User};
use crate::storage::UserStore;
use crate::validation::{ValidatedJson, json_rejection};

const ADMIN: [Role; 1] = [Role::Admin];

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/users",
            restrict(get(list_users).post(create_user), ADMIN),
        )
        .route(
            "/api/v1/users/{user_id}",
            restrict(delete(delete_user), ADMIN),
        )
        .route(
            "/api/v1/users/{user_id}/role",
            restrict(put(update_role), ADMIN),
        )
}

#[derive(Debug, Serialize)]
pub struct UserList {
    pub users: Vec<User>,
    pub total: usize,
}

fn parse_user_id(raw: &str) -> Result<Uuid, AppError> {
    raw.parse().map_err(|_| AppError::not_found("user not found"))
}

pub async fn list_users(
    State(state): State<AppState>,
    CurrentOrgId(org_id): CurrentOrgId,
) -> Result<Json<UserList>, AppError> {
    let users = state.storage.list_users_by_organization(org_id).await?;
    let total = users.len();
    Ok(Json(UserList { users, total }))
}

/// Add a user to the caller's organization
pub async fn create_user(
    State(state): State<AppState>,
    CurrentOrgId(org_id): CurrentOrgId,
    ValidatedJson(req): ValidatedJson<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), ErrorWithContext> {
    let credentials = state.credentials.clone();
    let password = req.password;
    let password_hash = blocking(move || credentials.hash_password(&password))
        .await?
        .map_err(AppError::from)?;

    let user = state
        .storage
        .create_user(NewUser {
            username: req.username,
            email: req.email,
            password_hash,
            org_id,
            role: req.role,
        })
        .await
        .map_err(AppError::from)?;

    tracing::info!(user_id = %user.id, org_id = %org_id, role = %user.role, "User created");
    Ok((StatusCode::CREATED, Json(user)))
}

/// Change a member's role. Admins cannot demote themselves.
pub async fn update_role(
    State(state): State<AppState>,
    CurrentOrgId(org_id): CurrentOrgId,
    CurrentUserId(caller): CurrentUserId,
    Path(user_id): Path<String>,
    payload: Result<Json<UpdateRoleRequest>, JsonRejection>,
) -> Result<Json<User>, ErrorWithContext> {
    let user_id = parse_user_id(&user_id)?;
    let Json(req) = payload.map_err(json_rejection)?;
    let role: Role = req.role.parse().map_err(|e: ParseRoleError| {
        AppError::bad_request("invalid role").with_context(
            ErrorContext::new()
                .with_message(e.to_string())
                .with_field("valid_roles", Role::ALL),
        )
    })?;

    if user_id == caller && role != Role::Admin {
        tracing::warn!(user_id = %caller, "Admin attempted to demote themselves");
        return Err(AppError::forbidden("cannot change your own role").into());
    }

    let user = state
        .storage
        .update_user_role(user_id, org_id, role)
        .await
        .map_err(storage_error("user"))?;

    tracing::info!(user_id = %user.id, org_id = %org_id, role = %role, changed_by = %caller, "User role updated");
    Ok(Json(user))
}

/// Remove a member and every key they own. Admins cannot delete themselves.
pub async fn delete_user(
    State(state): State<AppState>,
    CurrentOrgId(org_id): CurrentOrgId,
    CurrentUserId(caller): CurrentUserId,
    Path(user_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let user_id = parse_user_id(&user_id)?;

    if user_id == caller {
        tracing::warn!(user_id = %caller, "Admin attempted to delete themselves");
        return Err(AppError::forbidden("cannot delete your own account"));
    }

    state
        .storage
        .delete_user(user_id, org_id)
        .await
        .map_err(storage_error("user"))?;

    tracing::info!(user_id = %user_id, org_id = %org_id, deleted_by = %caller, "User deleted");
    Ok(StatusCode::NO_CONTENT)
}
