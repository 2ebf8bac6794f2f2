//! Role-based access control.
//!
//! Roles are flat. A route admits exactly the roles it lists.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use super::context::OrgContext;
use crate::error::{AppError, ErrorContext, ErrorWithContext};
use crate::models::Role;

/// Middleware admitting callers whose role is one of `allowed`
///
/// Runs after authentication and the organization context stage.
///
/// ```rust,ignore
/// let admin = Router::new()
///     .route("/users", get(list_users))
///     .layer(axum::middleware::from_fn_with_state(
///         RequireRole::any([Role::Admin]),
///         RequireRole::middleware,
///     ));
/// ```
#[derive(Debug, Clone)]
pub struct RequireRole {
    allowed: Arc<[Role]>,
}

impl RequireRole {
    pub fn any(roles: impl IntoIterator<Item = Role>) -> Self {
        let mut allowed: Vec<Role> = Vec::new();
        for role in roles {
            if !allowed.contains(&role) {
                allowed.push(role);
            }
        }
        Self {
            allowed: allowed.into(),
        }
    }

    pub fn allowed(&self) -> &[Role] {
        &self.allowed
    }

    pub fn admits(&self, role: Role) -> bool {
        self.allowed.contains(&role)
    }

    pub async fn middleware(
        State(required): State<RequireRole>,
        request: Request,
        next: Next,
    ) -> Result<Response, ErrorWithContext> {
        let Some(context) = request.extensions().get::<OrgContext>().copied() else {
            tracing::error!(
                path = %request.uri().path(),
                "Role check reached without identity context; check middleware order"
            );
            return Err(AppError::unauthorized("unauthorized").with_context(
                ErrorContext::new().with_message(
                    "User not found in context. Ensure RequireApiKey is applied before RequireRole.",
                ),
            ));
        };

        if !required.admits(context.role) {
            tracing::warn!(
                path = %request.uri().path(),
                role = %context.role,
                org_id = %context.org_id,
                "Insufficient role"
            );
            return Err(AppError::forbidden("insufficient role").with_context(
                ErrorContext::new()
                    .with_message("Your role does not have permission to access this resource")
                    .with_field("required_roles", required.allowed())
                    .with_field("your_role", context.role),
            ));
        }

        Ok(next.run(request).await)
    }
}
