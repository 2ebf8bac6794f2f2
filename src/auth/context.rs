//! Request-scoped identity published by the authentication and
//! tenant/role stages, and the extractors handlers use to read it.

use axum::{
    extract::{FromRequestParts, Request},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use std::future::Future;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Role, User};

/// Identity resolved by the authentication stage
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub api_key_id: Uuid,
    pub user: User,
}

/// Tenant and role published by [`OrgContextStage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrgContext {
    pub org_id: Uuid,
    pub role: Role,
}

/// Derives the caller's organization and role from the authenticated user.
///
/// Must run after authentication. When it doesn't, the request is rejected
/// with 401 and the misconfiguration is logged as an error.
pub struct OrgContextStage;

impl OrgContextStage {
    pub async fn middleware(mut request: Request, next: Next) -> Result<Response, AppError> {
        let Some(auth) = request.extensions().get::<AuthContext>() else {
            tracing::error!(
                path = %request.uri().path(),
                "Organization context requested before authentication; check middleware order"
            );
            return Err(AppError::unauthorized("unauthorized"));
        };

        let context = OrgContext {
            org_id: auth.user.org_id,
            role: auth.user.role,
        };
        request.extensions_mut().insert(context);

        Ok(next.run(request).await)
    }
}

fn missing(what: &str) -> AppError {
    tracing::warn!(missing = what, "Handler reached without identity context");
    AppError::unauthorized("unauthorized")
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let result = parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(|| missing("auth"));
        async move { result }
    }
}

impl<S> FromRequestParts<S> for OrgContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let result = parts
            .extensions
            .get::<OrgContext>()
            .copied()
            .ok_or_else(|| missing("org"));
        async move { result }
    }
}

/// The authenticated user's record
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// The authenticated user's id
#[derive(Debug, Clone, Copy)]
pub struct CurrentUserId(pub Uuid);

/// The caller's organization id
#[derive(Debug, Clone, Copy)]
pub struct CurrentOrgId(pub Uuid);

/// The caller's role within their organization
#[derive(Debug, Clone, Copy)]
pub struct CurrentRole(pub Role);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let auth = AuthContext::from_request_parts(parts, state);
        async move { Ok(CurrentUser(auth.await?.user)) }
    }
}

impl<S> FromRequestParts<S> for CurrentUserId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let auth = AuthContext::from_request_parts(parts, state);
        async move { Ok(CurrentUserId(auth.await?.user_id)) }
    }
}

impl<S> FromRequestParts<S> for CurrentOrgId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let org = OrgContext::from_request_parts(parts, state);
        async move { Ok(CurrentOrgId(org.await?.org_id)) }
    }
}

impl<S> FromRequestParts<S> for CurrentRole
where
    S: Send + Sync,
{
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let org = OrgContext::from_request_parts(parts, state);
        async move { Ok(CurrentRole(org.await?.role)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::StatusCode, routing::get};
    use chrono::Utc;
    use tower::ServiceExt;

    fn user(role: Role) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            password_hash: String::new(),
            is_active: true,
            org_id: Uuid::new_v4(),
            role,
            created_at: now,
            updated_at: now,
        }
    }

    async fn whoami(CurrentOrgId(org_id): CurrentOrgId, CurrentRole(role): CurrentRole) -> String {
        format!("{org_id}:{role}")
    }

    fn router() -> Router {
        Router::new()
            .route("/", get(whoami))
            .layer(axum::middleware::from_fn(OrgContextStage::middleware))
    }

    #[tokio::test]
    async fn publishes_org_and_role_from_the_user() {
        let user = user(Role::Editor);
        let expected = format!("{}:editor", user.org_id);

        let mut request = Request::builder().uri("/").body(Body::empty()).unwrap();
        request.extensions_mut().insert(AuthContext {
            user_id: user.id,
            api_key_id: Uuid::new_v4(),
            user,
        });

        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body, expected.as_bytes());
    }

    #[tokio::test]
    async fn fails_closed_without_authentication() {
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn extractors_reject_without_context() {
        let app = Router::new().route("/", get(|CurrentUserId(id): CurrentUserId| async move { id.to_string() }));
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
