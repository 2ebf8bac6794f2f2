use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, HeaderValue, Method, header, request::Parts},
    middleware::Next,
    response::Response,
};
use cookie::{Cookie, SameSite};
use std::future::Future;
use std::sync::Arc;

use super::config::{CSRF_COOKIE, CSRF_HEADER, CsrfConfig, TOKEN_BYTES};
use crate::credentials::{constant_time_eq, random_token};
use crate::error::AppError;

/// The CSRF token in effect for the current request
///
/// Available to handlers on every route behind [`IssueCsrfToken`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken(pub String);

impl<S> FromRequestParts<S> for CsrfToken
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
            .get::<CsrfToken>()
            .cloned()
            .ok_or_else(|| AppError::internal("CSRF token requested on a route without IssueCsrfToken"));
        async move { result }
    }
}

/// Anything other than a pure read must carry a token
pub fn is_state_changing(method: &Method) -> bool {
    !matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

/// Read the token cookie, ignoring empty values
pub fn cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(|cookie| cookie.ok())
        .find(|cookie| cookie.name() == CSRF_COOKIE && !cookie.value().is_empty())
        .map(|cookie| cookie.value().to_string())
}

fn header_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|token| !token.is_empty())
}

fn build_cookie(config: &CsrfConfig, token: String) -> Cookie<'static> {
    Cookie::build((CSRF_COOKIE, token))
        .path("/")
        .http_only(false)
        .secure(config.secure_cookie)
        .same_site(SameSite::Lax)
        .max_age(cookie::time::Duration::seconds(
            i64::try_from(config.max_age_seconds).unwrap_or(i64::MAX),
        ))
        .build()
}

/// Sets the `csrf_token` cookie on every response.
///
/// An existing cookie is reused so concurrent tabs keep a working token.
pub struct IssueCsrfToken;

impl IssueCsrfToken {
    pub async fn middleware(
        State(config): State<Arc<CsrfConfig>>,
        mut request: Request,
        next: Next,
    ) -> Result<Response, AppError> {
        let token = match cookie_token(request.headers()) {
            Some(token) => token,
            None => random_token(TOKEN_BYTES)?,
        };
        request.extensions_mut().insert(CsrfToken(token.clone()));

        let mut response = next.run(request).await;

        let cookie = build_cookie(&config, token).to_string();
        let value = HeaderValue::from_str(&cookie)
            .map_err(|e| AppError::internal(format!("invalid CSRF cookie: {e}")))?;
        response.headers_mut().append(header::SET_COOKIE, value);

        Ok(response)
    }
}

/// Double-submit check for state-changing requests.
///
/// The `X-CSRF-Token` header must equal the `csrf_token` cookie. Safe
/// methods and exempt paths pass through.
pub struct VerifyCsrfToken;

impl VerifyCsrfToken {
    pub async fn middleware(
        State(config): State<Arc<CsrfConfig>>,
        request: Request,
        next: Next,
    ) -> Result<Response, AppError> {
        let method = request.method();
        let path = request.uri().path();

        if !is_state_changing(method) || config.is_exempt(path) {
            return Ok(next.run(request).await);
        }

        let Some(provided) = header_token(request.headers()) else {
            tracing::warn!(%method, path, "Missing X-CSRF-Token header for state-changing request");
            return Err(rejected());
        };

        let Some(expected) = cookie_token(request.headers()) else {
            tracing::warn!(%method, path, "Missing CSRF token cookie");
            return Err(rejected());
        };

        if !constant_time_eq(provided, &expected) {
            tracing::warn!(%method, path, "CSRF token mismatch");
            return Err(rejected());
        }

        Ok(next.run(request).await)
    }
}

fn rejected() -> AppError {
    AppError::forbidden("CSRF token validation failed")
}
