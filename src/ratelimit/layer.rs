//! Tower layer applying a [`RateLimitStore`] to a route group
//!
//! Every limited response carries `X-RateLimit-Limit`,
//! `X-RateLimit-Remaining` and `X-RateLimit-Reset`. Rejections are 429
//! with `Retry-After`. A failing store lets the request through.

use axum::{
    extract::{ConnectInfo, Request},
    http::{HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

use super::config::Rate;
use super::store::{RateLimitDecision, RateLimitStore};
use crate::auth::ApiKeyExtractor;
use crate::error::{AppError, ErrorContext};

const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// How requests are grouped into buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScope {
    /// Always by client IP, for endpoints reached before identity exists
    Ip,
    /// By presented API key, or client IP when none is presented
    ApiKeyOrIp,
}

/// Tower layer for rate limiting
#[derive(Clone)]
pub struct RateLimitLayer {
    state: RateLimitState,
}

#[derive(Clone)]
struct RateLimitState {
    store: Arc<dyn RateLimitStore>,
    scope: KeyScope,
    trust_proxy: bool,
    message: &'static str,
}

impl RateLimitLayer {
    pub fn new(store: Arc<dyn RateLimitStore>, scope: KeyScope, trust_proxy: bool) -> Self {
        let message = match scope {
            KeyScope::Ip => "Too many requests from this IP address",
            KeyScope::ApiKeyOrIp => "Too many requests",
        };
        Self {
            state: RateLimitState {
                store,
                scope,
                trust_proxy,
                message,
            },
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            state: self.state.clone(),
        }
    }
}

/// Tower service for rate limiting
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    state: RateLimitState,
}

/// Resolve the caller's IP.
///
/// SECURITY: Proxy headers are only consulted when `trust_proxy` is set.
/// Otherwise anyone could pick their own bucket by sending X-Forwarded-For.
pub fn client_ip(request: &Request, trust_proxy: bool) -> String {
    let from_proxy = || {
        let headers = request.headers();
        headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            // The leftmost entry is the original client
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
            })
    };

    let from_socket = || {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
    };

    let ip = if trust_proxy {
        from_proxy().or_else(from_socket)
    } else {
        from_socket()
    };

    ip.unwrap_or_else(|| "unknown".to_string())
}

fn bucket_key(request: &Request, scope: KeyScope, trust_proxy: bool) -> String {
    match scope {
        KeyScope::ApiKeyOrIp => match ApiKeyExtractor::from_headers(request.headers()) {
            Some(key) => format!("key:{key}"),
            None => format!("ip:{}", client_ip(request, trust_proxy)),
        },
        KeyScope::Ip => format!("ip:{}", client_ip(request, trust_proxy)),
    }
}

fn set_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(decision.reset_at.timestamp()));
}

fn rejection(decision: &RateLimitDecision, rate: Rate, message: &str) -> Response {
    let retry_after = decision.retry_after.as_secs().max(1);

    let mut response = AppError::too_many_requests("rate limit exceeded")
        .with_context(
            ErrorContext::new()
                .with_message(message)
                .with_field("retry_after", retry_after)
                .with_field("limit", rate.limit)
                .with_field("period", rate.period_label())
                .with_field("reset_time", decision.reset_at.to_rfc3339()),
        )
        .into_response();

    let headers = response.headers_mut();
    set_headers(headers, decision);
    headers.insert(
        axum::http::header::RETRY_AFTER,
        HeaderValue::from(retry_after),
    );
    response
}

fn is_health_check(path: &str) -> bool {
    path == "/health" || path.starts_with("/health/")
}

impl<S> Service<Request> for RateLimitService<S>
where
    S: Service<Request> + Clone + Send + 'static,
    S::Response: IntoResponse,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        // The ready service handles this request; a fresh clone takes its place
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        if is_health_check(req.uri().path()) {
            return Box::pin(async move { Ok(inner.call(req).await?.into_response()) });
        }

        let state = self.state.clone();
        let key = bucket_key(&req, state.scope, state.trust_proxy);

        Box::pin(async move {
            let decision = match state.store.hit(&key).await {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::error!(error = %e, path = %req.uri().path(), "Rate limit check failed, allowing request");
                    return Ok(inner.call(req).await?.into_response());
                }
            };

            if !decision.allowed {
                tracing::warn!(
                    path = %req.uri().path(),
                    scope = ?state.scope,
                    retry_after = decision.retry_after.as_secs(),
                    "Rate limit exceeded"
                );
                return Ok(rejection(&decision, state.store.rate(), state.message));
            }

            let mut response = inner.call(req).await?.into_response();
            set_headers(response.headers_mut(), &decision);
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::store::{GovernorStore, RateLimitStoreError};
    use async_trait::async_trait;
    use axum::{Router, body::Body, http::StatusCode, routing::get};
    use tower::ServiceExt;

    struct BrokenStore;

    #[async_trait]
    impl RateLimitStore for BrokenStore {
        fn rate(&self) -> Rate {
            Rate::per_minute(1)
        }

        async fn hit(&self, _key: &str) -> Result<RateLimitDecision, RateLimitStoreError> {
            Err(RateLimitStoreError("backend down".into()))
        }
    }

    fn router(store: Arc<dyn RateLimitStore>, scope: KeyScope, trust_proxy: bool) -> Router {
        Router::new()
            .route("/limited", get(|| async { "ok" }))
            .route("/health", get(|| async { "healthy" }))
            .layer(RateLimitLayer::new(store, scope, trust_proxy))
    }

    fn request(uri: &str, headers: &[(&str, &str)]) -> Request {
        let mut builder = Request::get(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_sets_rate_limit_headers() {
        let store = Arc::new(GovernorStore::new(Rate::per_minute(3)).unwrap());
        let response = router(store, KeyScope::ApiKeyOrIp, false)
            .oneshot(request("/limited", &[("x-api-key", "k1")]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "3");
        assert!(response.headers().contains_key("x-ratelimit-remaining"));
        assert!(response.headers().contains_key("x-ratelimit-reset"));
    }

    #[tokio::test]
    async fn test_rejects_with_retry_after_and_body() {
        let app = router(
            Arc::new(GovernorStore::new(Rate::per_minute(2)).unwrap()),
            KeyScope::ApiKeyOrIp,
            false,
        );

        for _ in 0..2 {
            let response = app.clone().oneshot(request("/limited", &[("x-api-key", "k1")])).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .clone()
            .oneshot(request("/limited", &[("x-api-key", "k1")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let retry_after: u64 = response.headers()["retry-after"].to_str().unwrap().parse().unwrap();
        assert!(retry_after >= 1);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "rate limit exceeded");
        assert_eq!(body["limit"], 2);
        assert_eq!(body["period"], "1m0s");
        assert_eq!(body["retry_after"], retry_after);
        assert!(body["reset_time"].is_string());

        // A different key has its own bucket
        let response = app
            .oneshot(request("/limited", &[("x-api-key", "k2")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ip_scope_ignores_api_key() {
        let app = router(
            Arc::new(GovernorStore::new(Rate::per_minute(1)).unwrap()),
            KeyScope::Ip,
            false,
        );

        let first = app.clone().oneshot(request("/limited", &[("x-api-key", "a")])).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(request("/limited", &[("x-api-key", "b")])).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_fails_open_when_store_errors() {
        let response = router(Arc::new(BrokenStore), KeyScope::Ip, false)
            .oneshot(request("/limited", &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key("x-ratelimit-limit"));
    }

    #[tokio::test]
    async fn test_health_is_never_limited() {
        let app = router(
            Arc::new(GovernorStore::new(Rate::per_minute(1)).unwrap()),
            KeyScope::Ip,
            false,
        );
        for _ in 0..3 {
            let response = app.clone().oneshot(request("/health", &[])).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[test]
    fn test_proxy_headers_ignored_unless_trusted() {
        let req = request("/", &[("x-forwarded-for", "203.0.113.9, 10.0.0.1")]);
        assert_eq!(client_ip(&req, false), "unknown");
        assert_eq!(client_ip(&req, true), "203.0.113.9");

        let req = request("/", &[("x-real-ip", "198.51.100.4")]);
        assert_eq!(client_ip(&req, true), "198.51.100.4");
    }

    #[test]
    fn test_socket_address_is_used_by_default() {
        let mut req = request("/", &[("x-forwarded-for", "203.0.113.9")]);
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000))));
        assert_eq!(client_ip(&req, false), "192.0.2.1");
    }
}
