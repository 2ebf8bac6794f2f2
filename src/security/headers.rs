use super::config::SecurityConfig;
use axum::body::Body;
use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue, Response, header},
};
use futures::future::BoxFuture;
use tower::Service;

/// Build a Tower layer that adds security headers to responses
pub fn build_security_headers_layer(config: &SecurityConfig) -> Option<SecurityHeadersLayer> {
    if !config.enabled {
        return None;
    }

    if let Some(ref csp) = config.content_security_policy {
        tracing::info!(csp_policy = %csp, "Security headers enabled");
    }

    Some(SecurityHeadersLayer {
        config: config.clone(),
    })
}

/// Tower layer that adds security headers
#[derive(Clone)]
pub struct SecurityHeadersLayer {
    config: SecurityConfig,
}

impl<S> tower::Layer<S> for SecurityHeadersLayer {
    type Service = SecurityHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecurityHeadersService {
            inner,
            config: self.config.clone(),
        }
    }
}

/// Tower service that adds security headers
#[derive(Clone)]
pub struct SecurityHeadersService<S> {
    inner: S,
    config: SecurityConfig,
}

impl<S> Service<Request> for SecurityHeadersService<S>
where
    S: Service<Request, Response = Response<Body>> + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let config = self.config.clone();
        let https = arrived_over_https(req.headers());
        let fut = self.inner.call(req);

        Box::pin(async move {
            let mut response = fut.await?;
            add_security_headers(response.headers_mut(), &config, https);
            Ok(response)
        })
    }
}

fn arrived_over_https(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|proto| proto.to_ascii_lowercase().starts_with("https"))
}

fn add_security_headers(headers: &mut HeaderMap, config: &SecurityConfig, https: bool) {
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::X_FRAME_OPTIONS,
        HeaderValue::from_static(config.x_frame_options.as_str()),
    );
    headers.insert(
        header::X_XSS_PROTECTION,
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    if let Some(ref csp) = config.content_security_policy {
        match HeaderValue::from_str(csp) {
            Ok(value) => {
                headers.insert(header::CONTENT_SECURITY_POLICY, value);
            }
            Err(_) => tracing::warn!("Content-Security-Policy is not a valid header value"),
        }
    }

    if https || !config.hsts_https_only {
        if let Some(value) = config.hsts_value().and_then(|v| HeaderValue::from_str(&v).ok()) {
            headers.insert(header::STRICT_TRANSPORT_SECURITY, value);
        }
    }
}
