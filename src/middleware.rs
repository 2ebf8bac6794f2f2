use axum::{
    body::Body,
    extract::{Request, State},
    http::{Method, header},
    middleware::Next,
    response::Response,
};
use http_body_util::Limited;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::error::{AppError, ErrorContext, ErrorWithContext};
use crate::utils::get_env_with_prefix;

/// Generates a UUID v4 `x-request-id` for requests that arrive without one
#[derive(Clone, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let request_id = Uuid::new_v4().to_string().parse().ok()?;
        Some(RequestId::new(request_id))
    }
}

pub const INGEST_PATH: &str = "/api/v1/ingest";

/// Maximum request body sizes, in bytes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLimits {
    #[serde(default = "default_get")]
    pub get: usize,

    /// POST, PUT, PATCH and any other method
    #[serde(default = "default_post")]
    pub post: usize,

    /// The ingest endpoint, whatever the method
    #[serde(default = "default_ingest")]
    pub ingest: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            get: default_get(),
            post: default_post(),
            ingest: default_ingest(),
        }
    }
}

impl RequestLimits {
    /// Load from `MAX_REQUEST_SIZE_GET`, `MAX_REQUEST_SIZE_POST` and
    /// `MAX_REQUEST_SIZE_INGEST`.
    pub fn from_env() -> Result<Self, Vec<String>> {
        let mut limits = Self::default();
        let mut errors = Vec::new();

        for (key, target) in [
            ("MAX_REQUEST_SIZE_GET", &mut limits.get),
            ("MAX_REQUEST_SIZE_POST", &mut limits.post),
            ("MAX_REQUEST_SIZE_INGEST", &mut limits.ingest),
        ] {
            if let Some(value) = get_env_with_prefix(key) {
                match value.parse() {
                    Ok(bytes) => *target = bytes,
                    Err(_) => errors.push(format!("{key}: expected a size in bytes, got '{value}'")),
                }
            }
        }

        if errors.is_empty() { Ok(limits) } else { Err(errors) }
    }

    /// Problems with the configured sizes
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (name, value) in [("GET", self.get), ("POST", self.post), ("ingest", self.ingest)] {
            if value == 0 {
                errors.push(format!("{name} request size limit must be positive"));
            }
        }
        if self.get > self.post {
            errors.push(format!(
                "GET request size limit ({}) must not exceed the POST limit ({})",
                self.get, self.post
            ));
        }
        if self.post > self.ingest {
            errors.push(format!(
                "POST request size limit ({}) must not exceed the ingest limit ({})",
                self.post, self.ingest
            ));
        }

        errors
    }

    /// The limit that applies to a request
    pub fn for_request(&self, method: &Method, path: &str) -> usize {
        if *method == Method::GET {
            self.get
        } else if path == INGEST_PATH {
            self.ingest
        } else {
            self.post
        }
    }
}

fn default_get() -> usize {
    100 * 1024
}

fn default_post() -> usize {
    1024 * 1024
}

fn default_ingest() -> usize {
    10 * 1024 * 1024
}

fn too_large(limit: usize) -> ErrorWithContext {
    AppError::payload_too_large("Request entity too large").with_context(
        ErrorContext::new()
            .with_message("The request body is too large")
            .with_field("limit", limit),
    )
}

/// Rejects bodies above the per-method limit with 413.
///
/// A declared `Content-Length` is checked up front; bodies without one are
/// capped while they stream.
pub async fn limit_request_size(
    State(limits): State<Arc<RequestLimits>>,
    request: Request,
    next: Next,
) -> Result<Response, ErrorWithContext> {
    let limit = limits.for_request(request.method(), request.uri().path());

    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());

    if let Some(length) = declared {
        if length > limit as u64 {
            tracing::warn!(
                method = %request.method(),
                path = %request.uri().path(),
                content_length = length,
                max_allowed = limit,
                "Request size exceeds limit"
            );
            return Err(too_large(limit));
        }
    }

    let (parts, body) = request.into_parts();
    let request = Request::from_parts(parts, Body::new(Limited::new(body, limit)));

    Ok(next.run(request).await)
}
