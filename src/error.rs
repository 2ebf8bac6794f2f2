use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::storage::StorageError;

/// The main error type for hostbus handlers and middleware
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Too many requests: {0}")]
    TooManyRequests(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Extra fields attached to an error body so the caller can self-correct
///
/// Fields are flattened into the top level of the JSON body, next to
/// `error` and `message`.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub message: Option<String>,
    pub fields: Map<String, Value>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.fields.insert(key.into(), value);
        self
    }
}

/// Error with attached context
#[derive(Debug)]
pub struct ErrorWithContext {
    error: AppError,
    context: ErrorContext,
}

impl ErrorWithContext {
    pub fn new(error: AppError, context: ErrorContext) -> Self {
        Self { error, context }
    }

    pub fn error(&self) -> &AppError {
        &self.error
    }

    pub fn context(&self) -> &ErrorContext {
        &self.context
    }
}

impl std::fmt::Display for ErrorWithContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)?;
        if let Some(ref message) = self.context.message {
            write!(f, " ({})", message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorWithContext {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<ErrorWithContext> for AppError {
    fn from(err: ErrorWithContext) -> Self {
        err.error
    }
}

impl From<AppError> for ErrorWithContext {
    fn from(error: AppError) -> Self {
        Self::new(error, ErrorContext::default())
    }
}

impl IntoResponse for ErrorWithContext {
    fn into_response(self) -> Response {
        self.error.into_response_with_context(Some(self.context))
    }
}

/// JSON body of every error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_id: Option<String>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn payload_too_large(msg: impl Into<String>) -> Self {
        Self::PayloadTooLarge(msg.into())
    }

    pub fn too_many_requests(msg: impl Into<String>) -> Self {
        Self::TooManyRequests(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    /// Attach caller-facing context to this error
    ///
    /// ```rust
    /// use hostbus::{AppError, ErrorContext};
    ///
    /// let err = AppError::forbidden("insufficient role").with_context(
    ///     ErrorContext::new()
    ///         .with_message("Your role does not have permission to access this resource")
    ///         .with_field("your_role", "viewer"),
    /// );
    /// assert_eq!(err.context().fields["your_role"], "viewer");
    /// ```
    pub fn with_context(self, context: ErrorContext) -> ErrorWithContext {
        ErrorWithContext::new(self, context)
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) | Self::Database(_) | Self::Anyhow(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Message that is safe to show to the caller.
    ///
    /// Client errors echo their message. Server errors are replaced with a
    /// generic string; the details only reach the logs.
    fn safe_message(&self) -> String {
        match self {
            Self::NotFound(msg)
            | Self::BadRequest(msg)
            | Self::Unauthorized(msg)
            | Self::Forbidden(msg)
            | Self::Conflict(msg)
            | Self::PayloadTooLarge(msg)
            | Self::TooManyRequests(msg) => msg.clone(),
            Self::Internal(_) | Self::Anyhow(_) => "internal server error".to_string(),
            Self::Database(_) => "database error".to_string(),
            Self::ServiceUnavailable(_) => "service unavailable".to_string(),
        }
    }

    pub fn into_response_with_context(self, context: Option<ErrorContext>) -> Response {
        let status = self.status_code();
        let context = context.unwrap_or_default();

        let mut body = ErrorResponse {
            error: self.safe_message(),
            message: context.message,
            error_id: None,
            fields: context.fields,
        };

        if status.is_server_error() {
            let error_id = uuid::Uuid::new_v4().to_string();
            tracing::error!(
                status = status.as_u16(),
                error_id = %error_id,
                error = %self,
                "Request failed"
            );
            body.error_id = Some(error_id);
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "Request rejected");
        }

        (status, Json(body)).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.into_response_with_context(None)
    }
}

/// Result type alias for hostbus handlers
pub type Result<T> = std::result::Result<T, AppError>;

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            AppError::BadRequest(format!("invalid JSON payload: {}", err))
        } else {
            AppError::Internal(format!("JSON serialization error: {}", err))
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => AppError::NotFound("not found".to_string()),
            StorageError::Conflict(msg) => AppError::Conflict(msg),
            StorageError::Backend(msg) => AppError::Database(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn client_errors_echo_their_message() {
        let response = AppError::unauthorized("invalid API key").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = body_json(response).await;
        assert_eq!(body["error"], "invalid API key");
        assert!(body.get("error_id").is_none());
    }

    #[tokio::test]
    async fn server_errors_hide_details() {
        let response = AppError::internal("argon2 exploded: secret detail").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["error"], "internal server error");
        assert!(body["error_id"].is_string());
        assert!(!body.to_string().contains("secret detail"));
    }

    #[tokio::test]
    async fn context_fields_are_flattened() {
        let response = AppError::forbidden("insufficient role")
            .with_context(
                ErrorContext::new()
                    .with_message("nope")
                    .with_field("required_roles", ["editor", "admin"])
                    .with_field("your_role", "viewer"),
            )
            .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body = body_json(response).await;
        assert_eq!(body["error"], "insufficient role");
        assert_eq!(body["message"], "nope");
        assert_eq!(body["required_roles"], serde_json::json!(["editor", "admin"]));
        assert_eq!(body["your_role"], "viewer");
    }

    #[test]
    fn storage_errors_map_to_distinct_statuses() {
        assert_eq!(
            AppError::from(StorageError::NotFound).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(StorageError::Conflict("host owned elsewhere".into())).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(StorageError::Backend("pool timeout".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn json_syntax_errors_are_bad_requests() {
        let err = serde_json::from_str::<Value>("{not json").unwrap_err();
        assert!(matches!(AppError::from(err), AppError::BadRequest(_)));
    }
}
