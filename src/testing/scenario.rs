//! Fluent HTTP testing against the in-process router
//!
//! ```rust,ignore
//! use hostbus::testing::{self, fixtures};
//!
//! #[tokio::test]
//! async fn viewer_cannot_delete_hosts() {
//!     let state = fixtures::test_state();
//!     let tenant = fixtures::TestTenant::create(&state).await;
//!     let viewer = tenant.member(&state, Role::Viewer).await;
//!     let app = App::new(state).unwrap().router();
//!
//!     testing::delete(app, "/api/v1/hosts/web-01")
//!         .api_key(&viewer.api_key)
//!         .csrf("token")
//!         .execute()
//!         .await
//!         .assert_forbidden();
//! }
//! ```

use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{HeaderValue, Method, Request, StatusCode, header},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tower::ServiceExt;

use crate::auth::API_KEY_HEADER;
use crate::csrf::{CSRF_COOKIE, CSRF_HEADER};

/// Test scenario builder for endpoint testing
pub struct Scenario {
    app: Router,
    request: Request<Body>,
}

impl Scenario {
    /// Create a new test scenario with the given app
    pub fn new(app: Router) -> Self {
        Self {
            app,
            request: Request::builder()
                .method(Method::GET)
                .uri("/")
                .body(Body::empty())
                .unwrap(),
        }
    }

    /// Set the HTTP method
    pub fn method(mut self, method: Method) -> Self {
        *self.request.method_mut() = method;
        self
    }

    /// Set the request URI
    pub fn uri(mut self, uri: &str) -> Self {
        *self.request.uri_mut() = uri.parse().unwrap();
        self
    }

    /// Add a request header
    pub fn header(mut self, key: &str, value: &str) -> Self {
        let name: header::HeaderName = key.parse().unwrap();
        self.request
            .headers_mut()
            .append(name, HeaderValue::from_str(value).unwrap());
        self
    }

    /// Authenticate with `X-API-Key`
    pub fn api_key(self, key: &str) -> Self {
        self.header(API_KEY_HEADER, key)
    }

    /// Authenticate with `Authorization: Bearer`
    pub fn bearer_token(self, token: &str) -> Self {
        self.header("authorization", &format!("Bearer {}", token))
    }

    pub fn cookie(self, name: &str, value: &str) -> Self {
        self.header("cookie", &format!("{}={}", name, value))
    }

    /// Send a matching CSRF cookie and header
    pub fn csrf(self, token: &str) -> Self {
        self.cookie(CSRF_COOKIE, token).header(CSRF_HEADER, token)
    }

    /// Pretend the request came from `addr`, as the real server records it
    pub fn from_addr(mut self, addr: SocketAddr) -> Self {
        self.request.extensions_mut().insert(ConnectInfo(addr));
        self
    }

    /// Set a JSON body
    pub fn json_body<T: Serialize>(mut self, body: &T) -> Self {
        let json = serde_json::to_vec(body).unwrap();
        *self.request.body_mut() = Body::from(json);
        self.request.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self
    }

    /// Set a raw body with its declared length
    pub fn bytes_body(mut self, body: Vec<u8>) -> Self {
        self.request
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        *self.request.body_mut() = Body::from(body);
        self
    }

    /// Execute the request and return the response for assertions
    pub async fn execute(self) -> ScenarioAssert {
        let response = self.app.oneshot(self.request).await.unwrap();
        ScenarioAssert { response }
    }
}

/// Assertion builder for test responses
pub struct ScenarioAssert {
    response: axum::response::Response,
}

impl ScenarioAssert {
    /// Assert the response status code
    pub fn assert_status(self, expected: StatusCode) -> Self {
        assert_eq!(
            self.response.status(),
            expected,
            "Expected status {}, got {}",
            expected,
            self.response.status()
        );
        self
    }

    pub fn assert_ok(self) -> Self {
        self.assert_status(StatusCode::OK)
    }

    pub fn assert_created(self) -> Self {
        self.assert_status(StatusCode::CREATED)
    }

    pub fn assert_no_content(self) -> Self {
        self.assert_status(StatusCode::NO_CONTENT)
    }

    pub fn assert_bad_request(self) -> Self {
        self.assert_status(StatusCode::BAD_REQUEST)
    }

    pub fn assert_unauthorized(self) -> Self {
        self.assert_status(StatusCode::UNAUTHORIZED)
    }

    pub fn assert_forbidden(self) -> Self {
        self.assert_status(StatusCode::FORBIDDEN)
    }

    pub fn assert_not_found(self) -> Self {
        self.assert_status(StatusCode::NOT_FOUND)
    }

    pub fn assert_conflict(self) -> Self {
        self.assert_status(StatusCode::CONFLICT)
    }

    pub fn assert_too_many_requests(self) -> Self {
        self.assert_status(StatusCode::TOO_MANY_REQUESTS)
    }

    /// Assert a header exists with the given value
    pub fn assert_header(self, key: &str, expected: &str) -> Self {
        let value = self
            .header_value(key)
            .unwrap_or_else(|| panic!("Header '{}' not found", key));
        assert_eq!(value, expected, "Header '{}' value mismatch", key);
        self
    }

    pub fn header_value(&self, key: &str) -> Option<String> {
        self.response
            .headers()
            .get(key)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }

    /// Value of the cookie named `name` in any `Set-Cookie` header
    pub fn set_cookie(&self, name: &str) -> Option<String> {
        self.response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| cookie::Cookie::parse(value.to_string()).ok())
            .find(|cookie| cookie.name() == name)
            .map(|cookie| cookie.value().to_string())
    }

    /// Get the response body as bytes
    pub async fn body_bytes(self) -> Vec<u8> {
        axum::body::to_bytes(self.response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    /// Parse the JSON response body into a type
    pub async fn json<T: for<'de> Deserialize<'de>>(self) -> T {
        let bytes = self.body_bytes().await;
        serde_json::from_slice(&bytes).expect("Failed to parse JSON response")
    }

    /// Assert JSON field equals a value, using dot paths like `hosts.0.host_id`
    pub async fn assert_json_field(self, path: &str, expected: serde_json::Value) -> Self {
        let status = self.response.status();
        let bytes = axum::body::to_bytes(self.response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        let actual =
            json_path_get(&json, path).unwrap_or_else(|| panic!("Path '{}' not found in {}", path, json));

        assert_eq!(actual, &expected, "JSON path '{}' value mismatch", path);

        let mut response = axum::response::Response::new(Body::from(bytes));
        *response.status_mut() = status;
        Self { response }
    }

    /// Get the underlying response for custom assertions
    pub fn response(self) -> axum::response::Response {
        self.response
    }
}

fn json_path_get<'a>(json: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = json;

    for part in path.split('.') {
        if let Ok(index) = part.parse::<usize>() {
            current = current.get(index)?;
        } else {
            current = current.get(part)?;
        }
    }

    Some(current)
}

/// Convenience function to create a GET request scenario
pub fn get(app: Router, uri: &str) -> Scenario {
    Scenario::new(app).method(Method::GET).uri(uri)
}

/// Convenience function to create a POST request scenario
pub fn post(app: Router, uri: &str) -> Scenario {
    Scenario::new(app).method(Method::POST).uri(uri)
}

/// Convenience function to create a PUT request scenario
pub fn put(app: Router, uri: &str) -> Scenario {
    Scenario::new(app).method(Method::PUT).uri(uri)
}

/// Convenience function to create a DELETE request scenario
pub fn delete(app: Router, uri: &str) -> Scenario {
    Scenario::new(app).method(Method::DELETE).uri(uri)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, routing};
    use serde_json::json;

    #[tokio::test]
    async fn test_api_key_and_csrf_helpers_set_headers() {
        let app = Router::new().route(
            "/echo",
            routing::get(|headers: axum::http::HeaderMap| async move {
                Json(json!({
                    "key": headers.get("x-api-key").and_then(|v| v.to_str().ok()),
                    "csrf": headers.get("x-csrf-token").and_then(|v| v.to_str().ok()),
                    "cookie": headers.get("cookie").and_then(|v| v.to_str().ok()),
                }))
            }),
        );

        get(app, "/echo")
            .api_key("abc")
            .csrf("tok")
            .execute()
            .await
            .assert_ok()
            .assert_json_field("key", json!("abc"))
            .await
            .assert_json_field("csrf", json!("tok"))
            .await
            .assert_json_field("cookie", json!("csrf_token=tok"))
            .await;
    }

    #[test]
    fn test_json_path() {
        let value = json!({"hosts": [{"host_id": "a"}]});
        assert_eq!(json_path_get(&value, "hosts.0.host_id"), Some(&json!("a")));
        assert_eq!(json_path_get(&value, "hosts.1"), None);
    }
}
