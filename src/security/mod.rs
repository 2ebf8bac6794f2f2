//! Security headers middleware.
//!
//! Adds nosniff, frame, XSS, referrer and content-security headers to
//! every response, plus HSTS on requests that arrived over HTTPS.

mod config;
mod headers;

pub use config::{DEFAULT_CSP, SecurityConfig, SecurityConfigBuilder, XFrameOptions};
pub use headers::{SecurityHeadersLayer, SecurityHeadersService, build_security_headers_layer};
