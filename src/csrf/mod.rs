//! Double-submit-cookie CSRF protection.
//!
//! [`IssueCsrfToken`] runs on every route and sets a script-readable
//! `csrf_token` cookie. [`VerifyCsrfToken`] rejects state-changing
//! requests whose `X-CSRF-Token` header doesn't equal that cookie.
//!
//! The token is compared by value only and is not bound to the caller's
//! identity. `CSRF_AUTH_KEY` is validated at startup but not used yet.

mod config;
mod middleware;

pub use config::{CSRF_COOKIE, CSRF_HEADER, CsrfConfig, TOKEN_BYTES};
pub use middleware::{CsrfToken, IssueCsrfToken, VerifyCsrfToken, cookie_token, is_state_changing};
