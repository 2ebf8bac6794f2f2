use serde::{Deserialize, Serialize};

/// Name of the cookie carrying the CSRF token
pub const CSRF_COOKIE: &str = "csrf_token";

/// Header in which clients echo the token
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Random bytes per token; encodes to 32 characters
pub const TOKEN_BYTES: usize = 24;

/// CSRF guard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrfConfig {
    /// Mark the cookie `Secure`. Set in release mode.
    #[serde(default)]
    pub secure_cookie: bool,

    /// Cookie lifetime in seconds
    #[serde(default = "default_max_age")]
    pub max_age_seconds: u64,

    /// Paths that accept state-changing requests without a token
    #[serde(default = "default_exempt_paths")]
    pub exempt_paths: Vec<String>,

    /// Base64 key from `CSRF_AUTH_KEY`. Validated, not used for binding.
    #[serde(default, skip_serializing)]
    pub auth_key: Option<String>,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            secure_cookie: false,
            max_age_seconds: default_max_age(),
            exempt_paths: default_exempt_paths(),
            auth_key: None,
        }
    }
}

impl CsrfConfig {
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|exempt| exempt == path)
    }

    /// Add a path to the exemption list
    pub fn exempt(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        if !self.is_exempt(&path) {
            self.exempt_paths.push(path);
        }
        self
    }
}

fn default_max_age() -> u64 {
    7 * 24 * 60 * 60
}

fn default_exempt_paths() -> Vec<String> {
    vec![
        "/api/v1/auth/login".to_string(),
        "/api/v1/auth/register".to_string(),
        "/api/v1/auth/api-key".to_string(),
    ]
}
