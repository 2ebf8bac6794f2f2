use serde::{Deserialize, Serialize};

use crate::utils::get_env_with_prefix;

/// Content-Security-Policy sent when `CONTENT_SECURITY_POLICY` is unset
pub const DEFAULT_CSP: &str = "default-src 'self'; script-src 'self' 'unsafe-inline'; \
style-src 'self' 'unsafe-inline'; img-src 'self' data: https:; font-src 'self'; \
connect-src 'self'; frame-ancestors 'none';";

/// X-Frame-Options header value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum XFrameOptions {
    /// DENY - Don't allow framing at all
    #[default]
    Deny,
    /// SAMEORIGIN - Allow framing from same origin
    SameOrigin,
}

impl XFrameOptions {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deny => "DENY",
            Self::SameOrigin => "SAMEORIGIN",
        }
    }
}

/// Response security headers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecurityConfig {
    /// Whether security headers are enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Strict-Transport-Security max age in seconds. 0 disables HSTS.
    #[serde(default = "default_hsts_max_age")]
    pub hsts_max_age: u64,

    #[serde(default = "default_true")]
    pub hsts_include_subdomains: bool,

    #[serde(default = "default_true")]
    pub hsts_preload: bool,

    /// Send HSTS only on requests that arrived over HTTPS
    /// (`X-Forwarded-Proto: https` behind a terminating proxy)
    #[serde(default = "default_true")]
    pub hsts_https_only: bool,

    #[serde(default)]
    pub x_frame_options: XFrameOptions,

    /// Content-Security-Policy header value. `None` omits the header.
    #[serde(default = "default_csp")]
    pub content_security_policy: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            hsts_max_age: default_hsts_max_age(),
            hsts_include_subdomains: true,
            hsts_preload: true,
            hsts_https_only: true,
            x_frame_options: XFrameOptions::default(),
            content_security_policy: default_csp(),
        }
    }
}

impl SecurityConfig {
    /// Create a new SecurityConfig builder
    pub fn builder() -> SecurityConfigBuilder {
        SecurityConfigBuilder::new()
    }

    /// Load from `CONTENT_SECURITY_POLICY`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(csp) = get_env_with_prefix("CONTENT_SECURITY_POLICY") {
            config.content_security_policy = Some(csp);
        }

        config
    }

    /// The full Strict-Transport-Security value, if HSTS is on
    pub fn hsts_value(&self) -> Option<String> {
        if self.hsts_max_age == 0 {
            return None;
        }

        let mut value = format!("max-age={}", self.hsts_max_age);
        if self.hsts_include_subdomains {
            value.push_str("; includeSubDomains");
        }
        if self.hsts_preload {
            value.push_str("; preload");
        }
        Some(value)
    }
}

/// Builder for SecurityConfig
#[must_use = "builder does nothing until you call build()"]
pub struct SecurityConfigBuilder {
    config: SecurityConfig,
}

impl SecurityConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SecurityConfig::default(),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn hsts_max_age(mut self, seconds: u64) -> Self {
        self.config.hsts_max_age = seconds;
        self
    }

    pub fn hsts_https_only(mut self, https_only: bool) -> Self {
        self.config.hsts_https_only = https_only;
        self
    }

    pub fn x_frame_options(mut self, options: XFrameOptions) -> Self {
        self.config.x_frame_options = options;
        self
    }

    pub fn content_security_policy(mut self, csp: Option<String>) -> Self {
        self.config.content_security_policy = csp;
        self
    }

    pub fn build(self) -> SecurityConfig {
        self.config
    }
}

impl Default for SecurityConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn default_enabled() -> bool {
    true
}

fn default_true() -> bool {
    true
}

fn default_hsts_max_age() -> u64 {
    31536000 // 1 year
}

fn default_csp() -> Option<String> {
    Some(DEFAULT_CSP.to_string())
}
