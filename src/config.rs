use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::csrf::CsrfConfig;
use crate::database::DatabaseConfig;
use crate::middleware::RequestLimits;
use crate::ratelimit::RateLimitConfig;
use crate::security::SecurityConfig;
use crate::utils::get_env_with_prefix;

/// Main configuration for the hostbus server
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub csrf: CsrfConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub limits: RequestLimits,
}

/// Runtime mode, from `APP_MODE`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AppMode {
    #[default]
    Debug,
    Release,
    Test,
}

impl AppMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
            Self::Test => "test",
        }
    }

    pub fn is_release(&self) -> bool {
        *self == Self::Release
    }
}

impl fmt::Display for AppMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "release" => Ok(Self::Release),
            "test" => Ok(Self::Test),
            other => Err(format!("APP_MODE must be one of debug, release, test, got '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub mode: AppMode,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_json")]
    pub json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            mode: AppMode::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: default_json(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_json() -> bool {
    false
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl ServerConfig {
    pub fn addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// Every problem found while building a [`Config`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid configuration: {}", .0.join("; "))]
pub struct ConfigError(pub Vec<String>);

impl ConfigError {
    pub fn problems(&self) -> &[String] {
        &self.0
    }
}

/// Builder for Config with environment variable support
#[must_use = "builder does nothing until you call build()"]
pub struct ConfigBuilder {
    config: Config,
    errors: Vec<String>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            errors: Vec::new(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.config.server.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    pub fn with_mode(mut self, mode: AppMode) -> Self {
        self.config.server.mode = mode;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn with_json_logging(mut self, enabled: bool) -> Self {
        self.config.logging.json = enabled;
        self
    }

    pub fn with_database(mut self, database: DatabaseConfig) -> Self {
        self.config.database = database;
        self
    }

    pub fn with_security(mut self, security: SecurityConfig) -> Self {
        self.config.security = security;
        self
    }

    pub fn with_csrf(mut self, csrf: CsrfConfig) -> Self {
        self.config.csrf = csrf;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    pub fn with_limits(mut self, limits: RequestLimits) -> Self {
        self.config.limits = limits;
        self
    }

    /// Load configuration from environment variables, `HOSTBUS_`-prefixed first
    ///
    /// Values that fail to parse are reported by [`build`](Self::build).
    pub fn from_env(mut self) -> Self {
        if let Some(host) = get_env_with_prefix("HOST") {
            self.config.server.host = host;
        }
        if let Some(port) = get_env_with_prefix("PORT") {
            match port.parse::<u16>() {
                Ok(p) => self.config.server.port = p,
                Err(_) => self.errors.push(format!("PORT must be a number between 1 and 65535, got '{port}'")),
            }
        }
        if let Some(mode) = get_env_with_prefix("APP_MODE") {
            match mode.parse() {
                Ok(mode) => self.config.server.mode = mode,
                Err(e) => self.errors.push(e),
            }
        }
        if let Some(level) = get_env_with_prefix("LOG_LEVEL") {
            self.config.logging.level = level;
        }
        if let Some(json) = get_env_with_prefix("LOG_JSON") {
            self.config.logging.json = json.parse().unwrap_or(false);
        }

        match DatabaseConfig::from_env() {
            Ok(database) => self.config.database = database,
            Err(errors) => self.errors.extend(errors),
        }
        self.config.security = SecurityConfig::from_env();

        if let Some(key) = get_env_with_prefix("CSRF_AUTH_KEY") {
            self.config.csrf.auth_key = Some(key);
        }

        match RateLimitConfig::from_env() {
            Ok(rate_limit) => self.config.rate_limit = rate_limit,
            Err(errors) => self.errors.extend(errors),
        }

        match RequestLimits::from_env() {
            Ok(limits) => self.config.limits = limits,
            Err(errors) => self.errors.extend(errors),
        }

        self
    }

    /// Build the configuration, validating all settings
    ///
    /// # Errors
    ///
    /// Returns every problem found, not just the first:
    /// - Invalid server address or port
    /// - Invalid log level
    /// - Database URL scheme or pool bounds
    /// - `CSRF_AUTH_KEY` that is not base64 for 32 bytes
    /// - Size limits that are zero or out of order
    /// - Unparseable environment values
    pub fn build(self) -> Result<Config, ConfigError> {
        let Self { mut config, mut errors } = self;

        if config.server.port == 0 {
            errors.push("Server port must be greater than 0".to_string());
        }
        if let Err(e) = config.server.addr() {
            errors.push(format!(
                "Invalid server address {}:{} - {}",
                config.server.host, config.server.port, e
            ));
        }

        if !LOG_LEVELS.contains(&config.logging.level.to_lowercase().as_str()) {
            errors.push(format!(
                "Invalid log level: {}. Must be one of: {}",
                config.logging.level,
                LOG_LEVELS.join(", ")
            ));
        }

        errors.extend(config.database.validate());
        errors.extend(config.limits.validate());

        if let Some(ref key) = config.csrf.auth_key {
            match STANDARD.decode(key) {
                Ok(bytes) if bytes.len() == 32 => {}
                Ok(bytes) => errors.push(format!(
                    "CSRF_AUTH_KEY must decode to 32 bytes, got {}",
                    bytes.len()
                )),
                Err(_) => errors.push("CSRF_AUTH_KEY must be base64 encoded".to_string()),
            }
        }

        if !errors.is_empty() {
            return Err(ConfigError(errors));
        }

        if config.server.mode.is_release() {
            config.csrf.secure_cookie = true;
        }

        Ok(config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
