use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::utils::get_env_with_prefix;

/// Request budget for one endpoint class, written `"<count>-<unit>"`
///
/// Units are `S`, `M` and `H`. `"100-M"` is one hundred requests per minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rate {
    pub limit: u32,
    pub period: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateParseError {
    #[error("invalid rate '{0}': expected <count>-<unit> such as 100-M")]
    Format(String),

    #[error("invalid rate '{0}': count must be a positive integer")]
    Count(String),

    #[error("invalid rate '{0}': unit must be S, M or H")]
    Unit(String),
}

impl Rate {
    pub const fn new(limit: u32, period: Duration) -> Self {
        Self { limit, period }
    }

    pub const fn per_second(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(1))
    }

    pub const fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    pub const fn per_hour(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(3600))
    }

    /// Parse `value`, falling back to `100-M` with a warning when it is malformed.
    pub fn parse_or_default(value: &str) -> Self {
        value.parse().unwrap_or_else(|e: RateParseError| {
            tracing::warn!(rate = value, error = %e, "Failed to parse rate limit, using default 100-M");
            Self::per_minute(100)
        })
    }

    /// The period in `1m0s` form, as reported in 429 bodies
    pub fn period_label(&self) -> String {
        let total = self.period.as_secs();
        let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
        if hours > 0 {
            format!("{hours}h{minutes}m{seconds}s")
        } else if minutes > 0 {
            format!("{minutes}m{seconds}s")
        } else {
            format!("{seconds}s")
        }
    }
}

impl FromStr for Rate {
    type Err = RateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (count, unit) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| RateParseError::Format(s.to_string()))?;

        let limit: u32 = count
            .parse()
            .ok()
            .filter(|limit| *limit > 0)
            .ok_or_else(|| RateParseError::Count(s.to_string()))?;

        let period = match unit.to_ascii_uppercase().as_str() {
            "S" => Duration::from_secs(1),
            "M" => Duration::from_secs(60),
            "H" => Duration::from_secs(3600),
            _ => return Err(RateParseError::Unit(s.to_string())),
        };

        Ok(Self { limit, period })
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.period.as_secs() {
            1 => "S",
            3600 => "H",
            _ => "M",
        };
        write!(f, "{}-{}", self.limit, unit)
    }
}

impl TryFrom<String> for Rate {
    type Error = RateParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rate> for String {
    fn from(rate: Rate) -> Self {
        rate.to_string()
    }
}

/// Rate limiting configuration, one [`Rate`] per endpoint class
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Authenticated traffic, keyed by API key
    #[serde(default = "default_general")]
    pub general: Rate,

    /// Registration, keyed by client IP
    #[serde(default = "default_register")]
    pub register: Rate,

    /// Login and key-from-credentials, keyed by client IP
    #[serde(default = "default_login")]
    pub login: Rate,

    /// Report ingestion, keyed by API key
    #[serde(default = "default_ingest")]
    pub ingest: Rate,

    /// Trust X-Forwarded-For and X-Real-IP for client IP detection
    ///
    /// **SECURITY WARNING**: Only enable this behind a trusted reverse proxy
    /// that overwrites these headers. Otherwise callers can spoof their IP
    /// to escape per-IP limits.
    ///
    /// Default: `false`
    #[serde(default)]
    pub trust_proxy: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            general: default_general(),
            register: default_register(),
            login: default_login(),
            ingest: default_ingest(),
            trust_proxy: false,
        }
    }
}

impl RateLimitConfig {
    /// Create a new RateLimitConfig builder
    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder::new()
    }

    /// Load from `RATE_LIMIT_*` and `TRUST_PROXY`.
    ///
    /// Malformed values are reported, not replaced.
    pub fn from_env() -> Result<Self, Vec<String>> {
        let mut config = Self::default();
        let mut errors = Vec::new();

        let mut read = |key: &str, target: &mut Rate| {
            if let Some(value) = get_env_with_prefix(key) {
                match value.parse() {
                    Ok(rate) => *target = rate,
                    Err(e) => errors.push(format!("{key}: {e}")),
                }
            }
        };
        read("RATE_LIMIT_GENERAL", &mut config.general);
        read("RATE_LIMIT_REGISTER", &mut config.register);
        read("RATE_LIMIT_LOGIN", &mut config.login);
        read("RATE_LIMIT_INGEST", &mut config.ingest);

        if let Some(enabled) = get_env_with_prefix("RATE_LIMIT_ENABLED") {
            match enabled.parse() {
                Ok(enabled) => config.enabled = enabled,
                Err(_) => errors.push(format!("RATE_LIMIT_ENABLED: expected true or false, got '{enabled}'")),
            }
        }

        if let Some(trust_proxy) = get_env_with_prefix("TRUST_PROXY") {
            match trust_proxy.parse() {
                Ok(trust) => config.trust_proxy = trust,
                Err(_) => errors.push(format!("TRUST_PROXY: expected true or false, got '{trust_proxy}'")),
            }
        }

        if errors.is_empty() { Ok(config) } else { Err(errors) }
    }
}

/// Builder for RateLimitConfig
#[must_use = "builder does nothing until you call build()"]
pub struct RateLimitConfigBuilder {
    config: RateLimitConfig,
}

impl RateLimitConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RateLimitConfig::default(),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn general(mut self, rate: Rate) -> Self {
        self.config.general = rate;
        self
    }

    pub fn register(mut self, rate: Rate) -> Self {
        self.config.register = rate;
        self
    }

    pub fn login(mut self, rate: Rate) -> Self {
        self.config.login = rate;
        self
    }

    pub fn ingest(mut self, rate: Rate) -> Self {
        self.config.ingest = rate;
        self
    }

    /// Trust proxy headers (X-Forwarded-For, X-Real-IP) for client IP detection.
    ///
    /// **SECURITY WARNING**: Only enable this if behind a trusted reverse proxy.
    /// See [`RateLimitConfig::trust_proxy`] for details.
    pub fn trust_proxy(mut self, trust: bool) -> Self {
        self.config.trust_proxy = trust;
        self
    }

    pub fn build(self) -> RateLimitConfig {
        self.config
    }
}

impl Default for RateLimitConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn default_enabled() -> bool {
    true
}

fn default_general() -> Rate {
    Rate::per_minute(100)
}

fn default_register() -> Rate {
    Rate::per_minute(5)
}

fn default_login() -> Rate {
    Rate::per_minute(10)
}

fn default_ingest() -> Rate {
    Rate::per_minute(50)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rates() {
        assert_eq!("100-M".parse::<Rate>().unwrap(), Rate::per_minute(100));
        assert_eq!("5-S".parse::<Rate>().unwrap(), Rate::per_second(5));
        assert_eq!("1000-H".parse::<Rate>().unwrap(), Rate::per_hour(1000));
        assert_eq!("10-m".parse::<Rate>().unwrap(), Rate::per_minute(10));
    }

    #[test]
    fn test_parse_rejects_malformed_rates() {
        assert!(matches!("100".parse::<Rate>(), Err(RateParseError::Format(_))));
        assert!(matches!("abc-M".parse::<Rate>(), Err(RateParseError::Count(_))));
        assert!(matches!("0-M".parse::<Rate>(), Err(RateParseError::Count(_))));
        assert!(matches!("-5-M".parse::<Rate>(), Err(RateParseError::Count(_))));
        assert!(matches!("5-D".parse::<Rate>(), Err(RateParseError::Unit(_))));
    }

    #[test]
    fn test_parse_or_default_falls_back() {
        assert_eq!(Rate::parse_or_default("garbage"), Rate::per_minute(100));
        assert_eq!(Rate::parse_or_default("7-H"), Rate::per_hour(7));
    }

    #[test]
    fn test_display_round_trips() {
        for rate in ["100-M", "5-S", "3-H"] {
            assert_eq!(rate.parse::<Rate>().unwrap().to_string(), rate);
        }
    }

    #[test]
    fn test_period_label() {
        assert_eq!(Rate::per_second(1).period_label(), "1s");
        assert_eq!(Rate::per_minute(1).period_label(), "1m0s");
        assert_eq!(Rate::per_hour(1).period_label(), "1h0m0s");
    }

    #[test]
    fn test_default_config() {
        let config = RateLimitConfig::default();
        assert!(config.enabled);
        assert_eq!(config.general, Rate::per_minute(100));
        assert_eq!(config.register, Rate::per_minute(5));
        assert_eq!(config.login, Rate::per_minute(10));
        assert_eq!(config.ingest, Rate::per_minute(50));
        assert!(!config.trust_proxy);
    }

    #[test]
    fn test_builder() {
        let config = RateLimitConfig::builder()
            .login(Rate::per_second(2))
            .trust_proxy(true)
            .build();

        assert_eq!(config.login, Rate::per_second(2));
        assert_eq!(config.general, Rate::per_minute(100));
        assert!(config.trust_proxy);
    }

    #[test]
    fn test_serde_uses_rate_strings() {
        let config: RateLimitConfig =
            serde_json::from_str(r#"{"general":"20-S","ingest":"1-H"}"#).unwrap();
        assert_eq!(config.general, Rate::per_second(20));
        assert_eq!(config.ingest, Rate::per_hour(1));
        assert_eq!(config.login, Rate::per_minute(10));

        assert!(serde_json::from_str::<RateLimitConfig>(r#"{"login":"fast"}"#).is_err());
    }
}
