//! hostbus - multi-tenant ingestion API for host diagnostic reports
//!
//! Agents authenticate with API keys and upload collection reports; users
//! manage hosts, keys and members of their organization. Every request runs
//! through the same guard pipeline:
//!
//! - **Rate limiting**: per endpoint class, keyed by API key or client IP
//! - **Authentication**: API key from `X-API-Key` or `Authorization`
//! - **Tenant context**: organization and role of the authenticated user
//! - **CSRF**: double-submit cookie for state-changing requests
//! - **RBAC**: flat role membership per route
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use hostbus::{App, AppState, ConfigBuilder};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigBuilder::new().from_env().build()?;
//!     hostbus::init_tracing_with_config(&config);
//!
//!     let state = AppState::builder().with_config(config).build();
//!     App::new(state)?.serve().await?;
//!     Ok(())
//! }
//! ```

mod app;
pub mod auth;
pub mod bootstrap;
mod config;
mod core;
pub mod credentials;
pub mod csrf;
pub mod database;
mod error;
pub mod health;
pub mod middleware;
pub mod models;
pub mod ratelimit;
pub mod routes;
pub mod security;
pub mod storage;
pub mod testing;
mod utils;
pub mod validation;

// Re-exports for public API
pub use app::{AppState, AppStateBuilder};
pub use config::{AppMode, Config, ConfigBuilder, ConfigError, LoggingConfig, ServerConfig};
pub use core::App;
pub use credentials::{Credentials, PasswordConfig};
pub use csrf::CsrfConfig;
pub use database::DatabaseConfig;
pub use error::{AppError, ErrorContext, ErrorWithContext, Result};
pub use middleware::RequestLimits;
pub use models::Role;
pub use ratelimit::{Rate, RateLimitConfig, RateLimitConfigBuilder};
pub use security::{SecurityConfig, SecurityConfigBuilder};
pub use storage::{InMemoryStore, Storage, StorageError};
#[cfg(feature = "database")]
pub use storage::SeaOrmStore;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging with sensible defaults
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "debug", "hostbus=debug")
/// - `HOSTBUS_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let json_logs = utils::get_env_with_prefix("LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    init_subscriber("info", json_logs);
}

/// Initialize tracing from loaded configuration.
///
/// `RUST_LOG` still wins over the configured level when set.
pub fn init_tracing_with_config(config: &Config) {
    init_subscriber(&config.logging.level, config.logging.json);
}

fn init_subscriber(default_level: &str, json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
