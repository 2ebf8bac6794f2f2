//! Connection pool settings and setup for the PostgreSQL backend.

mod config;
#[cfg(feature = "database")]
mod pool;

pub use config::{DatabaseConfig, redact_database_url};
#[cfg(feature = "database")]
pub use pool::connect;
