use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;

use super::{DatabaseConfig, redact_database_url};
use crate::error::{AppError, Result};

/// Open a bounded connection pool
pub async fn connect(config: &DatabaseConfig) -> Result<DatabaseConnection> {
    let url = config
        .url
        .as_deref()
        .ok_or_else(|| AppError::internal("DATABASE_URL is not set"))?;

    let mut opt = ConnectOptions::new(url);
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout))
        .max_lifetime(Duration::from_secs(config.max_lifetime))
        .sqlx_logging(false);

    let conn = Database::connect(opt).await.map_err(|e| {
        AppError::internal(format!(
            "Failed to connect to database {}: {}",
            redact_database_url(url),
            e
        ))
    })?;

    tracing::info!(
        url = %redact_database_url(url),
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connected"
    );

    Ok(conn)
}
