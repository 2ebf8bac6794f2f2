//! Seed an administrator and print their initial API key.
//!
//! Reads the usual database settings plus `ADMIN_USERNAME`, `ADMIN_EMAIL`,
//! `ADMIN_PASSWORD` and `ADMIN_ORG`.

use anyhow::Context;
use std::sync::Arc;

use hostbus::bootstrap::{AdminSeed, Bootstrap, create_admin};
use hostbus::{AppState, ConfigBuilder, Credentials, SeaOrmStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigBuilder::new()
        .from_env()
        .build()
        .context("invalid configuration")?;

    hostbus::init_tracing_with_config(&config);

    if config.database.url.is_none() {
        anyhow::bail!("DATABASE_URL must be set; an in-memory admin would vanish on exit");
    }
    let conn = hostbus::database::connect(&config.database)
        .await
        .context("failed to connect to database")?;

    let state = AppState::builder()
        .with_storage(Arc::new(SeaOrmStore::new(conn)))
        .with_credentials(Credentials::default())
        .with_config(config)
        .build();

    match create_admin(&state, AdminSeed::from_env())
        .await
        .context("failed to create admin")?
    {
        Bootstrap::Skipped(existing) => {
            tracing::info!(username = %existing.username, "Admin user already exists, nothing to do");
        }
        Bootstrap::Created { org, admin, api_key } => {
            tracing::info!(
                username = %admin.username,
                user_id = %admin.id,
                org = %org.name,
                "Admin user created"
            );
            tracing::info!("Initial API key (shown once): {}", api_key.key);
            tracing::info!("Authenticate with: X-API-Key: {}", api_key.key);
        }
    }

    state.recorder.shutdown().await;
    Ok(())
}
