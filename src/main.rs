use anyhow::Context;
use std::sync::Arc;

use hostbus::{App, AppState, ConfigBuilder, Credentials, InMemoryStore, Storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigBuilder::new()
        .from_env()
        .build()
        .context("invalid configuration")?;

    hostbus::init_tracing_with_config(&config);

    let storage = open_storage(&config).await?;
    let state = AppState::builder()
        .with_storage(storage)
        .with_credentials(Credentials::default())
        .with_config(config)
        .build();

    App::new(state)
        .context("failed to set up rate limiting")?
        .serve()
        .await
        .context("server error")?;

    Ok(())
}

#[cfg(feature = "database")]
async fn open_storage(config: &hostbus::Config) -> anyhow::Result<Arc<dyn Storage>> {
    if config.database.url.is_none() {
        return Ok(in_memory());
    }

    let conn = hostbus::database::connect(&config.database)
        .await
        .context("failed to connect to database")?;
    Ok(Arc::new(hostbus::SeaOrmStore::new(conn)))
}

#[cfg(not(feature = "database"))]
async fn open_storage(config: &hostbus::Config) -> anyhow::Result<Arc<dyn Storage>> {
    if config.database.url.is_some() {
        tracing::warn!("DATABASE_URL is set but hostbus was built without the database feature");
    }
    Ok(in_memory())
}

fn in_memory() -> Arc<dyn Storage> {
    tracing::warn!("No DATABASE_URL configured; using in-memory storage, data is lost on restart");
    Arc::new(InMemoryStore::new())
}
