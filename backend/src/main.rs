use anyhow::Context;
use schema_virtualization::config::{self, Config};
use schema_virtualization::services::Services;
use schema_virtualization::storage::SqliteStorage;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize logging
    config::init_tracing(&config.logging);

    // Open the schema catalog, creating tables on first run
    let storage = Arc::new(
        SqliteStorage::new(&config.database.url)
            .await
            .with_context(|| format!("Failed to initialize schema catalog at {}", config.database.url))?,
    );

    let _services = Services::with_drivers(storage, &config);

    info!(
        "Schema catalog ready at {} (sample row limit {}, connect timeout {}s)",
        config.database.url,
        config.sampling.row_limit,
        config.external.connect_timeout_secs
    );

    Ok(())
}
