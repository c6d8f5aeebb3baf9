//! `tidemark`: consumes one registered source into the bitemporal store.
//!
//! Configuration comes from the environment (see [`DbConfig`]); source
//! settings, origins and runtime parameters come from the catalog.

use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tidemark_connectors::kafka::{KafkaSourceConfig, KafkaSourceFactory};
use tidemark_core::store::PgStore;
use tidemark_core::{Error, Result};
use tidemark_db::{Catalog, DbConfig, StreamCoordinator};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, fatal = e.is_fatal(), "tidemark exited with error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let config = DbConfig::from_env()?;
    info!(source = %config.source, pool = config.store.max_pool_size, "starting tidemark");

    let store = Arc::new(PgStore::new(&config.store)?);
    let catalog = Arc::new(Catalog::open(store).await?);
    let entry = catalog
        .source(&config.source)
        .ok_or_else(|| Error::Config(format!("source '{}' is not registered", config.source)))?;

    let kafka = KafkaSourceConfig::from_config(&entry.connector_config())?;
    let factory = Arc::new(KafkaSourceFactory::new(kafka));
    let decoder_config = entry.decoder_config(&catalog.origins());
    let coordinator = StreamCoordinator::new(catalog, factory, &decoder_config, config.pipeline)?;

    let stop = coordinator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested, finishing in-flight batches");
            stop.store(true, Ordering::Release);
        }
    });

    coordinator.run().await
}
