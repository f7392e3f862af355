#![allow(clippy::missing_docs_in_private_items)]

pub mod cli;
pub mod commands;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use common::{storage::db::SurrealDbClient, utils::config::AppConfig};
use ingestion_pipeline::{run_worker_loop, IngestionPipeline};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();
}

pub async fn connect(config: &AppConfig) -> Result<Arc<SurrealDbClient>> {
    let db = SurrealDbClient::new(
        &config.surrealdb_address,
        &config.surrealdb_username,
        &config.surrealdb_password,
        &config.surrealdb_namespace,
        &config.surrealdb_database,
    )
    .await?;

    db.ensure_initialized().await?;
    Ok(Arc::new(db))
}

/// Runs the worker loop until Ctrl-C. An interrupted ingestion is rolled back
/// like any other failure.
pub async fn run_worker(config: AppConfig) -> Result<()> {
    let db = connect(&config).await?;
    let ingestion_pipeline = Arc::new(IngestionPipeline::new(Arc::clone(&db), &config)?);

    let shutdown = ingestion_pipeline.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested, stopping ingestion worker");
                shutdown.cancel();
            }
            Err(err) => warn!(error = %err, "failed to listen for shutdown signal"),
        }
    });

    info!(data_dir = %config.data_dir, "Starting worker process");
    run_worker_loop(db, ingestion_pipeline)
        .await
        .map_err(|err| anyhow!("worker process error: {err}"))
}
