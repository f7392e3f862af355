#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod pipeline;
pub mod utils;

use chrono::Utc;
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::ingestion_task::IngestionTask},
};
pub use pipeline::{
    DefaultPipelineServices, IngestionConfig, IngestionPipeline, IngestionTuning,
    PipelineServices,
};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

pub async fn run_worker_loop(
    db: Arc<SurrealDbClient>,
    ingestion_pipeline: Arc<IngestionPipeline>,
) -> Result<(), Box<dyn std::error::Error>> {
    let worker_id = format!("ingestion-worker-{}", Uuid::new_v4());
    let tuning = ingestion_pipeline.config().tuning.clone();
    let lease_duration = Duration::from_secs(tuning.lease_secs);
    let idle_backoff = Duration::from_millis(tuning.idle_backoff_ms);
    let claim_error_backoff = Duration::from_millis(tuning.claim_error_backoff_ms);
    let shutdown = ingestion_pipeline.shutdown_token();

    info!(%worker_id, "ingestion worker started");

    while !shutdown.is_cancelled() {
        if let Err(err) = reap_expired_leases(&db, &ingestion_pipeline).await {
            error!(%worker_id, error = %err, "failed to reap expired ingestion leases");
        }

        match IngestionTask::claim_next_ready(&db, &worker_id, Utc::now(), lease_duration).await {
            Ok(Some(task)) => {
                let task_id = task.id.clone();
                info!(%worker_id, %task_id, "claimed ingestion task");
                if let Err(err) = ingestion_pipeline.process_task(task).await {
                    error!(%worker_id, %task_id, error = %err, "ingestion task failed");
                }
            }
            Ok(None) => {
                tokio::select! {
                    () = sleep(idle_backoff) => {}
                    () = shutdown.cancelled() => {}
                }
            }
            Err(err) => {
                error!(%worker_id, error = %err, "failed to claim ingestion task");
                warn!(
                    backoff_ms = tuning.claim_error_backoff_ms,
                    "Backing off after claim error"
                );
                sleep(claim_error_backoff).await;
            }
        }
    }

    info!(%worker_id, "ingestion worker stopped");
    Ok(())
}

/// Fails and rolls back tasks whose worker stopped renewing its lease.
pub async fn reap_expired_leases(
    db: &SurrealDbClient,
    ingestion_pipeline: &IngestionPipeline,
) -> Result<usize, AppError> {
    let expired = IngestionTask::expired_leases(db, Utc::now()).await?;
    let count = expired.len();

    for task in expired {
        warn!(
            task_id = %task.id,
            worker_id = task.worker_id.as_deref().unwrap_or("unknown-worker"),
            "ingestion lease expired"
        );
        let error = AppError::Processing(format!(
            "worker lease of {}s expired before ingestion finished",
            task.lease_duration_secs
        ));
        ingestion_pipeline.fail_task(&task, "lease", &error).await?;
    }

    Ok(count)
}
