use std::path::PathBuf;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        layout::TaskLayout,
        types::{ingestion_task::IngestionTask, task::Task},
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::utils::{meta_cache::ImageMetaCache, sources::SourcedEntries};

use super::{config::IngestionConfig, services::PipelineServices, PipelineFailure};

pub struct PipelineContext<'a> {
    pub ingestion: &'a IngestionTask,
    pub task_id: String,
    pub db: &'a SurrealDbClient,
    pub pipeline_config: &'a IngestionConfig,
    pub services: &'a dyn PipelineServices,
    pub cancel: &'a CancellationToken,
    pub task: Task,
    pub layout: TaskLayout,
    pub stage: &'static str,
    pub sourced: SourcedEntries,
    pub archive: Option<PathBuf>,
    pub meta: Option<ImageMetaCache>,
    pub segment_count: usize,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        ingestion: &'a IngestionTask,
        task: Task,
        db: &'a SurrealDbClient,
        pipeline_config: &'a IngestionConfig,
        services: &'a dyn PipelineServices,
        cancel: &'a CancellationToken,
    ) -> Self {
        let layout = task.layout(&pipeline_config.data_dir);
        Self {
            ingestion,
            task_id: task.id.clone(),
            db,
            pipeline_config,
            services,
            cancel,
            task,
            layout,
            stage: "ready",
            sourced: SourcedEntries::default(),
            archive: None,
            meta: None,
            segment_count: 0,
        }
    }

    /// Publishes a progress message on the queue record.
    pub async fn set_status(&self, message: &str) -> Result<(), AppError> {
        debug!(task_id = %self.task_id, stage = self.stage, status = message, "ingestion status");
        self.ingestion.set_status(message, self.db).await
    }

    pub fn ensure_not_cancelled(&self) -> Result<(), AppError> {
        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled(format!(
                "task {} cancelled during {}",
                self.task_id, self.stage
            )));
        }
        Ok(())
    }

    pub fn abort(&mut self, err: AppError) -> PipelineFailure {
        error!(
            task_id = %self.task_id,
            stage = self.stage,
            error = %err,
            "ingestion pipeline aborted"
        );
        PipelineFailure {
            stage: self.stage,
            error: err,
        }
    }
}
