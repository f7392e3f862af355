mod config;
mod context;
mod services;
mod stages;
mod state;

pub use config::{IngestionConfig, IngestionTuning};
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultPipelineServices, PipelineServices};

use std::{
    fmt::Write as _,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Utc;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        layout::TaskLayout,
        types::{
            ingestion_task::{IngestionTask, TaskErrorInfo},
            task::Task,
        },
    },
    utils::config::AppConfig,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use self::{
    context::PipelineContext,
    stages::{cache, index_frames, persist_segments, source_entries, unpack, validate},
    state::ready,
};

/// Failures at this stage happen before the task is touched, so they are
/// never rolled back.
const LOAD_STAGE: &str = "load";

/// Where a run stopped and why.
#[derive(Debug)]
pub struct PipelineFailure {
    pub stage: &'static str,
    pub error: AppError,
}

#[allow(clippy::module_name_repetitions)]
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    pipeline_config: IngestionConfig,
    services: Arc<dyn PipelineServices>,
    shutdown: CancellationToken,
}

impl IngestionPipeline {
    pub fn new(db: Arc<SurrealDbClient>, config: &AppConfig) -> Result<Self, AppError> {
        let services = DefaultPipelineServices::new(config, reqwest::Client::new());
        Self::with_services(
            db,
            IngestionConfig::from_app_config(config),
            Arc::new(services),
        )
    }

    pub fn with_services(
        db: Arc<SurrealDbClient>,
        pipeline_config: IngestionConfig,
        services: Arc<dyn PipelineServices>,
    ) -> Result<Self, AppError> {
        if pipeline_config.tuning.normalize_concurrency == 0 {
            return Err(AppError::Validation(
                "normalize concurrency must be at least 1".into(),
            ));
        }

        Ok(Self {
            db,
            pipeline_config,
            services,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &IngestionConfig {
        &self.pipeline_config
    }

    /// Cancelling this token stops every running ingestion at its next
    /// checkpoint; the affected tasks are rolled back.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    #[tracing::instrument(
        skip_all,
        fields(
            task_id = %task.id,
            worker_id = task.worker_id.as_deref().unwrap_or("unknown-worker")
        )
    )]
    pub async fn process_task(&self, task: IngestionTask) -> Result<(), AppError> {
        let cancel = self.shutdown.child_token();

        match self.drive_pipeline(&task, &cancel).await {
            Ok(()) => {
                task.mark_finished(&self.db).await?;
                info!(task_id = %task.id, "ingestion task finished");
                Ok(())
            }
            Err(PipelineFailure { stage, error }) => {
                let reason = error.to_string();
                self.fail_task(&task, stage, &error).await?;
                Err(AppError::Processing(reason))
            }
        }
    }

    /// Fails a task and removes everything it produced: the task row, its
    /// segments and jobs, and its directory tree. The queue record stays, in
    /// state `Failed`, so status queries can report the reason.
    ///
    /// A failure while loading the task leaves its rows and tree in place: the
    /// task is either gone already or holds data from an earlier ingestion.
    pub async fn fail_task(
        &self,
        task: &IngestionTask,
        stage: &str,
        error: &AppError,
    ) -> Result<(), AppError> {
        let task_id = task.task_id();
        let layout = TaskLayout::new(&self.pipeline_config.data_dir, task_id);

        if let Err(log_err) = write_failure_log(&layout, stage, error).await {
            warn!(%task_id, error = %log_err, "failed to write ingestion failure log");
        }

        let rolled_back = stage != LOAD_STAGE;
        let rollback = if rolled_back {
            Task::delete_with_data(task_id, &self.pipeline_config.data_dir, &self.db).await
        } else {
            Ok(())
        };
        let marked = task.mark_failed(TaskErrorInfo::from(error), &self.db).await;

        warn!(
            %task_id,
            stage,
            error_code = error.code(),
            error = %error,
            rolled_back = rolled_back && rollback.is_ok(),
            "ingestion task failed"
        );

        rollback?;
        marked?;
        Ok(())
    }

    fn duration_millis(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    #[tracing::instrument(skip_all, fields(task_id = %task.id))]
    async fn drive_pipeline(
        &self,
        task: &IngestionTask,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineFailure> {
        let load_failure = |error| PipelineFailure {
            stage: LOAD_STAGE,
            error,
        };
        let record = Task::get(task.task_id(), &self.db)
            .await
            .map_err(load_failure)?;
        record
            .ensure_not_ingested(&self.db)
            .await
            .map_err(load_failure)?;

        let mut ctx = PipelineContext::new(
            task,
            record,
            self.db.as_ref(),
            &self.pipeline_config,
            self.services.as_ref(),
            cancel,
        );

        let machine = ready();

        let pipeline_started = Instant::now();

        let stage_start = Instant::now();
        let machine = source_entries(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let source_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = validate(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let validate_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = unpack(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let unpack_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = index_frames(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let index_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = cache(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let cache_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let _machine = persist_segments(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let persist_duration = stage_start.elapsed();

        let total_duration = pipeline_started.elapsed();
        info!(
            task_id = %ctx.task_id,
            mode = ctx.task.mode.as_str(),
            size = ctx.task.size,
            segments = ctx.segment_count,
            meta_entries = ctx.meta.as_ref().map_or(0, |meta| meta.original_size.len()),
            total_ms = Self::duration_millis(total_duration),
            source_ms = Self::duration_millis(source_duration),
            validate_ms = Self::duration_millis(validate_duration),
            unpack_ms = Self::duration_millis(unpack_duration),
            index_ms = Self::duration_millis(index_duration),
            cache_ms = Self::duration_millis(cache_duration),
            persist_ms = Self::duration_millis(persist_duration),
            "ingestion pipeline finished"
        );

        Ok(())
    }
}

async fn write_failure_log(
    layout: &TaskLayout,
    stage: &str,
    error: &AppError,
) -> Result<(), AppError> {
    let mut report = format!(
        "{}\nstage: {stage}\ncode: {}\nerror: {error}\n",
        Utc::now().to_rfc3339(),
        error.code()
    );
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        let _ = writeln!(report, "caused by: {cause}");
        source = cause.source();
    }

    if let Some(parent) = layout.log_path().parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(layout.log_path(), report).await?;
    debug!(path = %layout.log_path().display(), "ingestion failure log written");
    Ok(())
}

#[cfg(test)]
mod tests;
