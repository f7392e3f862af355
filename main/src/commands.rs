use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            ingestion_payload::IngestionPayload,
            ingestion_task::{IngestionTask, RqStatus, TaskState},
            task::Task,
        },
    },
};
use ingestion_pipeline::utils::{frame_path::frame_file, meta_cache::ImageMetaCache};
use serde_json::Value;
use tracing::info;

use crate::cli::{Command, CreateTaskArgs, EnqueueArgs};

/// Runs one operator command and returns what should be printed.
pub async fn execute(command: Command, data_dir: &Path, db: &SurrealDbClient) -> Result<Value> {
    let output = match command {
        Command::CreateTask(args) => serde_json::to_value(create_task(args, data_dir, db).await?)?,
        Command::Rename { task_id, name } => {
            Task::update_name(&task_id, &name, db).await?;
            serde_json::to_value(Task::get(&task_id, db).await?)?
        }
        Command::Enqueue(args) => serde_json::to_value(enqueue(args, data_dir, db).await?)?,
        Command::Status { task_id } => serde_json::to_value(status(&task_id, db).await?)?,
        Command::Meta { task_id } => serde_json::to_value(meta(&task_id, data_dir, db).await?)?,
        Command::Frame { task_id, frame: index } => {
            let path = frame(&task_id, index, data_dir, db).await?;
            Value::String(path.display().to_string())
        }
        Command::Worker => return Err(anyhow!("the worker runs through run_worker")),
    };
    Ok(output)
}

pub async fn create_task(args: CreateTaskArgs, data_dir: &Path, db: &SurrealDbClient) -> Result<Task> {
    let task = Task::create_and_add_to_db(args.into(), data_dir, db).await?;
    info!(task_id = %task.id, name = %task.name, "task created");
    Ok(task)
}

/// Copies `--upload` files into the upload directory and queues the payload.
pub async fn enqueue(
    args: EnqueueArgs,
    data_dir: &Path,
    db: &SurrealDbClient,
) -> Result<IngestionTask> {
    let task = Task::get(&args.task_id, db).await?;
    let upload_dir = task.layout(data_dir).upload_dir();

    let mut client_files = args.client_files;
    for source in &args.uploads {
        let name = source
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("{} has no usable file name", source.display()))?
            .to_string();
        tokio::fs::copy(source, upload_dir.join(&name))
            .await
            .with_context(|| format!("copying {} into the upload directory", source.display()))?;
        client_files.push(name);
    }

    let payload = IngestionPayload::new(client_files, args.server_files, args.remote_files)?;
    let queued = IngestionTask::enqueue(&task.id, payload, db).await?;
    info!(task_id = %task.id, "ingestion queued");
    Ok(queued)
}

pub async fn status(task_id: &str, db: &SurrealDbClient) -> Result<RqStatus> {
    Ok(IngestionTask::fetch_status(task_id, db).await?)
}

/// Frame sizes of an ingested task. Refused until ingestion has finished, so
/// no cache is written for a half-built tree.
pub async fn meta(task_id: &str, data_dir: &Path, db: &SurrealDbClient) -> Result<ImageMetaCache> {
    let task = Task::get(task_id, db).await?;
    let ingestion = IngestionTask::fetch_status(task_id, db).await?;
    if ingestion.state != TaskState::Finished || task.size == 0 {
        return Err(AppError::Validation(format!(
            "task {task_id} has no ingested data (ingestion {})",
            ingestion.state.as_str()
        ))
        .into());
    }
    let layout = task.layout(data_dir);
    Ok(ImageMetaCache::get(layout.meta_cache_path(), task.mode, task.size, layout.data_dir()).await?)
}

pub async fn frame(
    task_id: &str,
    frame: u64,
    data_dir: &Path,
    db: &SurrealDbClient,
) -> Result<PathBuf> {
    let task = Task::get(task_id, db).await?;
    if frame >= task.size {
        return Err(AppError::NotFound(format!(
            "frame {frame} of task {task_id} with {} frames",
            task.size
        ))
        .into());
    }
    Ok(frame_file(frame, &task.layout(data_dir).data_dir()).await?)
}
