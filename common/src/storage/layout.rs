use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

const TASKS_DIR: &str = "tasks";
const UPLOAD_DIR: &str = ".upload";
const FRAMES_DIR: &str = "data";
const META_CACHE_FILE: &str = "image_meta.cache";
const LOG_EXTENSION: &str = "log";

/// On-disk layout of a single task below the configured data directory.
///
/// ```text
/// <data_dir>/tasks/<task_id>/
///     .upload/            raw and extracted inputs
///     data/               frame tree, see `frame_path`
///     image_meta.cache    per-frame dimensions
/// <data_dir>/tasks/<task_id>.log
/// ```
///
/// The log sits beside the task tree so a failure report survives the
/// rollback that removes the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLayout {
    root: PathBuf,
    log_path: PathBuf,
}

impl TaskLayout {
    pub fn new(data_dir: impl AsRef<Path>, task_id: &str) -> Self {
        let tasks_dir = data_dir.as_ref().join(TASKS_DIR);
        Self {
            root: tasks_dir.join(task_id),
            log_path: tasks_dir.join(format!("{task_id}.{LOG_EXTENSION}")),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.root.join(UPLOAD_DIR)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(FRAMES_DIR)
    }

    pub fn meta_cache_path(&self) -> PathBuf {
        self.root.join(META_CACHE_FILE)
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Replaces any stale tree for this task with empty upload and data directories.
    pub async fn create_fresh(&self) -> std::io::Result<()> {
        self.remove().await?;
        tokio::fs::create_dir_all(self.upload_dir()).await?;
        tokio::fs::create_dir_all(self.data_dir()).await?;
        Ok(())
    }

    /// Removes the whole task tree. A missing tree is not an error.
    pub async fn remove(&self) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}
