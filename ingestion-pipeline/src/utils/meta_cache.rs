use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use common::{error::AppError, storage::types::task::TaskMode};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::frame_path::frame_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

/// Original frame dimensions, persisted as `image_meta.cache`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetaCache {
    pub original_size: Vec<FrameSize>,
}

impl ImageMetaCache {
    /// Reads dimensions from the frame files. Interpolation tasks share one
    /// frame size, so only frame 0 is inspected.
    pub fn build(mode: TaskMode, size: u64, data_dir: &Path) -> Result<Self, AppError> {
        let original_size = (0..Self::expected_len(mode, size))
            .map(|frame| {
                let (width, height) = image::image_dimensions(frame_path(frame, data_dir))?;
                Ok(FrameSize { width, height })
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        Ok(Self { original_size })
    }

    pub fn read(path: &Path) -> Result<Self, AppError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Writes the cache next to `path` and renames it into place.
    pub fn persist(&self, path: &Path) -> Result<(), AppError> {
        let parent = path
            .parent()
            .ok_or_else(|| AppError::InternalError(format!("{} has no parent", path.display())))?;
        let temp = NamedTempFile::new_in(parent)?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            serde_json::to_writer(&mut writer, self)?;
            writer.flush()?;
        }
        temp.persist(path).map_err(|err| AppError::Io(err.error))?;
        Ok(())
    }

    /// Number of entries a cache for `size` frames holds.
    pub fn expected_len(mode: TaskMode, size: u64) -> u64 {
        match mode {
            TaskMode::Interpolation => size.min(1),
            TaskMode::Annotation => size,
        }
    }

    pub fn matches(&self, mode: TaskMode, size: u64) -> bool {
        u64::try_from(self.original_size.len()).ok() == Some(Self::expected_len(mode, size))
    }

    /// Builds the cache from the frame files, persists it and reads it back.
    pub fn build_and_store(
        cache_path: &Path,
        mode: TaskMode,
        size: u64,
        data_dir: &Path,
    ) -> Result<Self, AppError> {
        let cache = Self::build(mode, size, data_dir)?;
        cache.persist(cache_path)?;
        info!(frames = cache.original_size.len(), "meta cache built");
        Self::read(cache_path)
    }

    /// The cache at `cache_path`, rebuilt from the frames when it is missing,
    /// unreadable, or holds the wrong number of entries for `size`.
    pub fn load_or_rebuild(
        cache_path: &Path,
        mode: TaskMode,
        size: u64,
        data_dir: &Path,
    ) -> Result<Self, AppError> {
        match Self::read(cache_path) {
            Ok(cache) if cache.matches(mode, size) => Ok(cache),
            Ok(cache) => {
                debug!(
                    path = %cache_path.display(),
                    entries = cache.original_size.len(),
                    size,
                    "meta cache does not match task size, rebuilding"
                );
                Self::build_and_store(cache_path, mode, size, data_dir)
            }
            Err(err) => {
                debug!(path = %cache_path.display(), error = %err, "meta cache unavailable, rebuilding");
                Self::build_and_store(cache_path, mode, size, data_dir)
            }
        }
    }

    /// Always rebuilds, ignoring whatever file is present.
    pub async fn rebuild(
        cache_path: PathBuf,
        mode: TaskMode,
        size: u64,
        data_dir: PathBuf,
    ) -> Result<Self, AppError> {
        tokio::task::spawn_blocking(move || Self::build_and_store(&cache_path, mode, size, &data_dir))
            .await?
    }

    pub async fn get(
        cache_path: PathBuf,
        mode: TaskMode,
        size: u64,
        data_dir: PathBuf,
    ) -> Result<Self, AppError> {
        tokio::task::spawn_blocking(move || Self::load_or_rebuild(&cache_path, mode, size, &data_dir))
            .await?
    }
}
