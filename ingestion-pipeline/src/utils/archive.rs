use std::path::{Path, PathBuf};

use async_trait::async_trait;
use common::error::AppError;
use tokio::process::Command;
use tracing::{debug, info};

use super::{fs::find_media, media::MediaKind};

/// Unpacks one archive into a directory.
#[async_trait]
pub trait ArchiveUnpacker: Send + Sync {
    async fn unpack(&self, archive: &Path, target_dir: &Path) -> Result<(), AppError>;
}

/// Runs an external `bsdtar`-compatible tool: `<program> -xf <archive> -C <dir>`.
pub struct CommandArchiveUnpacker {
    program: String,
}

impl CommandArchiveUnpacker {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for CommandArchiveUnpacker {
    fn default() -> Self {
        Self::new("bsdtar")
    }
}

#[async_trait]
impl ArchiveUnpacker for CommandArchiveUnpacker {
    async fn unpack(&self, archive: &Path, target_dir: &Path) -> Result<(), AppError> {
        let output = Command::new(&self.program)
            .arg("-xf")
            .arg(archive)
            .arg("-C")
            .arg(target_dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                AppError::Extraction(format!("failed to run {}: {err}", self.program))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Extraction(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

/// Finds the first archive below `upload_dir` in frame order, unpacks it in
/// place and deletes it. Returns the path the archive had.
pub async fn find_and_unpack(
    upload_dir: &Path,
    unpacker: &dyn ArchiveUnpacker,
) -> Result<PathBuf, AppError> {
    let dir = upload_dir.to_path_buf();
    let archives = tokio::task::spawn_blocking(move || find_media(&dir, MediaKind::Archive)).await??;

    let Some(archive) = archives.into_iter().next() else {
        return Err(AppError::NotFound(format!(
            "no archive found in {}",
            upload_dir.display()
        )));
    };

    info!(archive = %archive.display(), "unpacking archive");
    unpacker.unpack(&archive, upload_dir).await?;
    tokio::fs::remove_file(&archive).await?;
    debug!(archive = %archive.display(), "archive removed after unpacking");

    Ok(archive)
}
