use std::path::{Path, PathBuf};

use common::error::AppError;

/// Location of frame `frame` below `base_dir`.
///
/// Frames are sharded two levels deep (`frame / 10000`, then `frame / 100`)
/// so no directory holds more than a hundred frames. Every writer and every
/// reader of frame data goes through this function; changing the scheme
/// orphans the frames of every existing task.
pub fn frame_path(frame: u64, base_dir: &Path) -> PathBuf {
    base_dir
        .join((frame / 10_000).to_string())
        .join((frame / 100).to_string())
        .join(format!("{frame}.jpg"))
}

/// Resolves frame `frame` of a task to the file holding its pixels,
/// following symlinked frames to their source.
pub async fn frame_file(frame: u64, base_dir: &Path) -> Result<PathBuf, AppError> {
    let path = frame_path(frame, base_dir);
    match tokio::fs::canonicalize(&path).await {
        Ok(resolved) => Ok(resolved),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(AppError::NotFound(
            format!("frame {frame} ({})", path.display()),
        )),
        Err(err) => Err(err.into()),
    }
}
