use std::{
    io::BufWriter,
    path::{Path, PathBuf},
};

use common::{error::AppError, utils::config::FrameLinkMode};
use futures::{stream, Stream, StreamExt};
use image::{codecs::jpeg::JpegEncoder, ImageReader};
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

use super::{fs::find_media, frame_path::frame_path, media::MediaKind};

/// All images below `upload_dir`, in frame order.
pub async fn discover_images(upload_dir: &Path) -> Result<Vec<PathBuf>, AppError> {
    let dir = upload_dir.to_path_buf();
    let images = tokio::task::spawn_blocking(move || find_media(&dir, MediaKind::Image)).await??;
    if images.is_empty() {
        return Err(AppError::Validation("no images found".into()));
    }
    Ok(images)
}

/// Re-encodes one image in place as an RGB JPEG, rotated by 180 degrees when
/// `flip` is set. The file keeps its name; the new content replaces the old
/// one atomically.
pub fn normalize_image(path: &Path, quality: u8, flip: bool) -> Result<(), AppError> {
    // Content decides the decoder: a normalized `.png` already holds JPEG bytes.
    let mut rgb = ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?
        .to_rgb8();
    if flip {
        image::imageops::rotate180_in_place(&mut rgb);
    }

    let parent = path
        .parent()
        .ok_or_else(|| AppError::InternalError(format!("{} has no parent", path.display())))?;
    let temp = NamedTempFile::new_in(parent)?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100)).encode_image(&rgb)?;
        std::io::Write::flush(&mut writer)?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| AppError::Io(err.error))?;
    Ok(())
}

/// Normalises `images` with at most `concurrency` decoders running at once.
/// Results arrive in the order of `images`. Once `stop` is cancelled, images
/// that have not started yet yield `Cancelled` without touching the file.
pub fn normalize_images(
    images: Vec<PathBuf>,
    quality: u8,
    flip: bool,
    concurrency: usize,
    stop: CancellationToken,
) -> impl Stream<Item = Result<PathBuf, AppError>> {
    stream::iter(images)
        .map(move |path| {
            let stop = stop.clone();
            async move {
                tokio::task::spawn_blocking(move || {
                    if stop.is_cancelled() {
                        return Err(AppError::Cancelled(format!(
                            "normalization of {} skipped",
                            path.display()
                        )));
                    }
                    normalize_image(&path, quality, flip)?;
                    Ok::<_, AppError>(path)
                })
                .await?
            }
        })
        .buffered(concurrency.max(1))
}

/// Places frame `i` for every `images[i]` below `data_dir`. `size` grows by
/// one per placed frame.
pub async fn link_frames(
    images: &[PathBuf],
    data_dir: &Path,
    mode: FrameLinkMode,
    size: &mut u64,
) -> Result<(), AppError> {
    for (frame, source) in (0_u64..).zip(images) {
        let target = frame_path(frame, data_dir);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        place_frame(source, &target, mode).await?;
        *size = size.saturating_add(1);
    }
    Ok(())
}

async fn place_frame(source: &Path, target: &Path, mode: FrameLinkMode) -> Result<(), AppError> {
    match mode {
        FrameLinkMode::Copy => {
            tokio::fs::copy(source, target).await?;
        }
        FrameLinkMode::Hardlink => tokio::fs::hard_link(source, target).await?,
        FrameLinkMode::Symlink => {
            let absolute = tokio::fs::canonicalize(source).await?;
            symlink(&absolute, target).await?;
        }
    }
    Ok(())
}

#[cfg(unix)]
async fn symlink(source: &Path, target: &Path) -> std::io::Result<()> {
    tokio::fs::symlink(source, target).await
}

#[cfg(not(unix))]
async fn symlink(source: &Path, target: &Path) -> std::io::Result<()> {
    tokio::fs::copy(source, target).await.map(|_| ())
}
