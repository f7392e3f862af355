use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use common::error::AppError;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{fs::find_media, frame_path::frame_path, media::MediaKind};

const MIN_TRANSCODER_QUALITY: u32 = 2;
const MAX_TRANSCODER_QUALITY: u32 = 32;

/// Maps the 1..=100 quality scale (100 best) onto the transcoder's 2..=31
/// `-q:v` scale (2 best). Inputs above 95 all map to 2. Halves round to even.
pub fn translate_quality(quality: u8) -> u32 {
    let quality = u32::from(quality.clamp(1, 95));
    let numerator = (95 - quality) * 29;
    let quotient = numerator / 94;
    let remainder = numerator % 94;
    let rounded = if remainder * 2 > 94 || (remainder * 2 == 94 && quotient % 2 == 1) {
        quotient + 1
    } else {
        quotient
    };
    (rounded + 2).clamp(MIN_TRANSCODER_QUALITY, MAX_TRANSCODER_QUALITY)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeOptions {
    /// Transcoder-native quality, see [`translate_quality`].
    pub quality: u32,
    /// Rotate every frame by 180 degrees.
    pub flip: bool,
}

/// Splits a video into JPEG frames `0.jpg, 1.jpg, ...` inside `output_dir`.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn extract_frames(
        &self,
        input: &Path,
        output_dir: &Path,
        options: TranscodeOptions,
    ) -> Result<(), AppError>;
}

pub struct FfmpegTranscoder {
    program: String,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn args(input: &Path, output_dir: &Path, options: TranscodeOptions) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-i".into(), input.into()];
        for arg in ["-start_number", "0", "-b:v", "10000k", "-vsync", "0", "-an", "-y", "-q:v"] {
            args.push(arg.into());
        }
        args.push(options.quality.to_string().into());
        if options.flip {
            // Two transposes rotate by 180 degrees without mirroring.
            args.push("-vf".into());
            args.push("transpose=2,transpose=2".into());
        }
        args.push(output_dir.join("%d.jpg").into());
        args
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn extract_frames(
        &self,
        input: &Path,
        output_dir: &Path,
        options: TranscodeOptions,
    ) -> Result<(), AppError> {
        let output = Command::new(&self.program)
            .args(Self::args(input, output_dir, options))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| AppError::Transcoder(format!("failed to run {}: {err}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(AppError::Transcoder(format!(
                "{} exited with {}: {tail}",
                self.program, output.status
            )));
        }

        Ok(())
    }
}

/// The single video below `upload_dir`.
pub async fn find_video(upload_dir: &Path) -> Result<PathBuf, AppError> {
    let dir = upload_dir.to_path_buf();
    let videos = tokio::task::spawn_blocking(move || find_media(&dir, MediaKind::Video)).await??;
    videos
        .into_iter()
        .next()
        .ok_or_else(|| AppError::Extraction("no video found".into()))
}

/// Transcodes `video` into a scratch directory, then copies every frame to its
/// indexed location below `data_dir`. `size` grows by one per placed frame.
/// The scratch directory is removed on every return path.
pub async fn extract_video_frames(
    video: &Path,
    data_dir: &Path,
    options: TranscodeOptions,
    transcoder: &dyn Transcoder,
    cancel: &CancellationToken,
    size: &mut u64,
) -> Result<u64, AppError> {
    let scratch = tempfile::Builder::new()
        .prefix("ingest-")
        .suffix(".data")
        .tempdir()?;

    info!(video = %video.display(), quality = options.quality, flip = options.flip, "extracting frames");
    transcoder
        .extract_frames(video, scratch.path(), options)
        .await?;

    let mut frame: u64 = 0;
    loop {
        let produced = scratch.path().join(format!("{frame}.jpg"));
        if !tokio::fs::try_exists(&produced).await? {
            break;
        }
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled("frame extraction cancelled".into()));
        }

        let target = frame_path(frame, data_dir);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&produced, &target).await?;
        *size = size.saturating_add(1);
        frame = frame.saturating_add(1);
    }

    if frame == 0 {
        return Err(AppError::Extraction(format!(
            "transcoder produced no frames for {}",
            video.display()
        )));
    }

    debug!(frames = frame, "video frames placed");
    Ok(frame)
}
