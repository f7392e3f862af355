use std::path::{Path, PathBuf};

use common::{
    error::AppError,
    storage::types::{job::Job, segment::Segment, task::TaskMode},
};
use futures::StreamExt;
use state_machines::core::GuardError;
use tracing::{debug, info, instrument};

use super::{
    context::PipelineContext,
    state::{Cached, FramesIndexed, IngestionMachine, Ready, Segmented, Sourced, Unpacked, Validated},
};
use crate::utils::{
    archive::find_and_unpack,
    images::{discover_images, link_frames, normalize_images},
    meta_cache::ImageMetaCache,
    segmenter::{effective_overlap, segment},
    sources::{
        copy_from_share, fetch_remote_files, plan_remote_files, plan_share_copies,
        source_client_files, SourcedEntries,
    },
    validation::{ensure_valid, FileCounts},
    video::{extract_video_frames, find_video, translate_quality, TranscodeOptions},
};

const PREPARING_FILES: &str = "Files are being prepared..";
const COPYING_FROM_SHARE: &str = "Data are being copied from share..";
const DOWNLOADING_FILES: &str = "Files are being downloaded..";
const UNPACKING_ARCHIVE: &str = "Archive is being unpacked..";
const EXTRACTING_VIDEO: &str = "Video is being extracted..";
const BUILDING_META_CACHE: &str = "Image meta cache is being built..";
const SAVING_TASK: &str = "Task is being saved in database";

/// How many source names `data_source` lists for image uploads.
const DATA_SOURCE_PREVIEW: usize = 2;

#[instrument(level = "trace", skip_all, fields(task_id = %ctx.task_id))]
pub async fn source_entries(
    machine: IngestionMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Sourced>, AppError> {
    ctx.stage = "source";
    ctx.ensure_not_cancelled()?;
    ctx.set_status(PREPARING_FILES).await?;

    let payload = &ctx.ingestion.payload;
    let upload_dir = ctx.layout.upload_dir();
    let mut counts = FileCounts::default();

    source_client_files(&upload_dir, &payload.client_files, &mut counts).await?;
    let share_copies = plan_share_copies(
        &ctx.pipeline_config.share_root,
        &upload_dir,
        &payload.server_files,
        &mut counts,
    )?;
    let downloads = plan_remote_files(&upload_dir, &payload.remote_files, &mut counts)?;

    info!(
        task_id = %ctx.task_id,
        images = counts.image,
        directories = counts.directory,
        videos = counts.video,
        archives = counts.archive,
        share_copies = share_copies.len(),
        downloads = downloads.len(),
        "ingestion input classified"
    );

    ctx.sourced = SourcedEntries {
        counts,
        share_copies,
        downloads,
    };

    machine
        .source()
        .map_err(|(_, guard)| map_guard_error("source", &guard))
}

#[instrument(level = "trace", skip_all, fields(task_id = %ctx.task_id))]
pub async fn validate(
    machine: IngestionMachine<(), Sourced>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Validated>, AppError> {
    ctx.stage = "validate";
    ctx.ensure_not_cancelled()?;
    ensure_valid(&ctx.sourced.counts)?;
    ctx.task.mode = ctx.sourced.counts.mode();

    let share_copies = std::mem::take(&mut ctx.sourced.share_copies);
    if !share_copies.is_empty() {
        ctx.set_status(COPYING_FROM_SHARE).await?;
        let copied = copy_from_share(share_copies).await?;
        debug!(task_id = %ctx.task_id, copied, "share data copied");
    }

    if !ctx.sourced.downloads.is_empty() {
        ctx.set_status(DOWNLOADING_FILES).await?;
        ctx.ensure_not_cancelled()?;
        let bytes = fetch_remote_files(&ctx.sourced.downloads, ctx.services.fetcher()).await?;
        debug!(task_id = %ctx.task_id, bytes, "remote files downloaded");
    }

    machine
        .validate()
        .map_err(|(_, guard)| map_guard_error("validate", &guard))
}

#[instrument(level = "trace", skip_all, fields(task_id = %ctx.task_id))]
pub async fn unpack(
    machine: IngestionMachine<(), Validated>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Unpacked>, AppError> {
    ctx.stage = "unpack";
    ctx.ensure_not_cancelled()?;

    if ctx.sourced.counts.archive > 0 {
        ctx.set_status(UNPACKING_ARCHIVE).await?;
        let archive = find_and_unpack(&ctx.layout.upload_dir(), ctx.services.unpacker()).await?;
        ctx.archive = Some(archive);
    }

    machine
        .unpack()
        .map_err(|(_, guard)| map_guard_error("unpack", &guard))
}

#[instrument(level = "trace", skip_all, fields(task_id = %ctx.task_id, mode = ctx.task.mode.as_str()))]
pub async fn index_frames(
    machine: IngestionMachine<(), Unpacked>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), FramesIndexed>, AppError> {
    ctx.stage = "index_frames";
    ctx.ensure_not_cancelled()?;

    let data_source = match ctx.task.mode {
        TaskMode::Interpolation => extract_video(ctx).await?,
        TaskMode::Annotation => compress_images(ctx).await?,
    };

    info!(
        task_id = %ctx.task_id,
        frames = ctx.task.size,
        data_source = %data_source,
        "frames indexed"
    );
    ctx.task.data_source = Some(data_source);

    machine
        .index_frames()
        .map_err(|(_, guard)| map_guard_error("index_frames", &guard))
}

async fn extract_video(ctx: &mut PipelineContext<'_>) -> Result<String, AppError> {
    ctx.set_status(EXTRACTING_VIDEO).await?;

    let upload_dir = ctx.layout.upload_dir();
    let video = find_video(&upload_dir).await?;
    let options = TranscodeOptions {
        quality: translate_quality(ctx.task.image_quality),
        flip: ctx.task.flipped,
    };
    let services = ctx.services;
    let cancel = ctx.cancel;

    extract_video_frames(
        &video,
        &ctx.layout.data_dir(),
        options,
        services.transcoder(),
        cancel,
        &mut ctx.task.size,
    )
    .await?;

    Ok(relative_name(&video, &upload_dir))
}

async fn compress_images(ctx: &mut PipelineContext<'_>) -> Result<String, AppError> {
    let upload_dir = ctx.layout.upload_dir();
    let images = discover_images(&upload_dir).await?;
    let total = images.len();

    let stop = ctx.cancel.child_token();
    let normalized = normalize_images(
        images.clone(),
        ctx.task.image_quality,
        ctx.task.flipped,
        ctx.pipeline_config.tuning.normalize_concurrency,
        stop.clone(),
    );
    let mut normalized = std::pin::pin!(normalized);

    let outcome: Result<(), AppError> = async {
        let mut done: usize = 0;
        let mut reported: Option<usize> = None;
        while let Some(result) = normalized.next().await {
            result?;
            ctx.ensure_not_cancelled()?;
            done = done.saturating_add(1);
            let progress = done.saturating_mul(100) / total;
            if reported != Some(progress) {
                ctx.set_status(&format!("Images are being compressed.. {progress}%"))
                    .await?;
                reported = Some(progress);
            }
        }
        Ok(())
    }
    .await;

    if let Err(err) = outcome {
        // In-flight normalizers must finish before rollback removes the tree.
        stop.cancel();
        while normalized.next().await.is_some() {}
        return Err(err);
    }

    let mode = ctx.pipeline_config.frame_link_mode;
    link_frames(&images, &ctx.layout.data_dir(), mode, &mut ctx.task.size).await?;

    if let Some(archive) = &ctx.archive {
        return Ok(relative_name(archive, &upload_dir));
    }

    let preview: Vec<String> = images
        .iter()
        .take(DATA_SOURCE_PREVIEW)
        .map(|image| relative_name(image, &upload_dir))
        .collect();
    Ok(format!("{total} images: {}, ...", preview.join(", ")))
}

#[instrument(level = "trace", skip_all, fields(task_id = %ctx.task_id))]
pub async fn cache(
    machine: IngestionMachine<(), FramesIndexed>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Cached>, AppError> {
    ctx.stage = "cache";
    ctx.ensure_not_cancelled()?;
    ctx.set_status(BUILDING_META_CACHE).await?;

    let meta = ImageMetaCache::rebuild(
        ctx.layout.meta_cache_path(),
        ctx.task.mode,
        ctx.task.size,
        ctx.layout.data_dir(),
    )
    .await?;
    debug!(task_id = %ctx.task_id, entries = meta.original_size.len(), "meta cache ready");
    ctx.meta = Some(meta);

    machine
        .cache()
        .map_err(|(_, guard)| map_guard_error("cache", &guard))
}

#[instrument(level = "trace", skip_all, fields(task_id = %ctx.task_id))]
pub async fn persist_segments(
    machine: IngestionMachine<(), Cached>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Segmented>, AppError> {
    ctx.stage = "segment";
    ctx.ensure_not_cancelled()?;
    ctx.set_status(SAVING_TASK).await?;

    let overlap = effective_overlap(ctx.task.mode, ctx.task.overlap, ctx.task.segment_size);
    let ranges = segment(ctx.task.size, overlap, ctx.task.segment_size)?;
    ctx.task.overlap = Some(overlap);

    let segments: Vec<Segment> = ranges
        .iter()
        .map(|range| Segment::new(&ctx.task_id, range.start, range.stop))
        .collect();
    let jobs: Vec<Job> = segments.iter().map(Job::for_segment).collect();
    let segment_count = segments.len();

    ctx.task.finalize(segments, jobs, ctx.db).await?;
    ctx.segment_count = segment_count;

    debug!(
        task_id = %ctx.task_id,
        size = ctx.task.size,
        overlap,
        segment_size = ctx.task.segment_size,
        segment_count,
        "task segments persisted"
    );

    machine
        .segment()
        .map_err(|(_, guard)| map_guard_error("segment", &guard))
}

fn relative_name(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| PathBuf::from(path))
        .display()
        .to_string()
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid ingestion pipeline transition during {event}: {guard:?}"
    ))
}
