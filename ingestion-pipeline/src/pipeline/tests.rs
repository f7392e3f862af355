use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        layout::TaskLayout,
        types::{
            ingestion_payload::IngestionPayload,
            ingestion_task::{IngestionTask, TaskState},
            job::{Job, JobStatus},
            segment::Segment,
            task::{Task, TaskMode, TaskSettings},
        },
    },
    utils::config::FrameLinkMode,
};
use image::{Rgb, RgbImage};
use tempfile::TempDir;
use tokio::sync::Mutex;
use url::Url;
use uuid::Uuid;

use super::{
    config::{IngestionConfig, IngestionTuning},
    services::PipelineServices,
    IngestionPipeline,
};
use crate::utils::{
    archive::ArchiveUnpacker,
    frame_path::frame_path,
    meta_cache::{FrameSize, ImageMetaCache},
    remote::RemoteFetcher,
    video::{TranscodeOptions, Transcoder},
};

struct MockServices {
    video_frames: u64,
    fail_transcoder: bool,
    calls: Mutex<Vec<&'static str>>,
}

impl MockServices {
    fn new(video_frames: u64) -> Self {
        Self {
            video_frames,
            fail_transcoder: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self {
            fail_transcoder: true,
            ..Self::new(0)
        }
    }

    async fn record(&self, call: &'static str) {
        self.calls.lock().await.push(call);
    }

    async fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().await.clone()
    }
}

fn write_jpeg(path: &Path, width: u32, height: u32) {
    RgbImage::from_pixel(width, height, Rgb([90, 120, 150]))
        .save_with_format(path, image::ImageFormat::Jpeg)
        .expect("write jpeg");
}

fn write_png(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("mkdir");
    }
    RgbImage::from_pixel(width, height, Rgb([10, 200, 30]))
        .save_with_format(path, image::ImageFormat::Png)
        .expect("write png");
}

#[async_trait]
impl Transcoder for MockServices {
    async fn extract_frames(
        &self,
        _input: &Path,
        output_dir: &Path,
        _options: TranscodeOptions,
    ) -> Result<(), AppError> {
        self.record("transcode").await;
        if self.fail_transcoder {
            return Err(AppError::Transcoder("exit status: 1".into()));
        }
        for frame in 0..self.video_frames {
            write_jpeg(&output_dir.join(format!("{frame}.jpg")), 16, 9);
        }
        Ok(())
    }
}

#[async_trait]
impl ArchiveUnpacker for MockServices {
    async fn unpack(&self, _archive: &Path, target_dir: &Path) -> Result<(), AppError> {
        self.record("unpack").await;
        write_png(&target_dir.join("unpacked/b.png"), 5, 4);
        write_png(&target_dir.join("unpacked/a.png"), 3, 2);
        Ok(())
    }
}

#[async_trait]
impl RemoteFetcher for MockServices {
    async fn fetch(&self, _url: &Url, target: &Path) -> Result<u64, AppError> {
        self.record("fetch").await;
        write_png(target, 7, 7);
        Ok(tokio::fs::metadata(target).await?.len())
    }
}

impl PipelineServices for MockServices {
    fn transcoder(&self) -> &dyn Transcoder {
        self
    }

    fn unpacker(&self) -> &dyn ArchiveUnpacker {
        self
    }

    fn fetcher(&self) -> &dyn RemoteFetcher {
        self
    }
}

async fn setup_db() -> SurrealDbClient {
    let namespace = "pipeline_test";
    let database = Uuid::new_v4().to_string();
    let db = SurrealDbClient::memory(namespace, &database)
        .await
        .expect("Failed to create in-memory SurrealDB");
    db.ensure_initialized()
        .await
        .expect("Failed to build indexes");
    db
}

struct Harness {
    db: Arc<SurrealDbClient>,
    services: Arc<MockServices>,
    pipeline: IngestionPipeline,
    data: TempDir,
    share: TempDir,
}

impl Harness {
    async fn new(services: MockServices) -> Self {
        let db = Arc::new(setup_db().await);
        let data = tempfile::tempdir().expect("data dir");
        let share = tempfile::tempdir().expect("share dir");
        let services = Arc::new(services);
        let config = IngestionConfig {
            tuning: IngestionTuning {
                normalize_concurrency: 2,
                ..IngestionTuning::default()
            },
            data_dir: data.path().to_path_buf(),
            share_root: share.path().to_path_buf(),
            frame_link_mode: FrameLinkMode::Copy,
        };
        let pipeline = IngestionPipeline::with_services(
            Arc::clone(&db),
            config,
            Arc::clone(&services) as Arc<dyn PipelineServices>,
        )
        .expect("pipeline");

        Self {
            db,
            services,
            pipeline,
            data,
            share,
        }
    }

    async fn create_task(&self, segment_size: u32, overlap: Option<u32>) -> (Task, TaskLayout) {
        let task = Task::create_and_add_to_db(
            TaskSettings {
                name: "pipeline test".into(),
                segment_size,
                overlap,
                ..TaskSettings::default()
            },
            self.data.path(),
            &self.db,
        )
        .await
        .expect("task created");
        let layout = task.layout(self.data.path());
        (task, layout)
    }

    async fn reserve(&self, task: &Task, payload: IngestionPayload) -> IngestionTask {
        let queued = IngestionTask::enqueue(&task.id, payload, &self.db)
            .await
            .expect("enqueue");
        IngestionTask::claim_next_ready(&self.db, "worker-test", Utc::now(), queued.lease_duration())
            .await
            .expect("claim succeeds")
            .expect("task claimed")
    }

    async fn status(&self, task: &Task) -> (TaskState, Option<String>) {
        let status = IngestionTask::fetch_status(&task.id, &self.db)
            .await
            .expect("status");
        (status.state, status.message)
    }

    async fn segments(&self, task: &Task) -> Vec<(u64, u64)> {
        Segment::get_by_task(&task.id, &self.db)
            .await
            .expect("segments")
            .into_iter()
            .map(|segment| (segment.start_frame, segment.stop_frame))
            .collect()
    }
}

fn client_payload(names: &[&str]) -> IngestionPayload {
    IngestionPayload {
        client_files: names.iter().map(ToString::to_string).collect(),
        ..IngestionPayload::default()
    }
}

#[tokio::test]
async fn video_is_split_into_frames_segments_and_jobs() {
    let harness = Harness::new(MockServices::new(12)).await;
    let (task, layout) = harness.create_task(5, Some(0)).await;
    tokio::fs::write(layout.upload_dir().join("clip.mp4"), b"not really a video")
        .await
        .expect("write video");

    let claimed = harness.reserve(&task, client_payload(&["clip.mp4"])).await;
    harness
        .pipeline
        .process_task(claimed)
        .await
        .expect("pipeline succeeds");

    let stored = Task::get(&task.id, &harness.db).await.expect("task");
    assert_eq!(stored.size, 12);
    assert_eq!(stored.mode, TaskMode::Interpolation);
    assert_eq!(stored.data_source.as_deref(), Some("clip.mp4"));
    assert_eq!(stored.overlap, Some(0));

    assert_eq!(
        harness.segments(&task).await,
        vec![(0, 4), (5, 9), (10, 11)]
    );
    let jobs = Job::get_by_task(&task.id, &harness.db).await.expect("jobs");
    assert_eq!(jobs.len(), 3);
    assert!(jobs.iter().all(|job| job.status == JobStatus::Annotation));

    for frame in 0..12 {
        assert!(frame_path(frame, &layout.data_dir()).exists(), "frame {frame}");
    }
    let meta = ImageMetaCache::read(&layout.meta_cache_path()).expect("meta cache");
    assert_eq!(
        meta.original_size,
        vec![FrameSize {
            width: 16,
            height: 9
        }]
    );

    assert_eq!(harness.status(&task).await.0, TaskState::Finished);
    assert_eq!(harness.services.calls().await, vec!["transcode"]);
}

#[tokio::test]
async fn images_are_normalized_and_indexed_in_path_order() {
    let harness = Harness::new(MockServices::new(0)).await;
    let (task, layout) = harness.create_task(2, None).await;
    let upload = layout.upload_dir();
    write_png(&upload.join("b.png"), 4, 4);
    write_png(&upload.join("a.png"), 6, 3);
    write_png(&upload.join("c.png"), 2, 8);
    tokio::fs::write(upload.join("notes.txt"), b"junk")
        .await
        .expect("write junk");

    let claimed = harness
        .reserve(&task, client_payload(&["b.png", "a.png", "c.png", "notes.txt"]))
        .await;
    harness
        .pipeline
        .process_task(claimed)
        .await
        .expect("pipeline succeeds");

    let stored = Task::get(&task.id, &harness.db).await.expect("task");
    assert_eq!(stored.size, 3);
    assert_eq!(stored.mode, TaskMode::Annotation);
    assert_eq!(stored.overlap, Some(0));
    assert_eq!(
        stored.data_source.as_deref(),
        Some("3 images: a.png, b.png, ...")
    );
    assert_eq!(harness.segments(&task).await, vec![(0, 1), (2, 2)]);
    assert!(!upload.join("notes.txt").exists());

    let first = image::open(frame_path(0, &layout.data_dir())).expect("frame 0");
    assert_eq!((first.width(), first.height()), (6, 3));

    let meta = ImageMetaCache::read(&layout.meta_cache_path()).expect("meta cache");
    let sizes: Vec<(u32, u32)> = meta
        .original_size
        .iter()
        .map(|size| (size.width, size.height))
        .collect();
    assert_eq!(sizes, vec![(6, 3), (4, 4), (2, 8)]);
    assert!(harness.services.calls().await.is_empty());
}

#[tokio::test]
async fn archive_is_unpacked_and_named_as_data_source() {
    let harness = Harness::new(MockServices::new(0)).await;
    let (task, layout) = harness.create_task(0, None).await;
    tokio::fs::write(layout.upload_dir().join("bundle.zip"), b"zip")
        .await
        .expect("write archive");

    let claimed = harness.reserve(&task, client_payload(&["bundle.zip"])).await;
    harness
        .pipeline
        .process_task(claimed)
        .await
        .expect("pipeline succeeds");

    let stored = Task::get(&task.id, &harness.db).await.expect("task");
    assert_eq!(stored.size, 2);
    assert_eq!(stored.mode, TaskMode::Annotation);
    assert_eq!(stored.data_source.as_deref(), Some("bundle.zip"));
    assert_eq!(harness.segments(&task).await, vec![(0, 1)]);
    assert!(!layout.upload_dir().join("bundle.zip").exists());
    assert_eq!(harness.services.calls().await, vec!["unpack"]);
}

#[tokio::test]
async fn share_directories_are_copied_before_indexing() {
    let harness = Harness::new(MockServices::new(0)).await;
    let (task, layout) = harness.create_task(0, None).await;
    write_png(&harness.share.path().join("sequence/0001.png"), 3, 3);
    write_png(&harness.share.path().join("sequence/0002.png"), 3, 3);

    let payload = IngestionPayload {
        server_files: vec!["sequence".into()],
        ..IngestionPayload::default()
    };
    let claimed = harness.reserve(&task, payload).await;
    harness
        .pipeline
        .process_task(claimed)
        .await
        .expect("pipeline succeeds");

    let stored = Task::get(&task.id, &harness.db).await.expect("task");
    assert_eq!(stored.size, 2);
    assert!(layout.upload_dir().join("sequence/0002.png").exists());
    assert!(harness.share.path().join("sequence/0002.png").exists());
}

#[tokio::test]
async fn remote_files_are_downloaded_into_the_upload_dir() {
    let harness = Harness::new(MockServices::new(0)).await;
    let (task, layout) = harness.create_task(0, None).await;

    let payload = IngestionPayload {
        remote_files: vec!["https://example.com/frames/remote.png".into()],
        ..IngestionPayload::default()
    };
    let claimed = harness.reserve(&task, payload).await;
    harness
        .pipeline
        .process_task(claimed)
        .await
        .expect("pipeline succeeds");

    let stored = Task::get(&task.id, &harness.db).await.expect("task");
    assert_eq!(stored.size, 1);
    assert!(layout.upload_dir().join("remote.png").exists());
    assert_eq!(harness.services.calls().await, vec!["fetch"]);
}

#[tokio::test]
async fn invalid_combination_rolls_back_the_task() {
    let harness = Harness::new(MockServices::new(3)).await;
    let (task, layout) = harness.create_task(5, None).await;
    tokio::fs::write(layout.upload_dir().join("clip.mp4"), b"video")
        .await
        .expect("write video");
    write_png(&layout.upload_dir().join("a.png"), 2, 2);

    let claimed = harness
        .reserve(&task, client_payload(&["clip.mp4", "a.png"]))
        .await;
    let result = harness.pipeline.process_task(claimed).await;
    assert!(matches!(result, Err(AppError::Processing(_))));

    let (state, message) = harness.status(&task).await;
    assert_eq!(state, TaskState::Failed);
    assert!(message
        .as_deref()
        .is_some_and(|m| m.contains("1 image(s), 0 dir(s), 1 video(s), 0 archive(s)")));

    assert!(matches!(
        Task::get(&task.id, &harness.db).await,
        Err(AppError::NotFound(_))
    ));
    assert!(!layout.root().exists());
    let report = tokio::fs::read_to_string(layout.log_path())
        .await
        .expect("failure log");
    assert!(report.contains("stage: validate"));
    assert!(report.contains("code: validation"));
    assert!(harness.services.calls().await.is_empty());
}

#[tokio::test]
async fn transcoder_failure_rolls_back_partial_work() {
    let harness = Harness::new(MockServices::failing()).await;
    let (task, layout) = harness.create_task(5, None).await;
    tokio::fs::write(layout.upload_dir().join("clip.mp4"), b"video")
        .await
        .expect("write video");

    let claimed = harness.reserve(&task, client_payload(&["clip.mp4"])).await;
    let result = harness.pipeline.process_task(claimed).await;
    assert!(result.is_err());

    let (state, _) = harness.status(&task).await;
    assert_eq!(state, TaskState::Failed);
    assert!(!layout.root().exists());
    assert!(harness.segments(&task).await.is_empty());
    let report = tokio::fs::read_to_string(layout.log_path())
        .await
        .expect("failure log");
    assert!(report.contains("stage: index_frames"));
}

#[tokio::test]
async fn shutdown_cancels_and_rolls_back() {
    let harness = Harness::new(MockServices::new(4)).await;
    let (task, layout) = harness.create_task(0, None).await;
    tokio::fs::write(layout.upload_dir().join("clip.mp4"), b"video")
        .await
        .expect("write video");

    let claimed = harness.reserve(&task, client_payload(&["clip.mp4"])).await;
    harness.pipeline.shutdown_token().cancel();
    let result = harness.pipeline.process_task(claimed).await;
    assert!(result.is_err());

    let stored: IngestionTask = harness
        .db
        .get_item(&task.id)
        .await
        .expect("queue record")
        .expect("record present");
    assert_eq!(stored.state, TaskState::Failed);
    assert_eq!(stored.error_code.as_deref(), Some("cancelled"));
    assert!(!layout.root().exists());
    let report = tokio::fs::read_to_string(layout.log_path())
        .await
        .expect("failure log");
    assert!(report.contains("stage: source"));
    assert!(harness.services.calls().await.is_empty());
}

#[tokio::test]
async fn missing_task_record_fails_the_queue_entry() {
    let harness = Harness::new(MockServices::new(0)).await;
    let (task, _) = harness.create_task(0, None).await;
    let claimed = harness.reserve(&task, client_payload(&["a.png"])).await;
    Task::delete_with_data(&task.id, harness.data.path(), &harness.db)
        .await
        .expect("delete");

    let result = harness.pipeline.process_task(claimed).await;
    assert!(result.is_err());
    assert_eq!(harness.status(&task).await.0, TaskState::Failed);
}

#[tokio::test]
async fn second_ingestion_leaves_an_ingested_task_intact() {
    let harness = Harness::new(MockServices::new(0)).await;
    let (task, layout) = harness.create_task(1, None).await;
    write_png(&layout.upload_dir().join("one.png"), 8, 5);
    write_png(&layout.upload_dir().join("two.png"), 5, 8);

    let claimed = harness
        .reserve(&task, client_payload(&["one.png", "two.png"]))
        .await;
    harness
        .pipeline
        .process_task(claimed)
        .await
        .expect("first ingestion");
    assert_eq!(harness.segments(&task).await, vec![(0, 0), (1, 1)]);

    let again = IngestionTask::enqueue(&task.id, client_payload(&["one.png"]), &harness.db).await;
    assert!(matches!(again, Err(AppError::Validation(_))));

    // A stale queue entry that slipped past enqueue must not touch the task.
    let _old: Option<IngestionTask> = harness.db.delete_item(&task.id).await.expect("drop record");
    write_png(&layout.upload_dir().join("three.png"), 3, 3);
    let claimed = harness.reserve(&task, client_payload(&["three.png"])).await;
    let result = harness.pipeline.process_task(claimed).await;
    assert!(result.is_err());

    let (state, message) = harness.status(&task).await;
    assert_eq!(state, TaskState::Failed);
    assert!(message.is_some_and(|message| message.contains("already holds 2 frames")));

    let stored = Task::get(&task.id, &harness.db).await.expect("task kept");
    assert_eq!(stored.size, 2);
    assert_eq!(harness.segments(&task).await, vec![(0, 0), (1, 1)]);
    assert!(frame_path(0, &layout.data_dir()).is_file());
    assert!(frame_path(1, &layout.data_dir()).is_file());
    assert!(!frame_path(2, &layout.data_dir()).exists());
}

#[tokio::test]
async fn meta_cache_is_rebuilt_after_deletion() {
    let harness = Harness::new(MockServices::new(0)).await;
    let (task, layout) = harness.create_task(0, None).await;
    write_png(&layout.upload_dir().join("one.png"), 8, 5);
    write_png(&layout.upload_dir().join("two.png"), 5, 8);

    let claimed = harness
        .reserve(&task, client_payload(&["one.png", "two.png"]))
        .await;
    harness
        .pipeline
        .process_task(claimed)
        .await
        .expect("pipeline succeeds");

    let stored = Task::get(&task.id, &harness.db).await.expect("task");
    let cache_path: PathBuf = layout.meta_cache_path();
    let before = ImageMetaCache::read(&cache_path).expect("cache");
    tokio::fs::remove_file(&cache_path).await.expect("remove");

    let rebuilt = ImageMetaCache::get(cache_path, stored.mode, stored.size, layout.data_dir())
        .await
        .expect("rebuild");
    assert_eq!(before, rebuilt);
}
