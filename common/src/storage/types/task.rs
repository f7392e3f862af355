use std::path::Path;

use surrealdb::opt::PatchOp;
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, layout::TaskLayout},
    stored_object,
};

use super::{job::Job, segment::Segment};

pub const DEFAULT_IMAGE_QUALITY: u8 = 50;
pub const DEFAULT_INTERPOLATION_OVERLAP: u32 = 5;

#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskMode {
    #[default]
    Annotation,
    Interpolation,
}

impl TaskMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskMode::Annotation => "annotation",
            TaskMode::Interpolation => "interpolation",
        }
    }
}

/// Parameters supplied by whoever creates the task before any data is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSettings {
    pub name: String,
    pub overlap: Option<u32>,
    pub segment_size: u32,
    pub image_quality: u8,
    pub flipped: bool,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            overlap: None,
            segment_size: 0,
            image_quality: DEFAULT_IMAGE_QUALITY,
            flipped: false,
        }
    }
}

stored_object!(Task, "task", {
    name: String,
    size: u64,
    mode: TaskMode,
    overlap: Option<u32>,
    segment_size: u32,
    image_quality: u8,
    flipped: bool,
    #[serde(default)]
    data_source: Option<String>
});

const FINALIZE_TASK: &str = r"
    BEGIN TRANSACTION;

    FOR $segment IN $segments {
        CREATE type::thing('segment', $segment.id) CONTENT $segment;
    };

    FOR $job IN $jobs {
        CREATE type::thing('job', $job.id) CONTENT $job;
    };

    UPDATE type::thing('task', $task_id)
    SET size = $size,
        mode = $mode,
        overlap = $overlap,
        data_source = $data_source,
        updated_at = $now;

    COMMIT TRANSACTION;
";

impl Task {
    pub fn new(settings: TaskSettings) -> Result<Self, AppError> {
        if !(1..=100).contains(&settings.image_quality) {
            return Err(AppError::Validation(format!(
                "image quality must be within 1..=100, got {}",
                settings.image_quality
            )));
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            name: settings.name,
            size: 0,
            mode: TaskMode::default(),
            overlap: settings.overlap,
            segment_size: settings.segment_size,
            image_quality: settings.image_quality,
            flipped: settings.flipped,
            data_source: None,
        })
    }

    /// Creates the task record together with an empty directory tree below `data_dir`.
    pub async fn create_and_add_to_db(
        settings: TaskSettings,
        data_dir: &Path,
        db: &SurrealDbClient,
    ) -> Result<Task, AppError> {
        let task = Self::new(settings)?;
        task.layout(data_dir).create_fresh().await?;
        db.store_item(task.clone()).await?;
        Ok(task)
    }

    pub async fn get(id: &str, db: &SurrealDbClient) -> Result<Task, AppError> {
        db.get_item::<Task>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task {id}")))
    }

    pub fn layout(&self, data_dir: &Path) -> TaskLayout {
        TaskLayout::new(data_dir, &self.id)
    }

    pub async fn update_name(id: &str, name: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/name", name.to_string()))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::Datetime::from(Utc::now()),
            ))
            .await?;
        Ok(())
    }

    /// Writes the ingestion outcome in one transaction: every segment, its job,
    /// and the task's final `size`, `mode`, `overlap` and `data_source`.
    pub async fn finalize(
        &self,
        segments: Vec<Segment>,
        jobs: Vec<Job>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        if segments.len() != jobs.len() {
            return Err(AppError::InternalError(format!(
                "expected one job per segment, got {} segments and {} jobs",
                segments.len(),
                jobs.len()
            )));
        }

        db.client
            .query(FINALIZE_TASK)
            .bind(("segments", segments))
            .bind(("jobs", jobs))
            .bind(("task_id", self.id.clone()))
            .bind(("size", self.size))
            .bind(("mode", self.mode))
            .bind(("overlap", self.overlap))
            .bind(("data_source", self.data_source.clone()))
            .bind(("now", surrealdb::Datetime::from(Utc::now())))
            .await?
            .check()?;

        Ok(())
    }

    /// Fails if the task already holds frames or segments. Data is attached to
    /// a task once; more data means a new task.
    pub async fn ensure_not_ingested(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        if self.size > 0 {
            return Err(AppError::Validation(format!(
                "task {} already holds {} frames",
                self.id, self.size
            )));
        }
        if !Segment::get_by_task(&self.id, db).await?.is_empty() {
            return Err(AppError::Validation(format!(
                "task {} already has segments",
                self.id
            )));
        }
        Ok(())
    }

    /// Deletes the task, its segments and jobs, and its directory tree.
    pub async fn delete_with_data(
        id: &str,
        data_dir: &Path,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.delete_by_task::<Job>(id).await?;
        db.delete_by_task::<Segment>(id).await?;
        let _deleted: Option<Task> = db.delete_item(id).await?;
        TaskLayout::new(data_dir, id).remove().await?;
        debug!(task_id = id, "task rows and directory tree removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> SurrealDbClient {
        let database = Uuid::new_v4().to_string();
        SurrealDbClient::memory("test_ns", &database)
            .await
            .expect("in-memory surrealdb")
    }

    fn settings(segment_size: u32) -> TaskSettings {
        TaskSettings {
            name: "street scenes".into(),
            segment_size,
            ..TaskSettings::default()
        }
    }

    #[test]
    fn new_task_defaults() {
        let task = Task::new(settings(5)).expect("task");
        assert_eq!(task.size, 0);
        assert_eq!(task.mode, TaskMode::Annotation);
        assert_eq!(task.image_quality, DEFAULT_IMAGE_QUALITY);
        assert!(task.data_source.is_none());
    }

    #[test]
    fn new_task_rejects_quality_out_of_range() {
        for quality in [0_u8, 101] {
            let result = Task::new(TaskSettings {
                image_quality: quality,
                ..settings(0)
            });
            assert!(matches!(result, Err(AppError::Validation(_))));
        }
    }

    #[tokio::test]
    async fn create_and_finalize_task() {
        let db = memory_db().await;
        let base = tempfile::tempdir().expect("tempdir");

        let mut task = Task::create_and_add_to_db(settings(5), base.path(), &db)
            .await
            .expect("create");
        assert!(task.layout(base.path()).upload_dir().is_dir());

        task.size = 7;
        task.mode = TaskMode::Interpolation;
        task.data_source = Some("clip.mp4".into());

        let segments = vec![
            Segment::new(&task.id, 0, 4),
            Segment::new(&task.id, 5, 6),
        ];
        let jobs = segments.iter().map(Job::for_segment).collect();
        task.finalize(segments, jobs, &db).await.expect("finalize");

        let stored = Task::get(&task.id, &db).await.expect("stored task");
        assert_eq!(stored.size, 7);
        assert_eq!(stored.mode, TaskMode::Interpolation);
        assert_eq!(stored.data_source.as_deref(), Some("clip.mp4"));

        let segments = Segment::get_by_task(&task.id, &db).await.expect("segments");
        assert_eq!(segments.len(), 2);
        let jobs = Job::get_by_task(&task.id, &db).await.expect("jobs");
        assert_eq!(jobs.len(), 2);
    }

    #[tokio::test]
    async fn ingested_task_is_reported_as_such() {
        let db = memory_db().await;
        let base = tempfile::tempdir().expect("tempdir");
        let mut task = Task::create_and_add_to_db(settings(0), base.path(), &db)
            .await
            .expect("create");
        task.ensure_not_ingested(&db).await.expect("fresh task");

        db.store_item(Segment::new(&task.id, 0, 0))
            .await
            .expect("segment");
        assert!(matches!(
            task.ensure_not_ingested(&db).await,
            Err(AppError::Validation(_))
        ));

        db.delete_by_task::<Segment>(&task.id).await.expect("clear");
        task.size = 3;
        assert!(matches!(
            task.ensure_not_ingested(&db).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn delete_with_data_removes_rows_and_directory() {
        let db = memory_db().await;
        let base = tempfile::tempdir().expect("tempdir");
        let task = Task::create_and_add_to_db(settings(0), base.path(), &db)
            .await
            .expect("create");
        let segment = Segment::new(&task.id, 0, 0);
        db.store_item(Job::for_segment(&segment)).await.expect("job");
        db.store_item(segment).await.expect("segment");

        Task::delete_with_data(&task.id, base.path(), &db)
            .await
            .expect("delete");

        assert!(matches!(
            Task::get(&task.id, &db).await,
            Err(AppError::NotFound(_))
        ));
        assert!(Segment::get_by_task(&task.id, &db)
            .await
            .expect("segments")
            .is_empty());
        assert!(Job::get_by_task(&task.id, &db).await.expect("jobs").is_empty());
        assert!(!task.layout(base.path()).root().exists());
    }
}
