use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::segment::Segment;

#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Annotation,
    Validation,
    Completed,
}

stored_object!(Job, "job", {
    task_id: String,
    segment_id: String,
    status: JobStatus,
    #[serde(default)]
    assignee: Option<String>
});

impl Job {
    /// The single, unassigned job that owns `segment`.
    pub fn for_segment(segment: &Segment) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            task_id: segment.task_id.clone(),
            segment_id: segment.id.clone(),
            status: JobStatus::Annotation,
            assignee: None,
        }
    }

    pub async fn get_by_task(task_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let jobs: Vec<Job> = db
            .client
            .query("SELECT * FROM type::table($table_name) WHERE task_id = $task_id ORDER BY created_at ASC")
            .bind(("table_name", Self::table_name()))
            .bind(("task_id", task_id.to_string()))
            .await?
            .take(0)?;

        Ok(jobs)
    }
}
