use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Segment, "segment", {
    task_id: String,
    start_frame: u64,
    stop_frame: u64
});

impl Segment {
    pub fn new(task_id: &str, start_frame: u64, stop_frame: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            task_id: task_id.to_string(),
            start_frame,
            stop_frame,
        }
    }

    /// Number of frames covered, both bounds inclusive.
    pub fn frame_count(&self) -> u64 {
        self.stop_frame
            .saturating_sub(self.start_frame)
            .saturating_add(1)
    }

    pub async fn get_by_task(task_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let segments: Vec<Segment> = db
            .client
            .query("SELECT * FROM type::table($table_name) WHERE task_id = $task_id ORDER BY start_frame ASC")
            .bind(("table_name", Self::table_name()))
            .bind(("task_id", task_id.to_string()))
            .await?
            .take(0)?;

        Ok(segments)
    }
}
