use std::time::Duration;

use state_machines::state_machine;
use surrealdb::sql::Datetime as SurrealDatetime;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::ingestion_payload::IngestionPayload;

/// A worker that has not reported progress for this long is presumed dead.
pub const DEFAULT_LEASE_SECS: i64 = 3600;

#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum TaskState {
    #[serde(rename = "Queued")]
    #[default]
    Queued,
    #[serde(rename = "Started")]
    Started,
    #[serde(rename = "Finished")]
    Finished,
    #[serde(rename = "Failed")]
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "Queued",
            TaskState::Started => "Started",
            TaskState::Finished => "Finished",
            TaskState::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct TaskErrorInfo {
    pub code: Option<String>,
    pub message: String,
}

impl From<&AppError> for TaskErrorInfo {
    fn from(err: &AppError) -> Self {
        Self {
            code: Some(err.code().to_string()),
            message: err.to_string(),
        }
    }
}

/// What the status endpoint reports for a task id.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct RqStatus {
    pub state: TaskState,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum TaskTransition {
    Start,
    Finish,
    Fail,
}

impl TaskTransition {
    fn as_str(&self) -> &'static str {
        match self {
            TaskTransition::Start => "start",
            TaskTransition::Finish => "finish",
            TaskTransition::Fail => "fail",
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: QueueLifecycleMachine,
        initial: Queued,
        states: [Queued, Started, Finished, Failed],
        events {
            start {
                transition: { from: Queued, to: Started }
            }
            finish {
                transition: { from: Started, to: Finished }
            }
            fail {
                transition: { from: Queued, to: Failed }
                transition: { from: Started, to: Failed }
            }
        }
    }

    pub(super) fn queued() -> QueueLifecycleMachine<(), Queued> {
        QueueLifecycleMachine::new(())
    }

    pub(super) fn started() -> Option<QueueLifecycleMachine<(), Started>> {
        queued().start().ok()
    }
}

fn invalid_transition(state: &TaskState, event: TaskTransition) -> AppError {
    AppError::Validation(format!(
        "Invalid ingestion transition: {} -> {}",
        state.as_str(),
        event.as_str()
    ))
}

fn compute_next_state(state: &TaskState, event: TaskTransition) -> Result<TaskState, AppError> {
    use lifecycle::{queued, started};
    let next = match (state, event) {
        (TaskState::Queued, TaskTransition::Start) => {
            queued().start().ok().map(|_| TaskState::Started)
        }
        (TaskState::Queued, TaskTransition::Fail) => {
            queued().fail().ok().map(|_| TaskState::Failed)
        }
        (TaskState::Started, TaskTransition::Finish) => {
            started().and_then(|m| m.finish().ok()).map(|_| TaskState::Finished)
        }
        (TaskState::Started, TaskTransition::Fail) => {
            started().and_then(|m| m.fail().ok()).map(|_| TaskState::Failed)
        }
        _ => None,
    };
    next.ok_or_else(|| invalid_transition(state, event))
}

stored_object!(IngestionTask, "ingestion_task", {
    payload: IngestionPayload,
    state: TaskState,
    #[serde(default)]
    status_message: Option<String>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    locked_at: Option<chrono::DateTime<chrono::Utc>>,
    lease_duration_secs: i64,
    #[serde(default)]
    worker_id: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>
});

impl IngestionTask {
    /// Queue record for `task_id`; the record id is the task id, so there is
    /// never more than one live ingestion per task.
    pub fn new(task_id: &str, payload: IngestionPayload) -> Self {
        let now = chrono::Utc::now();

        Self {
            id: task_id.to_string(),
            payload,
            state: TaskState::Queued,
            status_message: None,
            locked_at: None,
            lease_duration_secs: DEFAULT_LEASE_SECS,
            worker_id: None,
            error_code: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.id
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.lease_duration_secs).unwrap_or(0))
    }

    /// Enqueues ingestion of `payload` for `task_id`.
    ///
    /// A failed record for the same id is replaced. A queued or running one is
    /// a validation error, and so is a finished one: its frames are already on
    /// disk and new data belongs to a new task.
    pub async fn enqueue(
        task_id: &str,
        payload: IngestionPayload,
        db: &SurrealDbClient,
    ) -> Result<IngestionTask, AppError> {
        if let Some(existing) = db.get_item::<IngestionTask>(task_id).await? {
            if existing.state != TaskState::Failed {
                return Err(AppError::Validation(format!(
                    "ingestion for task {task_id} is already {}",
                    existing.state.as_str()
                )));
            }
            let _removed: Option<IngestionTask> = db.delete_item(task_id).await?;
        }

        let task = Self::new(task_id, payload);
        db.store_item(task.clone()).await?;
        Ok(task)
    }

    /// Reports the queue state for `task_id`.
    ///
    /// A missing record reads as `Finished`: records are only ever absent for
    /// tasks that were never queued through this queue.
    pub async fn fetch_status(task_id: &str, db: &SurrealDbClient) -> Result<RqStatus, AppError> {
        let Some(task) = db.get_item::<IngestionTask>(task_id).await? else {
            return Ok(RqStatus {
                state: TaskState::Finished,
                message: None,
            });
        };

        let message = match task.state {
            TaskState::Queued | TaskState::Finished => None,
            TaskState::Started => task.status_message,
            TaskState::Failed => task.error_message.or(task.status_message),
        };

        Ok(RqStatus {
            state: task.state,
            message,
        })
    }

    pub async fn claim_next_ready(
        db: &SurrealDbClient,
        worker_id: &str,
        now: chrono::DateTime<chrono::Utc>,
        lease_duration: Duration,
    ) -> Result<Option<IngestionTask>, AppError> {
        debug_assert!(compute_next_state(&TaskState::Queued, TaskTransition::Start).is_ok());

        const CLAIM_QUERY: &str = r#"
            UPDATE (
                SELECT * FROM type::table($table)
                WHERE state = $queued
                ORDER BY created_at ASC
                LIMIT 1
            )
            SET state = $started,
                locked_at = $now,
                worker_id = $worker_id,
                lease_duration_secs = $lease_secs,
                updated_at = $now
            RETURN *;
        "#;

        let lease_secs = i64::try_from(lease_duration.as_secs()).unwrap_or(DEFAULT_LEASE_SECS);
        let mut result = db
            .client
            .query(CLAIM_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("queued", TaskState::Queued.as_str()))
            .bind(("started", TaskState::Started.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("worker_id", worker_id.to_string()))
            .bind(("lease_secs", lease_secs))
            .await?;

        let task: Option<IngestionTask> = result.take(0)?;
        Ok(task)
    }

    /// Overwrites the human readable progress text and renews the lease.
    pub async fn set_status(&self, message: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        const STATUS_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET status_message = $message,
                locked_at = $now,
                updated_at = $now
            WHERE state = $started
            RETURN NONE;
        "#;

        let now = chrono::Utc::now();
        db.client
            .query(STATUS_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("message", message.to_string()))
            .bind(("started", TaskState::Started.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .await?
            .check()?;

        Ok(())
    }

    pub async fn mark_finished(&self, db: &SurrealDbClient) -> Result<IngestionTask, AppError> {
        let next = compute_next_state(&self.state, TaskTransition::Finish)?;
        debug_assert_eq!(next, TaskState::Finished);

        const FINISH_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $finished,
                updated_at = $now,
                locked_at = NONE,
                worker_id = NONE,
                status_message = NONE,
                error_code = NONE,
                error_message = NONE
            WHERE state = $started AND worker_id = $worker_id
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(FINISH_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("finished", TaskState::Finished.as_str()))
            .bind(("started", TaskState::Started.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("worker_id", self.worker_id.clone().unwrap_or_default()))
            .await?;

        let updated: Option<IngestionTask> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.state, TaskTransition::Finish))
    }

    /// Marks the record failed. The last progress message is kept so the
    /// status endpoint can still show where the run stopped.
    pub async fn mark_failed(
        &self,
        error: TaskErrorInfo,
        db: &SurrealDbClient,
    ) -> Result<IngestionTask, AppError> {
        let next = compute_next_state(&self.state, TaskTransition::Fail)?;
        debug_assert_eq!(next, TaskState::Failed);

        const FAIL_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $failed,
                updated_at = $now,
                locked_at = NONE,
                worker_id = NONE,
                error_code = $error_code,
                error_message = $error_message
            WHERE state IN $allow_states
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(FAIL_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("failed", TaskState::Failed.as_str()))
            .bind((
                "allow_states",
                vec![TaskState::Queued.as_str(), TaskState::Started.as_str()],
            ))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("error_code", error.code.clone()))
            .bind(("error_message", error.message.clone()))
            .await?;

        let updated: Option<IngestionTask> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.state, TaskTransition::Fail))
    }

    /// Started records whose worker stopped renewing the lease.
    pub async fn expired_leases(
        db: &SurrealDbClient,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<IngestionTask>, AppError> {
        let tasks: Vec<IngestionTask> = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE state = $started
                   AND locked_at != NONE
                   AND time::unix($now) - time::unix(locked_at) >= lease_duration_secs
                 ORDER BY created_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("started", TaskState::Started.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .await?
            .take(0)?;

        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn create_payload() -> IngestionPayload {
        IngestionPayload {
            client_files: vec!["frame_000.png".into()],
            ..IngestionPayload::default()
        }
    }

    async fn memory_db() -> SurrealDbClient {
        let namespace = "test_ns";
        let database = Uuid::new_v4().to_string();
        SurrealDbClient::memory(namespace, &database)
            .await
            .expect("in-memory surrealdb")
    }

    #[test]
    fn test_new_task_defaults() {
        let task = IngestionTask::new("task-1", create_payload());

        assert_eq!(task.task_id(), "task-1");
        assert_eq!(task.state, TaskState::Queued);
        assert!(task.status_message.is_none());
        assert!(task.locked_at.is_none());
        assert!(task.worker_id.is_none());
        assert_eq!(task.lease_duration(), Duration::from_secs(3600));
    }

    #[test]
    fn test_transition_table() {
        assert_eq!(
            compute_next_state(&TaskState::Queued, TaskTransition::Start).expect("start"),
            TaskState::Started
        );
        assert_eq!(
            compute_next_state(&TaskState::Started, TaskTransition::Finish).expect("finish"),
            TaskState::Finished
        );
        assert!(compute_next_state(&TaskState::Queued, TaskTransition::Finish).is_err());
        assert!(compute_next_state(&TaskState::Finished, TaskTransition::Fail).is_err());
        assert!(compute_next_state(&TaskState::Failed, TaskTransition::Start).is_err());
    }

    #[tokio::test]
    async fn test_enqueue_is_single_flight() {
        let db = memory_db().await;

        IngestionTask::enqueue("task-1", create_payload(), &db)
            .await
            .expect("first enqueue");
        let second = IngestionTask::enqueue("task-1", create_payload(), &db).await;
        assert!(matches!(second, Err(AppError::Validation(_))));

        let status = IngestionTask::fetch_status("task-1", &db)
            .await
            .expect("status");
        assert_eq!(status.state, TaskState::Queued);
        assert!(status.message.is_none());
    }

    #[tokio::test]
    async fn test_claim_status_and_finish() {
        let db = memory_db().await;
        IngestionTask::enqueue("task-1", create_payload(), &db)
            .await
            .expect("enqueue");

        let worker_id = "worker-1";
        let claimed =
            IngestionTask::claim_next_ready(&db, worker_id, chrono::Utc::now(), Duration::from_secs(60))
                .await
                .expect("claim")
                .expect("task claimed");
        assert_eq!(claimed.state, TaskState::Started);
        assert_eq!(claimed.worker_id.as_deref(), Some(worker_id));

        let nothing_left =
            IngestionTask::claim_next_ready(&db, "worker-2", chrono::Utc::now(), Duration::from_secs(60))
                .await
                .expect("claim");
        assert!(nothing_left.is_none());

        claimed
            .set_status("Images are being compressed.. 50%", &db)
            .await
            .expect("status");
        let status = IngestionTask::fetch_status("task-1", &db)
            .await
            .expect("status");
        assert_eq!(status.state, TaskState::Started);
        assert_eq!(
            status.message.as_deref(),
            Some("Images are being compressed.. 50%")
        );

        let finished = claimed.mark_finished(&db).await.expect("finished");
        assert_eq!(finished.state, TaskState::Finished);
        assert!(finished.worker_id.is_none());
        assert!(finished.status_message.is_none());
    }

    #[tokio::test]
    async fn test_fail_reports_error_and_allows_resubmit() {
        let db = memory_db().await;
        IngestionTask::enqueue("task-1", create_payload(), &db)
            .await
            .expect("enqueue");
        let claimed =
            IngestionTask::claim_next_ready(&db, "worker-1", chrono::Utc::now(), Duration::from_secs(60))
                .await
                .expect("claim")
                .expect("claimed");

        let failed = claimed
            .mark_failed(
                TaskErrorInfo {
                    code: Some("validation".into()),
                    message: "no images found".into(),
                },
                &db,
            )
            .await
            .expect("failed");
        assert_eq!(failed.state, TaskState::Failed);

        let status = IngestionTask::fetch_status("task-1", &db)
            .await
            .expect("status");
        assert_eq!(status.state, TaskState::Failed);
        assert_eq!(status.message.as_deref(), Some("no images found"));

        let requeued = IngestionTask::enqueue("task-1", create_payload(), &db)
            .await
            .expect("resubmit after failure");
        assert_eq!(requeued.state, TaskState::Queued);
    }

    #[tokio::test]
    async fn test_finished_task_cannot_be_enqueued_again() {
        let db = memory_db().await;
        IngestionTask::enqueue("task-1", create_payload(), &db)
            .await
            .expect("enqueue");
        let claimed =
            IngestionTask::claim_next_ready(&db, "worker-1", chrono::Utc::now(), Duration::from_secs(60))
                .await
                .expect("claim")
                .expect("claimed");
        claimed.mark_finished(&db).await.expect("finished");

        let again = IngestionTask::enqueue("task-1", create_payload(), &db).await;
        assert!(matches!(again, Err(AppError::Validation(_))));

        let status = IngestionTask::fetch_status("task-1", &db)
            .await
            .expect("status");
        assert_eq!(status.state, TaskState::Finished);
    }

    #[tokio::test]
    async fn test_unknown_task_reads_as_finished() {
        let db = memory_db().await;
        let status = IngestionTask::fetch_status("missing", &db)
            .await
            .expect("status");
        assert_eq!(status.state, TaskState::Finished);
    }

    #[tokio::test]
    async fn test_expired_leases_only_returns_stale_started_records() {
        let db = memory_db().await;
        IngestionTask::enqueue("stale", create_payload(), &db)
            .await
            .expect("enqueue");
        IngestionTask::enqueue("waiting", create_payload(), &db)
            .await
            .expect("enqueue");

        let claimed_at = chrono::Utc::now() - chrono::Duration::seconds(120);
        IngestionTask::claim_next_ready(&db, "worker-1", claimed_at, Duration::from_secs(60))
            .await
            .expect("claim")
            .expect("claimed");

        let expired = IngestionTask::expired_leases(&db, chrono::Utc::now())
            .await
            .expect("expired");
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "stale");
    }
}
