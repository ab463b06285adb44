use state_machines::state_machine;
use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum TaskState {
    #[serde(rename = "Pending")]
    #[default]
    Pending,
    #[serde(rename = "Processing")]
    Processing,
    #[serde(rename = "Completed")]
    Completed,
    #[serde(rename = "Failed")]
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "Pending",
            TaskState::Processing => "Processing",
            TaskState::Completed => "Completed",
            TaskState::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

#[derive(Debug, Clone, Copy)]
enum TaskTransition {
    Start,
    Complete,
    Fail,
}

impl TaskTransition {
    fn as_str(&self) -> &'static str {
        match self {
            TaskTransition::Start => "start",
            TaskTransition::Complete => "complete",
            TaskTransition::Fail => "fail",
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: TaskLifecycleMachine,
        initial: Pending,
        states: [Pending, Processing, Completed, Failed],
        events {
            start {
                transition: { from: Pending, to: Processing }
            }
            complete {
                transition: { from: Processing, to: Completed }
            }
            fail {
                transition: { from: Processing, to: Failed }
            }
        }
    }

    pub(super) fn pending() -> TaskLifecycleMachine<(), Pending> {
        TaskLifecycleMachine::new(())
    }
}

fn invalid_transition(state: &TaskState, event: TaskTransition) -> AppError {
    AppError::Validation(format!(
        "Invalid task transition: {} -> {}",
        state.as_str(),
        event.as_str()
    ))
}

/// Validate a transition against the typed lifecycle machine.
///
/// Terminal states have no outgoing events, so completed/failed tasks can
/// never be observed transitioning again.
fn compute_next_state(state: &TaskState, event: TaskTransition) -> Result<TaskState, AppError> {
    use lifecycle::*;
    match (state, event) {
        (TaskState::Pending, TaskTransition::Start) => pending()
            .start()
            .map(|_| TaskState::Processing)
            .map_err(|_| invalid_transition(state, event)),
        (TaskState::Processing, TaskTransition::Complete) => pending()
            .start()
            .map_err(|_| invalid_transition(state, event))?
            .complete()
            .map(|_| TaskState::Completed)
            .map_err(|_| invalid_transition(state, event)),
        (TaskState::Processing, TaskTransition::Fail) => pending()
            .start()
            .map_err(|_| invalid_transition(state, event))?
            .fail()
            .map(|_| TaskState::Failed)
            .map_err(|_| invalid_transition(state, event)),
        _ => Err(invalid_transition(state, event)),
    }
}

/// Task status as reported to polling clients.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct TaskStatusView {
    pub document_id: Option<String>,
    pub status: TaskState,
    pub error_message: Option<String>,
    pub upload_id: Option<String>,
    pub file_name: String,
}

stored_object!(IngestionTask, "ingestion_task", {
    collection_id: String,
    upload_id: Option<String>,
    document_id: Option<String>,
    file_name: String,
    temp_key: String,
    state: TaskState,
    error_message: Option<String>,
    worker_id: Option<String>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    locked_at: Option<chrono::DateTime<chrono::Utc>>
});

impl IngestionTask {
    pub fn new(
        collection_id: String,
        upload_id: String,
        file_name: String,
        temp_key: String,
    ) -> Self {
        let now = chrono::Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            collection_id,
            upload_id: Some(upload_id),
            document_id: None,
            file_name,
            temp_key,
            state: TaskState::Pending,
            error_message: None,
            worker_id: None,
            locked_at: None,
        }
    }

    pub async fn create_and_add_to_db(
        collection_id: String,
        upload_id: String,
        file_name: String,
        temp_key: String,
        db: &SurrealDbClient,
    ) -> Result<IngestionTask, AppError> {
        let task = Self::new(collection_id, upload_id, file_name, temp_key);
        db.store_item(task.clone()).await?;
        Ok(task)
    }

    /// Atomically claim the oldest pending task for a worker, flipping it to
    /// Processing. Returns `None` when the queue is empty.
    pub async fn claim_next_pending(
        db: &SurrealDbClient,
        worker_id: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<IngestionTask>, AppError> {
        debug_assert!(compute_next_state(&TaskState::Pending, TaskTransition::Start).is_ok());

        const CLAIM_QUERY: &str = r#"
            UPDATE (
                SELECT * FROM type::table($table)
                WHERE state = $pending
                ORDER BY created_at ASC
                LIMIT 1
            )
            SET state = $processing,
                worker_id = $worker_id,
                locked_at = $now,
                updated_at = $now
            RETURN *;
        "#;

        let mut result = db
            .client
            .query(CLAIM_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("pending", TaskState::Pending.as_str()))
            .bind(("processing", TaskState::Processing.as_str()))
            .bind(("worker_id", worker_id.to_string()))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let task: Option<IngestionTask> = result.take(0)?;
        Ok(task)
    }

    /// Record success and attach the resulting document id.
    pub async fn mark_completed(
        &self,
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<IngestionTask, AppError> {
        let next = compute_next_state(&self.state, TaskTransition::Complete)?;
        debug_assert_eq!(next, TaskState::Completed);

        const COMPLETE_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $completed,
                document_id = $document_id,
                error_message = NONE,
                worker_id = NONE,
                locked_at = NONE,
                updated_at = $now
            WHERE state = $processing
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(COMPLETE_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("completed", TaskState::Completed.as_str()))
            .bind(("processing", TaskState::Processing.as_str()))
            .bind(("document_id", document_id.to_string()))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let updated: Option<IngestionTask> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.state, TaskTransition::Complete))
    }

    /// Record failure with the captured error message. Terminal.
    pub async fn mark_failed(
        &self,
        error_message: String,
        db: &SurrealDbClient,
    ) -> Result<IngestionTask, AppError> {
        let next = compute_next_state(&self.state, TaskTransition::Fail)?;
        debug_assert_eq!(next, TaskState::Failed);

        const FAIL_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $failed,
                error_message = $error_message,
                worker_id = NONE,
                locked_at = NONE,
                updated_at = $now
            WHERE state = $processing
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(FAIL_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("failed", TaskState::Failed.as_str()))
            .bind(("processing", TaskState::Processing.as_str()))
            .bind(("error_message", error_message))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let updated: Option<IngestionTask> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.state, TaskTransition::Fail))
    }

    /// Status projection for polling clients.
    pub async fn status_view(
        db: &SurrealDbClient,
        task_id: &str,
    ) -> Result<TaskStatusView, AppError> {
        let task: Option<IngestionTask> = db.get_item(task_id).await?;
        let task = task.ok_or_else(|| AppError::NotFound(format!("Task {task_id}")))?;

        Ok(TaskStatusView {
            document_id: task.document_id,
            status: task.state,
            error_message: task.error_message,
            upload_id: task.upload_id,
            file_name: task.file_name,
        })
    }
}
