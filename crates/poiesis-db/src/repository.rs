//! The persistence port.
//!
//! Writers are role-scoped: Torc writes state and log envelopes, Texam
//! writes per-executor logs, the API writes creation, Cancel writes the
//! CANCELING/CANCELED transitions. Every method is an individually atomic
//! write.

use async_trait::async_trait;

use poiesis_models::tes::TesState;

use crate::error::DbError;
use crate::schema::TaskDocument;

/// Terminal phase of an executor container, as observed by the monitor.
///
/// Maps onto the persisted `exit_code`: 0 iff `Succeeded`, 1 otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorPhase {
    Succeeded,
    Failed,
}

/// Filter for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Anchored prefix match on the task name.
    pub name_prefix: Option<String>,
    pub state: Option<TesState>,
    /// Tag `(key, value)` pairs; an empty value means "key exists".
    pub tags: Vec<(String, String)>,
    pub user_id: Option<String>,
}

/// One page of task documents plus the token for the next page.
#[derive(Debug, Clone)]
pub struct TaskPage {
    pub tasks: Vec<TaskDocument>,
    pub next_page_token: Option<String>,
}

/// Durable storage of task documents and their append-only logs.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a new task document, returning its insertion-order id.
    async fn insert_task(&self, doc: TaskDocument) -> Result<String, DbError>;

    /// Fetch a task by its UUID.
    async fn get_task(&self, task_id: &str) -> Result<TaskDocument, DbError>;

    /// Set the task state. A no-op when the state is unchanged; always
    /// bumps `updated_at` when a write happens.
    async fn update_task_state(&self, task_id: &str, state: TesState) -> Result<(), DbError>;

    /// Append a fresh attempt log with `start_time = now`.
    async fn append_task_log(&self, task_id: &str) -> Result<(), DbError>;

    /// Append an empty executor log (`exit_code = 0`) to the current
    /// attempt.
    async fn append_executor_log(&self, task_id: &str) -> Result<(), DbError>;

    /// Set `end_time` on the current attempt log.
    async fn set_task_log_end(&self, task_id: &str) -> Result<(), DbError>;

    /// Set the system-log lines on the current attempt log.
    async fn set_system_logs(&self, task_id: &str, lines: &[String]) -> Result<(), DbError>;

    /// Record an executor's terminal state.
    ///
    /// `executor_name` must be a `te-<uuid>-<idx>` job name; the write
    /// addresses `logs[-1].logs[idx]` of the named task and sets
    /// `end_time = now` and the exit code derived from `phase`.
    async fn update_executor_log(
        &self,
        executor_name: &str,
        phase: ExecutorPhase,
        stdout: Option<String>,
        stderr: Option<String>,
    ) -> Result<(), DbError>;

    /// List tasks matching `filter`, paginated in insertion order.
    async fn list_tasks(
        &self,
        filter: &TaskFilter,
        page_size: Option<u32>,
        page_token: Option<&str>,
    ) -> Result<TaskPage, DbError>;
}
