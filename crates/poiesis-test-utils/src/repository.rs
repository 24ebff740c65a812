//! In-memory [`TaskRepository`] with state-history capture.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use poiesis_db::repository::{ExecutorPhase, TaskFilter, TaskPage, TaskRepository};
use poiesis_db::schema::TaskDocument;
use poiesis_db::DbError;
use poiesis_models::names::ExecutorName;
use poiesis_models::tes::{TesExecutorLog, TesState, TesTaskLog};

#[derive(Default)]
struct RepoState {
    /// Documents in insertion order.
    docs: Vec<TaskDocument>,
    /// Every observed state per task, in write order (including the
    /// initial INITIALIZING).
    history: HashMap<String, Vec<TesState>>,
}

/// In-memory repository; records every state transition for invariant
/// assertions.
#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<RepoState>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// The sequence of states the task has been through.
    pub fn state_history(&self, task_id: &str) -> Vec<TesState> {
        self.state
            .lock()
            .unwrap()
            .history
            .get(task_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of a task document.
    pub fn document(&self, task_id: &str) -> Option<TaskDocument> {
        self.state
            .lock()
            .unwrap()
            .docs
            .iter()
            .find(|d| d.task_id == task_id)
            .cloned()
    }

    fn with_doc<R>(
        &self,
        task_id: &str,
        f: impl FnOnce(&mut TaskDocument) -> Result<R, DbError>,
    ) -> Result<R, DbError> {
        let mut state = self.state.lock().unwrap();
        let doc = state
            .docs
            .iter_mut()
            .find(|d| d.task_id == task_id)
            .ok_or_else(|| DbError::NotFound(task_id.to_owned()))?;
        f(doc)
    }
}

#[async_trait]
impl TaskRepository for InMemoryRepository {
    async fn insert_task(&self, doc: TaskDocument) -> Result<String, DbError> {
        let mut state = self.state.lock().unwrap();
        let id = state.docs.len().to_string();
        state
            .history
            .entry(doc.task_id.clone())
            .or_default()
            .push(doc.state);
        state.docs.push(doc);
        Ok(id)
    }

    async fn get_task(&self, task_id: &str) -> Result<TaskDocument, DbError> {
        self.with_doc(task_id, |doc| Ok(doc.clone()))
    }

    async fn update_task_state(&self, task_id: &str, new_state: TesState) -> Result<(), DbError> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let doc = state
            .docs
            .iter_mut()
            .find(|d| d.task_id == task_id)
            .ok_or_else(|| DbError::NotFound(task_id.to_owned()))?;
        if doc.state == new_state {
            return Ok(());
        }
        doc.state = new_state;
        doc.task.state = Some(new_state);
        doc.updated_at = Utc::now();
        state
            .history
            .entry(task_id.to_owned())
            .or_default()
            .push(new_state);
        Ok(())
    }

    async fn append_task_log(&self, task_id: &str) -> Result<(), DbError> {
        self.with_doc(task_id, |doc| {
            doc.task.logs.get_or_insert_default().push(TesTaskLog {
                start_time: Some(Utc::now()),
                ..TesTaskLog::default()
            });
            Ok(())
        })
    }

    async fn append_executor_log(&self, task_id: &str) -> Result<(), DbError> {
        self.with_doc(task_id, |doc| {
            let attempt = doc
                .task
                .logs
                .as_mut()
                .and_then(|logs| logs.last_mut())
                .ok_or_else(|| DbError::MissingLogSlot {
                    task_id: task_id.to_owned(),
                    index: 0,
                })?;
            attempt.logs.push(TesExecutorLog {
                start_time: Some(Utc::now()),
                exit_code: 0,
                ..TesExecutorLog::default()
            });
            Ok(())
        })
    }

    async fn set_task_log_end(&self, task_id: &str) -> Result<(), DbError> {
        self.with_doc(task_id, |doc| {
            if let Some(attempt) = doc.task.logs.as_mut().and_then(|logs| logs.last_mut()) {
                attempt.end_time = Some(Utc::now());
            }
            Ok(())
        })
    }

    async fn set_system_logs(&self, task_id: &str, lines: &[String]) -> Result<(), DbError> {
        self.with_doc(task_id, |doc| {
            if let Some(attempt) = doc.task.logs.as_mut().and_then(|logs| logs.last_mut()) {
                attempt.system_logs = Some(lines.to_vec());
            }
            Ok(())
        })
    }

    async fn update_executor_log(
        &self,
        executor_name: &str,
        phase: ExecutorPhase,
        stdout: Option<String>,
        stderr: Option<String>,
    ) -> Result<(), DbError> {
        let name = ExecutorName::parse(executor_name)?;
        let task_id = name.task_id.to_string();
        self.with_doc(&task_id, |doc| {
            let exec_log = doc
                .task
                .logs
                .as_mut()
                .and_then(|logs| logs.last_mut())
                .and_then(|attempt| attempt.logs.get_mut(name.index))
                .ok_or(DbError::MissingLogSlot {
                    task_id: task_id.clone(),
                    index: name.index,
                })?;
            exec_log.end_time = Some(Utc::now());
            exec_log.stdout = Some(stdout.unwrap_or_default());
            exec_log.stderr = Some(stderr.unwrap_or_default());
            exec_log.exit_code = match phase {
                ExecutorPhase::Succeeded => 0,
                ExecutorPhase::Failed => 1,
            };
            Ok(())
        })
    }

    async fn list_tasks(
        &self,
        filter: &TaskFilter,
        page_size: Option<u32>,
        page_token: Option<&str>,
    ) -> Result<TaskPage, DbError> {
        let state = self.state.lock().unwrap();
        let start: usize = match page_token {
            Some(token) => token
                .parse()
                .map_err(|_| DbError::InvalidPageToken(token.to_owned()))?,
            None => 0,
        };
        let limit = page_size.unwrap_or(256) as usize;

        let mut tasks = Vec::new();
        let mut next_page_token = None;
        for (index, doc) in state.docs.iter().enumerate().skip(start) {
            if !matches(filter, doc) {
                continue;
            }
            if tasks.len() == limit {
                next_page_token = Some(index.to_string());
                break;
            }
            tasks.push(doc.clone());
        }
        Ok(TaskPage {
            tasks,
            next_page_token,
        })
    }
}

fn matches(filter: &TaskFilter, doc: &TaskDocument) -> bool {
    if let Some(prefix) = &filter.name_prefix {
        if !doc
            .task
            .name
            .as_deref()
            .is_some_and(|name| name.starts_with(prefix))
        {
            return false;
        }
    }
    if let Some(state) = filter.state {
        if doc.state != state {
            return false;
        }
    }
    if let Some(user_id) = &filter.user_id {
        if &doc.user_id != user_id {
            return false;
        }
    }
    for (key, value) in &filter.tags {
        let tag = doc.task.tags.as_ref().and_then(|tags| tags.get(key));
        match tag {
            Some(actual) if value.is_empty() || actual == value => {}
            _ => return false,
        }
    }
    true
}
