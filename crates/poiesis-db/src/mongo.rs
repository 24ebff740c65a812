//! MongoDB adaptor for the [`TaskRepository`] port.

use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{Bson, Document, Regex, doc, to_bson};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use tracing::debug;

use poiesis_models::names::ExecutorName;
use poiesis_models::tes::{TesExecutorLog, TesState, TesTaskLog};

use crate::config::DbConfig;
use crate::error::DbError;
use crate::repository::{ExecutorPhase, TaskFilter, TaskPage, TaskRepository};
use crate::schema::{TASK_COLLECTION, TaskDocument};

/// Largest accepted page size; requests beyond it are clamped.
const MAX_PAGE_SIZE: u32 = 2048;
/// Page size used when the caller does not specify one.
const DEFAULT_PAGE_SIZE: u32 = 256;

/// Document-store implementation of the persistence port.
#[derive(Debug, Clone)]
pub struct MongoRepository {
    tasks: Collection<TaskDocument>,
}

impl MongoRepository {
    /// Connect using the given configuration.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        let mut options = ClientOptions::parse(&config.connection_string).await?;
        options.max_pool_size = Some(config.max_pool_size);
        let client = Client::with_options(options)?;
        let tasks = client.database(&config.database).collection(TASK_COLLECTION);
        Ok(Self { tasks })
    }

    async fn fetch(&self, task_id: &str) -> Result<TaskDocument, DbError> {
        self.tasks
            .find_one(doc! { "task_id": task_id })
            .await?
            .ok_or_else(|| DbError::NotFound(task_id.to_owned()))
    }

    /// Replace the attempt-log array of a task in one atomic write.
    async fn write_logs(&self, task_id: &str, logs: &[TesTaskLog]) -> Result<(), DbError> {
        self.tasks
            .update_one(
                doc! { "task_id": task_id },
                doc! { "$set": { "task.logs": to_bson(logs)? } },
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for MongoRepository {
    async fn insert_task(&self, doc: TaskDocument) -> Result<String, DbError> {
        let result = self.tasks.insert_one(doc).await?;
        Ok(result
            .inserted_id
            .as_object_id()
            .map(|oid| oid.to_hex())
            .unwrap_or_default())
    }

    async fn get_task(&self, task_id: &str) -> Result<TaskDocument, DbError> {
        self.fetch(task_id).await
    }

    async fn update_task_state(&self, task_id: &str, state: TesState) -> Result<(), DbError> {
        let current = self.fetch(task_id).await?;
        if current.state == state {
            return Ok(());
        }
        debug!(task_id, from = %current.state, to = %state, "task state transition");
        self.tasks
            .update_one(
                doc! { "task_id": task_id },
                doc! { "$set": {
                    "state": to_bson(&state)?,
                    "task.state": to_bson(&state)?,
                    "updated_at": to_bson(&Utc::now())?,
                } },
            )
            .await?;
        Ok(())
    }

    async fn append_task_log(&self, task_id: &str) -> Result<(), DbError> {
        let task = self.fetch(task_id).await?;
        let mut logs = task.task.logs.unwrap_or_default();
        logs.push(TesTaskLog {
            start_time: Some(Utc::now()),
            ..TesTaskLog::default()
        });
        self.write_logs(task_id, &logs).await
    }

    async fn append_executor_log(&self, task_id: &str) -> Result<(), DbError> {
        let task = self.fetch(task_id).await?;
        let mut logs = task.task.logs.unwrap_or_default();
        let attempt = logs
            .last_mut()
            .ok_or_else(|| DbError::MissingLogSlot {
                task_id: task_id.to_owned(),
                index: 0,
            })?;
        attempt.logs.push(TesExecutorLog {
            start_time: Some(Utc::now()),
            exit_code: 0,
            ..TesExecutorLog::default()
        });
        self.write_logs(task_id, &logs).await
    }

    async fn set_task_log_end(&self, task_id: &str) -> Result<(), DbError> {
        let task = self.fetch(task_id).await?;
        let mut logs = task.task.logs.unwrap_or_default();
        if let Some(attempt) = logs.last_mut() {
            attempt.end_time = Some(Utc::now());
            self.write_logs(task_id, &logs).await?;
        }
        Ok(())
    }

    async fn set_system_logs(&self, task_id: &str, lines: &[String]) -> Result<(), DbError> {
        let task = self.fetch(task_id).await?;
        let mut logs = task.task.logs.unwrap_or_default();
        if let Some(attempt) = logs.last_mut() {
            attempt.system_logs = Some(lines.to_vec());
            self.write_logs(task_id, &logs).await?;
        }
        Ok(())
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

        let task = self.fetch(&task_id).await?;
        let mut logs = task.task.logs.unwrap_or_default();
        let attempt = logs.last_mut().ok_or_else(|| DbError::MissingLogSlot {
            task_id: task_id.clone(),
            index: name.index,
        })?;
        let exec_log =
            attempt
                .logs
                .get_mut(name.index)
                .ok_or_else(|| DbError::MissingLogSlot {
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

        self.write_logs(&task_id, &logs).await
    }

    async fn list_tasks(
        &self,
        filter: &TaskFilter,
        page_size: Option<u32>,
        page_token: Option<&str>,
    ) -> Result<TaskPage, DbError> {
        let mut query = build_query(filter);

        if let Some(token) = page_token {
            let oid = ObjectId::parse_str(token)
                .map_err(|_| DbError::InvalidPageToken(token.to_owned()))?;
            query.insert("_id", doc! { "$gt": oid });
        }

        let limit = page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE) as i64;

        // Fetch one extra document to learn whether another page exists.
        let mut cursor = self
            .tasks
            .find(query)
            .sort(doc! { "_id": 1 })
            .limit(limit + 1)
            .await?;

        let mut tasks = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            tasks.push(doc);
        }

        let next_page_token = if tasks.len() as i64 > limit {
            tasks.truncate(limit as usize);
            tasks
                .last()
                .and_then(|d| d.id.as_ref())
                .map(|id| id.to_hex())
        } else {
            None
        };

        Ok(TaskPage {
            tasks,
            next_page_token,
        })
    }
}

/// Translate a [`TaskFilter`] into a document-store query.
pub(crate) fn build_query(filter: &TaskFilter) -> Document {
    let mut query = Document::new();

    if let Some(prefix) = &filter.name_prefix {
        query.insert(
            "task.name",
            Bson::RegularExpression(Regex {
                pattern: format!("^{}", regex_escape(prefix)),
                options: String::new(),
            }),
        );
    }

    if let Some(state) = filter.state {
        query.insert("state", state.to_string());
    }

    for (key, value) in &filter.tags {
        if value.is_empty() {
            query.insert(format!("task.tags.{key}"), doc! { "$exists": true });
        } else {
            query.insert(format!("task.tags.{key}"), value.clone());
        }
    }

    if let Some(user_id) = &filter.user_id {
        query.insert("user_id", user_id.clone());
    }

    query
}

/// Escape a literal string for use at the head of an anchored regex.
fn regex_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(
            c,
            '\\' | '.' | '^' | '$' | '|' | '?' | '*' | '+' | '(' | ')' | '[' | ']' | '{' | '}'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
