//! Stored document shapes.

use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use poiesis_models::tes::{TesState, TesTask};

/// Collection holding task documents, indexed by `task_id` and `user_id`.
pub const TASK_COLLECTION: &str = "tasks";
/// Collection holding service registration documents.
pub const SERVICE_COLLECTION: &str = "services";

/// A persisted task: the immutable user-submitted [`TesTask`] plus the
/// engine-owned tracking fields.
///
/// `state` is duplicated at the top level (and inside `task`) so list
/// filters hit an indexed scalar instead of the embedded document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDocument {
    /// Insertion-order identifier; the opaque pagination token encodes it.
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    /// The task's v4 UUID, immutable once assigned.
    pub task_id: String,
    pub user_id: String,
    /// Hash of the service configuration the task was accepted under.
    pub service_hash: String,
    pub tes_version: String,
    pub state: TesState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub task: TesTask,
}

impl TaskDocument {
    /// Wrap a validated task for insertion in state INITIALIZING.
    pub fn new(task: TesTask, user_id: impl Into<String>, service_hash: impl Into<String>) -> Self {
        let now = Utc::now();
        let mut task = task;
        task.state = Some(TesState::Initializing);
        task.creation_time = Some(now);
        Self {
            id: None,
            task_id: task.id.clone().unwrap_or_default(),
            user_id: user_id.into(),
            service_hash: service_hash.into(),
            tes_version: "1.1.0".to_owned(),
            state: TesState::Initializing,
            created_at: now,
            updated_at: now,
            task,
        }
    }

    /// The task view with engine-owned `id`/`state` folded in.
    pub fn to_task(&self) -> TesTask {
        let mut task = self.task.clone();
        task.id = Some(self.task_id.clone());
        task.state = Some(self.state);
        task
    }
}

/// A registered service deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    /// Hash of the deployed service configuration.
    pub service_hash: String,
    pub created_at: DateTime<Utc>,
}
