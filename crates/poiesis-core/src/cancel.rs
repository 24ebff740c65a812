//! Cancellation: flip the task to CANCELING, reap every derived
//! resource, and confirm CANCELED.
//!
//! The state flip is synchronous so the API can answer immediately; the
//! reaping runs detached. A running Torc observes cancellation as a
//! delete-induced stage failure; no signal is sent to it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use poiesis_db::{DbError, TaskRepository};
use poiesis_models::names;
use poiesis_models::tes::TesState;

use crate::error::CoreError;
use crate::kubernetes::KubernetesPort;

/// Reap rounds per resource class before giving up with a warning.
const MAX_REAP_ROUNDS: u32 = 3;

/// The resource classes swept on cancellation, in deletion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResourceClass {
    Jobs,
    Pods,
    Pvcs,
}

impl std::fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Jobs => "jobs",
            Self::Pods => "pods",
            Self::Pvcs => "pvcs",
        };
        f.write_str(s)
    }
}

/// The cancellation controller.
pub struct CancelController {
    repo: Arc<dyn TaskRepository>,
    k8s: Arc<dyn KubernetesPort>,
}

impl CancelController {
    pub fn new(repo: Arc<dyn TaskRepository>, k8s: Arc<dyn KubernetesPort>) -> Self {
        Self { repo, k8s }
    }

    /// Cancel a task on behalf of a user.
    ///
    /// Returns once the task is CANCELING; resource deletion and the
    /// transition to CANCELED happen asynchronously. A task owned by
    /// another user is reported as not found, not forbidden.
    pub async fn execute(&self, task_id: &str, user_id: &str) -> Result<(), CoreError> {
        let task = self.repo.get_task(task_id).await.map_err(|e| match e {
            DbError::NotFound(id) => CoreError::NotFound(format!("task {id} not found")),
            other => CoreError::Storage(other),
        })?;

        if task.user_id != user_id {
            return Err(CoreError::NotFound(format!(
                "task {task_id} not found for user"
            )));
        }

        match task.state {
            TesState::Complete => {
                return Err(CoreError::BadRequest(format!(
                    "task {task_id} is already completed"
                )));
            }
            TesState::Canceled => {
                return Err(CoreError::BadRequest(format!(
                    "task {task_id} is already canceled"
                )));
            }
            TesState::Canceling => {
                return Err(CoreError::BadRequest(format!(
                    "task {task_id} is already being canceled"
                )));
            }
            _ => {}
        }

        self.repo
            .update_task_state(task_id, TesState::Canceling)
            .await?;
        info!(task_id, "task canceling, reaping resources in the background");

        let repo = Arc::clone(&self.repo);
        let k8s = Arc::clone(&self.k8s);
        let task_id = task_id.to_owned();
        tokio::spawn(async move {
            reap_task_resources(k8s.as_ref(), &task_id).await;
            if let Err(e) = repo.update_task_state(&task_id, TesState::Canceled).await {
                error!(task_id = %task_id, error = %e, "failed to confirm cancellation");
            } else {
                info!(task_id = %task_id, "task canceled");
            }
        });

        Ok(())
    }
}

/// Delete every Job, Pod, and PVC labeled with the task id.
pub async fn reap_task_resources(k8s: &dyn KubernetesPort, task_id: &str) {
    let selector = names::task_selector(task_id);
    for class in [ResourceClass::Jobs, ResourceClass::Pods, ResourceClass::Pvcs] {
        reap_class(k8s, &selector, class).await;
    }
}

async fn reap_class(k8s: &dyn KubernetesPort, selector: &str, class: ResourceClass) {
    for attempt in 0..MAX_REAP_ROUNDS {
        match count_remaining(k8s, selector, class).await {
            Ok(0) => return,
            Ok(remaining) => {
                info!(selector, %class, remaining, attempt, "deleting task resources");
                if let Err(e) = delete_by_label(k8s, selector, class).await {
                    warn!(selector, %class, error = %e, "label-selector delete failed");
                }
            }
            Err(e) => {
                warn!(selector, %class, error = %e, "could not list remaining resources");
            }
        }
        tokio::time::sleep(Duration::from_secs(1 << (attempt + 1))).await;
    }
    if let Ok(remaining) = count_remaining(k8s, selector, class).await {
        if remaining > 0 {
            warn!(selector, %class, remaining, "resources still present after final reap round");
        }
    }
}

async fn count_remaining(
    k8s: &dyn KubernetesPort,
    selector: &str,
    class: ResourceClass,
) -> Result<usize, CoreError> {
    Ok(match class {
        ResourceClass::Jobs => k8s.list_jobs(selector).await?.len(),
        ResourceClass::Pods => k8s.list_pods(selector).await?.len(),
        ResourceClass::Pvcs => k8s.list_pvcs_by_label(selector).await?.len(),
    })
}

async fn delete_by_label(
    k8s: &dyn KubernetesPort,
    selector: &str,
    class: ResourceClass,
) -> Result<(), CoreError> {
    match class {
        ResourceClass::Jobs => k8s.delete_jobs_by_label(selector).await,
        ResourceClass::Pods => k8s.delete_pods_by_label(selector).await,
        ResourceClass::Pvcs => k8s.delete_pvcs_by_label(selector).await,
    }
}
