//! Torc: the pipeline orchestrator.
//!
//! One Torc process runs per task. Each attempt provisions the shared
//! claim, then sequences Tif -> Texam -> Tof, blocking between stages on
//! the task channel: every stage publishes exactly one terminal message.
//! Infrastructure failures are retried with backoff from claim
//! provisioning; executor failures are terminal immediately. Exhausting
//! the retries always leaves the task in SYSTEM_ERROR; a task never
//! sticks in RUNNING.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::{error, info, warn};

use poiesis_db::TaskRepository;
use poiesis_models::names;
use poiesis_models::tes::{TesState, TesTask};

use crate::broker::MessageBroker;
use crate::config::Config;
use crate::error::{CoreError, Stage};
use crate::kubernetes::KubernetesPort;
use crate::manifest::ManifestBuilder;
use crate::security::SecurityContexts;

/// Launch the orchestrator for a validated task.
///
/// This is the bootstrap the task-creation path runs after inserting the
/// document: create the Torc Job, then the task ConfigMap with an owner
/// reference to that Job so the platform garbage-collects the ConfigMap
/// once the Job's TTL expires. The Job is created first because the
/// owner reference needs its server-assigned uid.
pub async fn launch(
    task: &TesTask,
    k8s: &dyn KubernetesPort,
    config: &Config,
    security: &SecurityContexts,
) -> Result<String, CoreError> {
    let task_id = task
        .id
        .as_deref()
        .ok_or_else(|| CoreError::BadRequest("task has no id".to_owned()))?;
    let builder = ManifestBuilder::new(config, security);

    let job_name = k8s.create_job(builder.torc_job(task, task_id)?).await?;
    let created = k8s.get_job(&job_name).await?;

    let config_map = builder.task_config_map(task, task_id, owner_reference(&created))?;
    k8s.create_config_map(config_map).await?;

    info!(task_id, job = %job_name, "launched orchestrator job");
    Ok(job_name)
}

/// Owner reference pointing at a created Job, when the server has
/// assigned it a uid.
fn owner_reference(job: &Job) -> Option<OwnerReference> {
    let name = job.metadata.name.clone()?;
    let uid = job.metadata.uid.clone()?;
    Some(OwnerReference {
        api_version: "batch/v1".to_owned(),
        kind: "Job".to_owned(),
        name,
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Attempts before giving up on a task.
const MAX_ATTEMPTS: u32 = 3;
/// Initial backoff between attempts; doubles each time (1, 2, 4 s).
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// The orchestrator for one task.
pub struct Torc {
    task: TesTask,
    task_id: String,
    repo: Arc<dyn TaskRepository>,
    k8s: Arc<dyn KubernetesPort>,
    broker: Arc<dyn MessageBroker>,
    config: Config,
    security: SecurityContexts,
    system_logs: Vec<String>,
}

impl Torc {
    pub fn new(
        task: TesTask,
        repo: Arc<dyn TaskRepository>,
        k8s: Arc<dyn KubernetesPort>,
        broker: Arc<dyn MessageBroker>,
        config: Config,
        security: SecurityContexts,
    ) -> Result<Self, CoreError> {
        let task_id = task
            .id
            .clone()
            .ok_or_else(|| CoreError::BadRequest("task has no id".to_owned()))?;
        Ok(Self {
            task,
            task_id,
            repo,
            k8s,
            broker,
            config,
            security,
            system_logs: Vec::new(),
        })
    }

    /// Drive the task to a terminal state.
    pub async fn execute(&mut self) -> Result<(), CoreError> {
        let mut backoff = RETRY_BACKOFF;
        let mut last_err: Option<CoreError> = None;

        for attempt in 1..=MAX_ATTEMPTS {
            info!(task_id = %self.task_id, attempt, "starting pipeline attempt");
            match self.run_attempt().await {
                Ok(()) => {
                    info!(task_id = %self.task_id, "task completed");
                    return Ok(());
                }
                Err(e) => {
                    error!(task_id = %self.task_id, attempt, error = %e, "pipeline attempt failed");
                    self.system_logs.push(format!("Attempt {attempt} failed: {e}"));
                    self.close_out_attempt().await;

                    if e.is_executor_failure() {
                        // Re-running a deterministic executor cannot
                        // change its outcome.
                        self.repo
                            .update_task_state(&self.task_id, TesState::ExecutorError)
                            .await?;
                        return Err(e);
                    }

                    last_err = Some(e);
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        self.repo
            .update_task_state(&self.task_id, TesState::SystemError)
            .await?;
        Err(last_err
            .unwrap_or_else(|| CoreError::Platform("pipeline failed without an error".to_owned())))
    }

    /// One pass through the pipeline: claim, stages, finalization.
    async fn run_attempt(&mut self) -> Result<(), CoreError> {
        self.repo
            .update_task_state(&self.task_id, TesState::Running)
            .await?;
        self.repo.append_task_log(&self.task_id).await?;

        self.create_pvc().await?;

        if self.task.inputs().is_empty() {
            info!(task_id = %self.task_id, "no inputs, skipping input filer");
        } else {
            self.submit_stage(Stage::Tif).await?;
        }

        self.submit_stage(Stage::Texam).await?;

        if self.task.outputs().is_empty() {
            info!(task_id = %self.task_id, "no outputs, skipping output filer");
        } else {
            self.submit_stage(Stage::Tof).await?;
        }

        let lines = self.collect_system_logs().await;
        self.repo.set_system_logs(&self.task_id, &lines).await?;
        self.repo.set_task_log_end(&self.task_id).await?;
        self.repo
            .update_task_state(&self.task_id, TesState::Complete)
            .await?;
        self.k8s
            .delete_pvc(&names::pvc_name(&self.task_id))
            .await?;
        Ok(())
    }

    async fn create_pvc(&self) -> Result<(), CoreError> {
        let disk_gb = self.task.resources.as_ref().and_then(|r| r.disk_gb);
        let builder = ManifestBuilder::new(&self.config, &self.security);
        let name = self.k8s.create_pvc(builder.pvc(&self.task_id, disk_gb)).await?;
        info!(task_id = %self.task_id, pvc = %name, "created task volume");
        Ok(())
    }

    /// Create a stage Job and block for its terminal message.
    ///
    /// The subscription is opened before the Job is created so a stage
    /// that finishes quickly cannot publish before anyone is listening.
    async fn submit_stage(&mut self, stage: Stage) -> Result<(), CoreError> {
        let builder = ManifestBuilder::new(&self.config, &self.security);
        let job = match stage {
            Stage::Tif => builder.tif_job(&self.task_id),
            Stage::Texam => builder.texam_job(&self.task_id),
            Stage::Tof => builder.tof_job(&self.task_id),
        };

        // A failed earlier attempt may have left a Job under the same
        // name; deletes are idempotent.
        if let Some(name) = &job.metadata.name {
            self.k8s.delete_job(name).await?;
        }

        let mut subscription = self.broker.subscribe(&self.task_id).await?;
        self.k8s.create_job(job).await?;
        info!(task_id = %self.task_id, stage = %stage, "stage job submitted, waiting");

        let message = subscription.next_message().await?;
        if message.is_error() {
            error!(task_id = %self.task_id, stage = %stage, detail = %message.message, "stage reported failure");
            return Err(CoreError::StageFailed {
                stage,
                message: message.message,
            });
        }
        info!(task_id = %self.task_id, stage = %stage, detail = %message.message, "stage completed");
        Ok(())
    }

    /// Best-effort close-out of a failed attempt: persist system logs,
    /// end the attempt log, and release the claim so a retry starts
    /// clean.
    async fn close_out_attempt(&mut self) {
        let lines = self.collect_system_logs().await;
        if let Err(e) = self.repo.set_system_logs(&self.task_id, &lines).await {
            warn!(task_id = %self.task_id, error = %e, "failed to persist system logs");
        }
        if let Err(e) = self.repo.set_task_log_end(&self.task_id).await {
            warn!(task_id = %self.task_id, error = %e, "failed to close attempt log");
        }
        if let Err(e) = self.k8s.delete_pvc(&names::pvc_name(&self.task_id)).await {
            warn!(task_id = %self.task_id, error = %e, "failed to delete task volume");
        }
    }

    /// The attempt's system-log lines plus harvested stage pod logs.
    /// Harvest failures are recorded as lines, never raised.
    async fn collect_system_logs(&self) -> Vec<String> {
        let mut lines = self.system_logs.clone();
        let stage_jobs = [
            names::tif_job_name(&self.task_id),
            names::texam_job_name(&self.task_id),
            names::tof_job_name(&self.task_id),
        ];
        for job in &stage_jobs {
            match self.k8s.list_pods(&format!("job-name={job}")).await {
                Ok(pods) => {
                    for pod in pods {
                        let Some(pod_name) = pod.metadata.name else {
                            continue;
                        };
                        match self.k8s.get_pod_log(&pod_name).await {
                            Ok(log) if !log.is_empty() => {
                                lines.push(format!("Logs from {pod_name}: {log}"));
                            }
                            Ok(_) => {}
                            Err(e) => lines.push(format!("Error getting logs for {job}: {e}")),
                        }
                    }
                }
                Err(e) => lines.push(format!("Error getting logs for {job}: {e}")),
            }
        }
        lines
    }
}
