//! Texam: the executor engine.
//!
//! Runs the task's executors strictly sequentially, one Kubernetes Job
//! each, watching every Job to a terminal condition and recording
//! per-executor logs. The first failure short-circuits the chain: the
//! remaining executors are recorded FAILED without being launched. The
//! terminal outcome is broadcast once on the task channel.

pub mod command;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use uuid::Uuid;

use poiesis_db::{ExecutorPhase, TaskRepository};
use poiesis_models::names::ExecutorName;
use poiesis_models::tes::{TesExecutor, TesTask};

use crate::broker::{Message, MessageBroker};
use crate::config::Config;
use crate::error::CoreError;
use crate::kubernetes::{KubernetesPort, WatchEvent};
use crate::manifest::ManifestBuilder;
use crate::security::SecurityContexts;

/// Container-waiting reasons treated as terminal: the platform would keep
/// backing off, but the image is never going to start.
pub const CRITICAL_WAITING_REASONS: [&str; 5] = [
    "ImagePullBackOff",
    "ErrImagePull",
    "CrashLoopBackOff",
    "InvalidImageName",
    "ImageInspectError",
];

/// Cap on the executor-Job creation backoff (seconds).
const CREATE_BACKOFF_CAP_SECONDS: u64 = 60;
/// Cadence of the pod-pending fallback poll while watching a Job.
const POLL_INTERVAL_SECONDS: u64 = 10;
const LOG_RETRIEVAL_ATTEMPTS: u32 = 3;
const LOG_RETRIEVAL_DELAY: Duration = Duration::from_secs(1);

/// Terminal condition of a watched executor Job.
#[derive(Debug, Clone, PartialEq, Eq)]
enum JobOutcome {
    Complete,
    Failed { message: String },
}

/// The executor-and-monitor service for one task.
pub struct Texam {
    task: TesTask,
    task_id: String,
    task_uuid: Uuid,
    repo: Arc<dyn TaskRepository>,
    k8s: Arc<dyn KubernetesPort>,
    broker: Arc<dyn MessageBroker>,
    config: Config,
    security: SecurityContexts,
}

impl Texam {
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
        let task_uuid = Uuid::parse_str(&task_id)
            .map_err(|_| CoreError::BadRequest(format!("task id {task_id:?} is not a UUID")))?;
        Ok(Self {
            task,
            task_id,
            task_uuid,
            repo,
            k8s,
            broker,
            config,
            security,
        })
    }

    /// Run the executor chain and broadcast the terminal outcome.
    pub async fn execute(&self) -> Result<(), CoreError> {
        let mut failed_at: Option<usize> = None;

        for (idx, executor) in self.task.executors.iter().enumerate() {
            if !self.run_single_executor(executor, idx).await? {
                failed_at = Some(idx);
                break;
            }
        }

        if let Some(failed_idx) = failed_at {
            for idx in failed_idx + 1..self.task.executors.len() {
                let name = ExecutorName::new(self.task_uuid, idx).to_string();
                self.repo.append_executor_log(&self.task_id).await?;
                self.repo
                    .update_executor_log(
                        &name,
                        ExecutorPhase::Failed,
                        None,
                        Some(format!(
                            "Executor {idx} failed to start because executor {failed_idx} failed."
                        )),
                    )
                    .await?;
            }
        }

        let message = match failed_at {
            None => Message::success(format!(
                "TExAM job for {} has been completed.",
                self.task_id
            )),
            Some(_) => Message::error("TExAM job failed to run all jobs successfully."),
        };
        self.broker.publish(&self.task_id, &message).await?;
        Ok(())
    }

    /// Launch one executor and watch it to a terminal condition.
    async fn run_single_executor(
        &self,
        executor: &TesExecutor,
        idx: usize,
    ) -> Result<bool, CoreError> {
        let name = ExecutorName::new(self.task_uuid, idx).to_string();
        self.repo.append_executor_log(&self.task_id).await?;

        if !self.create_executor_job(executor, idx, &name).await? {
            return Ok(false);
        }
        self.monitor_executor_job(&name).await
    }

    /// Create the executor Job with exponential backoff, deleting any
    /// half-created Job between attempts.
    async fn create_executor_job(
        &self,
        executor: &TesExecutor,
        idx: usize,
        name: &str,
    ) -> Result<bool, CoreError> {
        let builder = ManifestBuilder::new(&self.config, &self.security);
        let shell = command::build_command_string(executor);
        let job = builder.executor_job(&self.task, &self.task_id, executor, idx, &shell);

        let mut backoff = 1u64;
        while backoff <= CREATE_BACKOFF_CAP_SECONDS {
            match self.k8s.create_job(job.clone()).await {
                Ok(_) => {
                    info!(job = name, "created executor job");
                    return Ok(true);
                }
                Err(e) => {
                    error!(job = name, error = %e, "failed to create executor job");
                    if let Err(e) = self.k8s.delete_job(name).await {
                        warn!(job = name, error = %e, "cleanup of half-created job failed");
                    }
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                    backoff *= 2;
                }
            }
        }

        self.repo
            .update_executor_log(
                name,
                ExecutorPhase::Failed,
                None,
                Some("Failed to create executor job after multiple retries.".to_owned()),
            )
            .await?;
        Ok(false)
    }

    /// Watch the Job to terminal state and persist the executor log.
    async fn monitor_executor_job(&self, name: &str) -> Result<bool, CoreError> {
        match self.watch_to_terminal(name).await {
            Ok(JobOutcome::Complete) => {
                let (stdout, stderr) = match self.get_job_logs(name).await {
                    Ok(logs) => (Some(logs), None),
                    Err(_) => (
                        Some(String::new()),
                        Some(format!(
                            "Failed to get logs for executor {name} after {LOG_RETRIEVAL_ATTEMPTS} attempts"
                        )),
                    ),
                };
                self.repo
                    .update_executor_log(name, ExecutorPhase::Succeeded, stdout, stderr)
                    .await?;
                info!(job = name, "executor completed");
                Ok(true)
            }
            Ok(JobOutcome::Failed { message }) => {
                let stdout = self.get_job_logs(name).await.ok();
                self.repo
                    .update_executor_log(
                        name,
                        ExecutorPhase::Failed,
                        stdout,
                        Some(format!("Job failed: {message}")),
                    )
                    .await?;
                error!(job = name, detail = %message, "executor failed");
                Ok(false)
            }
            Err(CoreError::MonitorTimeout(seconds)) => {
                self.repo
                    .update_executor_log(
                        name,
                        ExecutorPhase::Failed,
                        None,
                        Some(format!("Job monitoring timed out after {seconds} seconds.")),
                    )
                    .await?;
                error!(job = name, seconds, "executor watch timed out");
                Ok(false)
            }
            Err(CoreError::FatalContainerStart(reason)) => {
                self.repo
                    .update_executor_log(
                        name,
                        ExecutorPhase::Failed,
                        None,
                        Some(format!("Executor failed to start: {reason}")),
                    )
                    .await?;
                error!(job = name, reason, "executor container cannot start");
                Ok(false)
            }
            Err(e) => {
                self.repo
                    .update_executor_log(
                        name,
                        ExecutorPhase::Failed,
                        None,
                        Some(format!("Error monitoring job: {e}")),
                    )
                    .await?;
                error!(job = name, error = %e, "error monitoring executor job");
                Ok(false)
            }
        }
    }

    /// Drive the Job watch until a terminal condition, a critical pod
    /// waiting reason, or the monitor timeout. A watch stream that ends
    /// without a terminal event counts as a timeout.
    async fn watch_to_terminal(&self, name: &str) -> Result<JobOutcome, CoreError> {
        let timeout = self.config.monitor_timeout_seconds;
        let field_selector = format!("metadata.name={name}");
        let mut watch = self.k8s.watch_jobs(&field_selector, timeout as u32).await?;

        let mut poll = tokio::time::interval(Duration::from_secs(POLL_INTERVAL_SECONDS));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll.tick().await;

        let deadline =
            (timeout > 0).then(|| tokio::time::Instant::now() + Duration::from_secs(timeout));

        loop {
            let event = tokio::select! {
                event = watch.next() => event,
                _ = poll.tick() => {
                    if let Some(reason) = self.critical_waiting_reason(name).await? {
                        return Err(CoreError::FatalContainerStart(reason));
                    }
                    continue;
                }
                _ = maybe_sleep_until(deadline) => {
                    return Err(CoreError::MonitorTimeout(timeout));
                }
            };

            match event {
                Some(Ok(WatchEvent::Applied(job))) => {
                    if let Some(outcome) = job_outcome(&job) {
                        return Ok(outcome);
                    }
                }
                Some(Ok(WatchEvent::Deleted(_))) => {
                    return Ok(JobOutcome::Failed {
                        message: "job was deleted".to_owned(),
                    });
                }
                Some(Err(e)) => return Err(e),
                None => return Err(CoreError::MonitorTimeout(timeout)),
            }
        }
    }

    /// Check the Job's pods for a critical waiting reason.
    async fn critical_waiting_reason(&self, name: &str) -> Result<Option<String>, CoreError> {
        let pods = self.k8s.list_pods(&format!("job-name={name}")).await?;
        for pod in pods {
            let statuses = pod
                .status
                .as_ref()
                .and_then(|s| s.container_statuses.as_ref());
            for status in statuses.into_iter().flatten() {
                let waiting = status.state.as_ref().and_then(|s| s.waiting.as_ref());
                if let Some(waiting) = waiting {
                    if let Some(reason) = &waiting.reason {
                        if CRITICAL_WAITING_REASONS.contains(&reason.as_str()) {
                            let detail = match &waiting.message {
                                Some(message) => format!("{reason}: {message}"),
                                None => reason.clone(),
                            };
                            return Ok(Some(detail));
                        }
                    }
                }
            }
        }
        Ok(None)
    }

    /// Retrieve the executor pod's log, with a few retries: the pod can
    /// lag the Job's terminal condition briefly.
    async fn get_job_logs(&self, name: &str) -> Result<String, CoreError> {
        let mut last_err = None;
        for attempt in 0..LOG_RETRIEVAL_ATTEMPTS {
            match self.try_get_job_logs(name).await {
                Ok(logs) => return Ok(logs),
                Err(e) => {
                    warn!(job = name, attempt, error = %e, "pod log retrieval failed");
                    last_err = Some(e);
                    if attempt + 1 < LOG_RETRIEVAL_ATTEMPTS {
                        tokio::time::sleep(LOG_RETRIEVAL_DELAY).await;
                    }
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| CoreError::Platform(format!("no pods found for job {name}"))))
    }

    async fn try_get_job_logs(&self, name: &str) -> Result<String, CoreError> {
        let pods = self.k8s.list_pods(&format!("job-name={name}")).await?;
        let pod_name = pods
            .first()
            .and_then(|p| p.metadata.name.clone())
            .ok_or_else(|| CoreError::Platform(format!("no pods found for job {name}")))?;
        self.k8s.get_pod_log(&pod_name).await
    }
}

/// The terminal condition on a Job's status, if it has one.
fn job_outcome(job: &Job) -> Option<JobOutcome> {
    let conditions = job.status.as_ref()?.conditions.as_ref()?;
    for condition in conditions {
        if condition.status != "True" {
            continue;
        }
        match condition.type_.as_str() {
            "Complete" => return Some(JobOutcome::Complete),
            "Failed" => {
                return Some(JobOutcome::Failed {
                    message: condition.message.clone().unwrap_or_default(),
                });
            }
            _ => {}
        }
    }
    None
}

/// Sleep until `deadline`, or forever when there is none.
async fn maybe_sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};

    fn job_with_condition(type_: &str, status: &str, message: Option<&str>) -> Job {
        Job {
            status: Some(JobStatus {
                conditions: Some(vec![JobCondition {
                    type_: type_.to_owned(),
                    status: status.to_owned(),
                    message: message.map(str::to_owned),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn complete_condition_is_terminal() {
        let job = job_with_condition("Complete", "True", None);
        assert_eq!(job_outcome(&job), Some(JobOutcome::Complete));
    }

    #[test]
    fn failed_condition_carries_message() {
        let job = job_with_condition("Failed", "True", Some("BackoffLimitExceeded"));
        assert_eq!(
            job_outcome(&job),
            Some(JobOutcome::Failed {
                message: "BackoffLimitExceeded".to_owned()
            })
        );
    }

    #[test]
    fn false_conditions_are_not_terminal() {
        let job = job_with_condition("Failed", "False", None);
        assert_eq!(job_outcome(&job), None);
        assert_eq!(job_outcome(&Job::default()), None);
    }
}
