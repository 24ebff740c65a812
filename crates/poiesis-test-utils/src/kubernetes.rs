//! Scriptable in-memory cluster implementing the orchestrator port.
//!
//! Jobs get a configurable outcome (complete, failed, timeout, or stuck
//! pending); creating a Job materializes a pod carrying the Job's labels
//! plus `job-name`, so label sweeps and log retrieval behave like the
//! real platform. A creation hook lets tests run stage logic in-process
//! when Torc submits a stage Job.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::batch::v1::{Job, JobCondition, JobStatus};
use k8s_openapi::api::core::v1::{
    ConfigMap, ContainerState, ContainerStateWaiting, ContainerStatus, PersistentVolumeClaim, Pod,
    PodStatus,
};

use poiesis_core::CoreError;
use poiesis_core::kubernetes::{KubernetesPort, WatchEvent, WatchStream};

/// Scripted terminal behavior of a Job.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Complete,
    Failed { message: String },
    /// The watch ends without a terminal condition.
    Timeout,
    /// The pod sticks in Pending with this waiting reason.
    Pending { waiting_reason: String },
}

type JobHook = Box<dyn Fn(&Job) + Send + Sync>;

#[derive(Default)]
struct ClusterState {
    jobs: BTreeMap<String, Job>,
    pods: BTreeMap<String, Pod>,
    pvcs: BTreeMap<String, PersistentVolumeClaim>,
    config_maps: BTreeMap<String, ConfigMap>,
    pod_logs: HashMap<String, String>,
}

#[derive(Default)]
pub struct FakeKubernetes {
    state: Mutex<ClusterState>,
    outcomes: Mutex<HashMap<String, JobOutcome>>,
    /// Pod log by job name, applied when the Job's pod is materialized.
    job_logs: Mutex<HashMap<String, String>>,
    /// Remaining forced PVC-creation failures.
    pvc_create_failures: Mutex<u32>,
    /// Remaining forced Job-creation failures, per job name.
    job_create_failures: Mutex<HashMap<String, u32>>,
    on_create_job: Mutex<Option<JobHook>>,
    /// Names of created jobs, in creation order.
    created_jobs: Mutex<Vec<String>>,
}

impl FakeKubernetes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the terminal behavior of a Job (default: Complete).
    pub fn set_outcome(&self, job_name: &str, outcome: JobOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(job_name.to_owned(), outcome);
    }

    /// Script the pod log returned for a Job's pod.
    pub fn set_job_log(&self, job_name: &str, log: &str) {
        self.job_logs
            .lock()
            .unwrap()
            .insert(job_name.to_owned(), log.to_owned());
    }

    /// Make the next `n` PVC creations fail.
    pub fn fail_pvc_creates(&self, n: u32) {
        *self.pvc_create_failures.lock().unwrap() = n;
    }

    /// Make the next `n` creations of the named Job fail.
    pub fn fail_job_creates(&self, job_name: &str, n: u32) {
        self.job_create_failures
            .lock()
            .unwrap()
            .insert(job_name.to_owned(), n);
    }

    /// Run a hook after every successful Job creation.
    pub fn on_create_job(&self, hook: impl Fn(&Job) + Send + Sync + 'static) {
        *self.on_create_job.lock().unwrap() = Some(Box::new(hook));
    }

    /// Jobs created so far, in order.
    pub fn created_job_names(&self) -> Vec<String> {
        self.created_jobs.lock().unwrap().clone()
    }

    pub fn job_exists(&self, name: &str) -> bool {
        self.state.lock().unwrap().jobs.contains_key(name)
    }

    pub fn pvc_names(&self) -> Vec<String> {
        self.state.lock().unwrap().pvcs.keys().cloned().collect()
    }

    pub fn config_map(&self, name: &str) -> Option<ConfigMap> {
        self.state.lock().unwrap().config_maps.get(name).cloned()
    }

    /// Whether any Job, pod, or PVC still matches the label selector.
    pub fn any_resources_matching(&self, selector: &str) -> bool {
        let state = self.state.lock().unwrap();
        state
            .jobs
            .values()
            .any(|j| selector_matches(selector, j.metadata.labels.as_ref()))
            || state
                .pods
                .values()
                .any(|p| selector_matches(selector, p.metadata.labels.as_ref()))
            || state
                .pvcs
                .values()
                .any(|p| selector_matches(selector, p.metadata.labels.as_ref()))
    }

    /// Register a pod directly (for tests that bypass Job creation).
    pub fn add_pod(&self, pod: Pod) {
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.state.lock().unwrap().pods.insert(name, pod);
    }

    fn outcome_for(&self, job_name: &str) -> JobOutcome {
        self.outcomes
            .lock()
            .unwrap()
            .get(job_name)
            .cloned()
            .unwrap_or(JobOutcome::Complete)
    }

    /// Materialize the pod a Job would create.
    fn materialize_pod(&self, job: &Job, name: &str) {
        let mut labels = job.metadata.labels.clone().unwrap_or_default();
        labels.insert("job-name".to_owned(), name.to_owned());

        let status = match self.outcome_for(name) {
            JobOutcome::Pending { waiting_reason } => PodStatus {
                phase: Some("Pending".to_owned()),
                container_statuses: Some(vec![ContainerStatus {
                    name: name.to_owned(),
                    state: Some(ContainerState {
                        waiting: Some(ContainerStateWaiting {
                            reason: Some(waiting_reason),
                            message: Some("back-off pulling image".to_owned()),
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            _ => PodStatus {
                phase: Some("Running".to_owned()),
                ..Default::default()
            },
        };

        let pod_name = format!("{name}-pod");
        let pod = Pod {
            metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                name: Some(pod_name.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            status: Some(status),
            ..Default::default()
        };

        let log = self
            .job_logs
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default();

        let mut state = self.state.lock().unwrap();
        state.pods.insert(pod_name.clone(), pod);
        state.pod_logs.insert(pod_name, log);
    }
}

/// Match a single `key=value` label selector.
fn selector_matches(selector: &str, labels: Option<&BTreeMap<String, String>>) -> bool {
    let Some((key, value)) = selector.split_once('=') else {
        return false;
    };
    labels.is_some_and(|l| l.get(key).map(String::as_str) == Some(value))
}

fn terminal_job(mut job: Job, outcome: &JobOutcome) -> Job {
    let condition = match outcome {
        JobOutcome::Complete => Some(JobCondition {
            type_: "Complete".to_owned(),
            status: "True".to_owned(),
            ..Default::default()
        }),
        JobOutcome::Failed { message } => Some(JobCondition {
            type_: "Failed".to_owned(),
            status: "True".to_owned(),
            message: Some(message.clone()),
            ..Default::default()
        }),
        JobOutcome::Timeout | JobOutcome::Pending { .. } => None,
    };
    job.status = Some(JobStatus {
        conditions: condition.map(|c| vec![c]),
        ..Default::default()
    });
    job
}

#[async_trait]
impl KubernetesPort for FakeKubernetes {
    async fn create_job(&self, job: Job) -> Result<String, CoreError> {
        let mut job = job;
        let name = job.metadata.name.clone().unwrap_or_default();

        {
            let mut failures = self.job_create_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&name) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(CoreError::Platform(format!(
                        "injected create failure for job {name}"
                    )));
                }
            }
        }

        // The server assigns the uid.
        if job.metadata.uid.is_none() {
            job.metadata.uid = Some(format!("uid-{name}"));
        }

        self.state
            .lock()
            .unwrap()
            .jobs
            .insert(name.clone(), job.clone());
        self.created_jobs.lock().unwrap().push(name.clone());
        self.materialize_pod(&job, &name);

        if let Some(hook) = self.on_create_job.lock().unwrap().as_ref() {
            hook(&job);
        }
        Ok(name)
    }

    async fn get_job(&self, name: &str) -> Result<Job, CoreError> {
        self.state
            .lock()
            .unwrap()
            .jobs
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::Platform(format!("job {name} not found")))
    }

    async fn delete_job(&self, name: &str) -> Result<(), CoreError> {
        self.state.lock().unwrap().jobs.remove(name);
        Ok(())
    }

    async fn list_jobs(&self, label_selector: &str) -> Result<Vec<Job>, CoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .jobs
            .values()
            .filter(|j| selector_matches(label_selector, j.metadata.labels.as_ref()))
            .cloned()
            .collect())
    }

    async fn delete_jobs_by_label(&self, label_selector: &str) -> Result<(), CoreError> {
        self.state
            .lock()
            .unwrap()
            .jobs
            .retain(|_, j| !selector_matches(label_selector, j.metadata.labels.as_ref()));
        Ok(())
    }

    async fn watch_jobs(
        &self,
        field_selector: &str,
        _timeout_seconds: u32,
    ) -> Result<WatchStream<Job>, CoreError> {
        let name = field_selector
            .strip_prefix("metadata.name=")
            .unwrap_or(field_selector)
            .to_owned();
        let job = self
            .state
            .lock()
            .unwrap()
            .jobs
            .get(&name)
            .cloned()
            .unwrap_or_else(|| Job {
                metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                    name: Some(name.clone()),
                    ..Default::default()
                },
                ..Default::default()
            });

        let outcome = self.outcome_for(&name);
        let stream: WatchStream<Job> = match &outcome {
            JobOutcome::Complete | JobOutcome::Failed { .. } => {
                futures::stream::iter(vec![Ok(WatchEvent::Applied(terminal_job(job, &outcome)))])
                    .boxed()
            }
            // Timeout: the watch ends with no terminal event.
            JobOutcome::Timeout => futures::stream::empty().boxed(),
            // Pending: the watch hangs; the pod-poll path must notice.
            JobOutcome::Pending { .. } => futures::stream::pending().boxed(),
        };
        Ok(stream)
    }

    async fn create_pod(&self, pod: Pod) -> Result<String, CoreError> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.state.lock().unwrap().pods.insert(name.clone(), pod);
        Ok(name)
    }

    async fn get_pod(&self, name: &str) -> Result<Pod, CoreError> {
        self.state
            .lock()
            .unwrap()
            .pods
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::Platform(format!("pod {name} not found")))
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>, CoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .pods
            .values()
            .filter(|p| selector_matches(label_selector, p.metadata.labels.as_ref()))
            .cloned()
            .collect())
    }

    async fn get_pod_log(&self, name: &str) -> Result<String, CoreError> {
        self.state
            .lock()
            .unwrap()
            .pod_logs
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::Platform(format!("no logs for pod {name}")))
    }

    async fn delete_pod(&self, name: &str) -> Result<(), CoreError> {
        self.state.lock().unwrap().pods.remove(name);
        Ok(())
    }

    async fn delete_pods_by_label(&self, label_selector: &str) -> Result<(), CoreError> {
        self.state
            .lock()
            .unwrap()
            .pods
            .retain(|_, p| !selector_matches(label_selector, p.metadata.labels.as_ref()));
        Ok(())
    }

    async fn watch_pods(
        &self,
        label_selector: &str,
        _timeout_seconds: u32,
    ) -> Result<WatchStream<Pod>, CoreError> {
        let pods = self.list_pods(label_selector).await?;
        let events: Vec<Result<WatchEvent<Pod>, CoreError>> =
            pods.into_iter().map(|p| Ok(WatchEvent::Applied(p))).collect();
        Ok(futures::stream::iter(events)
            .chain(futures::stream::pending())
            .boxed())
    }

    async fn create_pvc(&self, pvc: PersistentVolumeClaim) -> Result<String, CoreError> {
        {
            let mut failures = self.pvc_create_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(CoreError::Platform(
                    "injected pvc create failure".to_owned(),
                ));
            }
        }
        let name = pvc.metadata.name.clone().unwrap_or_default();
        self.state.lock().unwrap().pvcs.insert(name.clone(), pvc);
        Ok(name)
    }

    async fn delete_pvc(&self, name: &str) -> Result<(), CoreError> {
        self.state.lock().unwrap().pvcs.remove(name);
        Ok(())
    }

    async fn list_pvcs_by_label(
        &self,
        label_selector: &str,
    ) -> Result<Vec<PersistentVolumeClaim>, CoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .pvcs
            .values()
            .filter(|p| selector_matches(label_selector, p.metadata.labels.as_ref()))
            .cloned()
            .collect())
    }

    async fn delete_pvcs_by_label(&self, label_selector: &str) -> Result<(), CoreError> {
        self.state
            .lock()
            .unwrap()
            .pvcs
            .retain(|_, p| !selector_matches(label_selector, p.metadata.labels.as_ref()));
        Ok(())
    }

    async fn create_config_map(&self, config_map: ConfigMap) -> Result<String, CoreError> {
        let name = config_map.metadata.name.clone().unwrap_or_default();
        self.state
            .lock()
            .unwrap()
            .config_maps
            .insert(name.clone(), config_map);
        Ok(name)
    }

    async fn patch_config_map(&self, name: &str, config_map: ConfigMap) -> Result<(), CoreError> {
        self.state
            .lock()
            .unwrap()
            .config_maps
            .insert(name.to_owned(), config_map);
        Ok(())
    }
}
