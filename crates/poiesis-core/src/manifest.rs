//! Deterministic construction of the platform manifests the engine
//! derives from a task: Jobs, the shared claim, and the task ConfigMap.
//!
//! All derived Jobs share a fail-fast template with `backoff_limit: 0`
//! (retry policy lives in the engine) and the configured TTL.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EnvVar, EnvVarSource, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec,
    ResourceRequirements, SecretKeySelector, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use poiesis_models::names;
use poiesis_models::tes::{TesExecutor, TesResources, TesTask};

use crate::config::{Config, env_vars};
use crate::error::CoreError;
use crate::security::SecurityContexts;
use crate::staging::{self, STAGING_ROOT};

/// Volume name of the shared per-task claim in every pod that mounts it.
pub const TASK_PVC_VOLUME: &str = "task-pvc-volume";
/// Volume name of the mounted task ConfigMap.
const TASK_REQUEST_VOLUME: &str = "task-request";
/// Volume name of the mounted security-context ConfigMap.
const SECURITY_CONTEXT_VOLUME: &str = "security-context";
/// Key under which the serialized task lives in its ConfigMap.
const TASK_REQUEST_KEY: &str = "task.json";

/// Builds the manifests for one deployment configuration.
pub struct ManifestBuilder<'a> {
    config: &'a Config,
    security: &'a SecurityContexts,
}

impl<'a> ManifestBuilder<'a> {
    pub fn new(config: &'a Config, security: &'a SecurityContexts) -> Self {
        Self { config, security }
    }

    /// The shared claim backing the task's staging volume.
    pub fn pvc(&self, task_id: &str, disk_gb: Option<f64>) -> PersistentVolumeClaim {
        let storage = disk_gb
            .map(|size| format!("{size}Gi"))
            .unwrap_or_else(|| Config::DEFAULT_PVC_SIZE.to_owned());
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(names::pvc_name(task_id)),
                labels: Some(names::labels("pvc", task_id, "torc")),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec![self.config.pvc_access_mode.clone()]),
                storage_class_name: self.config.pvc_storage_class.clone(),
                resources: Some(
                    k8s_openapi::api::core::v1::VolumeResourceRequirements {
                        requests: Some(BTreeMap::from([(
                            "storage".to_owned(),
                            Quantity(storage),
                        )])),
                        ..Default::default()
                    },
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// The ConfigMap carrying the serialized task into stage containers.
    ///
    /// Owned by the Torc Job (when its reference is known) so the
    /// platform garbage-collects it with the Job.
    pub fn task_config_map(
        &self,
        task: &TesTask,
        task_id: &str,
        owner: Option<OwnerReference>,
    ) -> Result<ConfigMap, CoreError> {
        let payload = serde_json::to_string(task)
            .map_err(|e| CoreError::BadRequest(format!("task cannot be serialized: {e}")))?;
        Ok(ConfigMap {
            metadata: ObjectMeta {
                name: Some(names::task_config_map_name(task_id)),
                owner_references: owner.map(|o| vec![o]),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(TASK_REQUEST_KEY.to_owned(), payload)])),
            ..Default::default()
        })
    }

    /// The orchestrator Job the API launches for a task.
    pub fn torc_job(&self, task: &TesTask, task_id: &str) -> Result<Job, CoreError> {
        let payload = serde_json::to_string(task)
            .map_err(|e| CoreError::BadRequest(format!("task cannot be serialized: {e}")))?;
        let name = names::torc_job_name(task_id);
        let container = self.infra_container(
            &name,
            vec![
                "poiesis".into(),
                "torc".into(),
                "run".into(),
                "--task".into(),
                payload,
            ],
            Vec::new(),
        );
        let labels = names::labels("torc", task_id, "poiesis-api");
        Ok(self.job(name, labels, self.infra_pod_spec(container, Vec::new())))
    }

    /// An input- or output-filer Job, mounting the claim at the staging
    /// root and the task ConfigMap at the request path.
    fn filer_job(&self, component: &str, job_name: String, task_id: &str) -> Job {
        let mut mounts = vec![VolumeMount {
            name: TASK_PVC_VOLUME.to_owned(),
            mount_path: STAGING_ROOT.to_owned(),
            ..Default::default()
        }];
        mounts.push(self.task_request_mount());
        let container = self.infra_container(
            &job_name,
            vec![
                "poiesis".into(),
                component.into(),
                "run".into(),
            ],
            mounts,
        );
        let volumes = vec![self.pvc_volume(task_id), self.task_request_volume(task_id)];
        let labels = names::labels(component, task_id, &names::torc_job_name(task_id));
        self.job(job_name, labels, self.infra_pod_spec(container, volumes))
    }

    pub fn tif_job(&self, task_id: &str) -> Job {
        self.filer_job(names::TIF_PREFIX, names::tif_job_name(task_id), task_id)
    }

    pub fn tof_job(&self, task_id: &str) -> Job {
        self.filer_job(names::TOF_PREFIX, names::tof_job_name(task_id), task_id)
    }

    /// The executor-and-monitor Job. It orchestrates executor Jobs and
    /// never touches the claim itself, so only the task ConfigMap is
    /// mounted.
    pub fn texam_job(&self, task_id: &str) -> Job {
        let name = names::texam_job_name(task_id);
        let container = self.infra_container(
            &name,
            vec!["poiesis".into(), "texam".into(), "run".into()],
            vec![self.task_request_mount()],
        );
        let volumes = vec![self.task_request_volume(task_id)];
        let labels = BTreeMap::from([
            ("component".to_owned(), names::TEXAM_PREFIX.to_owned()),
            (names::TASK_ID_LABEL.to_owned(), task_id.to_owned()),
        ]);
        self.job(name, labels, self.infra_pod_spec(container, volumes))
    }

    /// One executor Job. `command` is the synthesized shell pipeline run
    /// under `/bin/sh -c`; the claim is mounted so every declared path is
    /// visible at its semantic location.
    pub fn executor_job(
        &self,
        task: &TesTask,
        task_id: &str,
        executor: &TesExecutor,
        index: usize,
        command: &str,
    ) -> Job {
        let name = format!("{}-{}-{}", names::TE_PREFIX, task_id, index);

        let volume_mounts: Vec<VolumeMount> = staging::executor_mounts(task)
            .into_iter()
            .map(|m| VolumeMount {
                name: TASK_PVC_VOLUME.to_owned(),
                mount_path: m.mount_path,
                sub_path: Some(m.sub_path),
                ..Default::default()
            })
            .collect();

        let env: Option<Vec<EnvVar>> = executor.env.as_ref().map(|vars| {
            vars.iter()
                .map(|(k, v)| EnvVar {
                    name: k.clone(),
                    value: Some(v.clone()),
                    ..Default::default()
                })
                .collect()
        });

        let container = Container {
            name: name.clone(),
            image: Some(executor.image.clone()),
            command: Some(vec!["/bin/sh".to_owned(), "-c".to_owned()]),
            args: Some(vec![command.to_owned()]),
            working_dir: executor.workdir.clone(),
            env,
            resources: executor_resources(task.resources.as_ref()),
            volume_mounts: Some(volume_mounts),
            image_pull_policy: Some(self.config.image_pull_policy.clone()),
            security_context: self.security.executor.container.clone(),
            ..Default::default()
        };

        let labels = BTreeMap::from([
            ("component".to_owned(), names::TE_PREFIX.to_owned()),
            ("parent".to_owned(), names::texam_job_name(task_id)),
            (names::TASK_ID_LABEL.to_owned(), task_id.to_owned()),
        ]);

        let pod_spec = PodSpec {
            containers: vec![container],
            restart_policy: Some(self.config.restart_policy.clone()),
            service_account_name: self.config.service_account_name.clone(),
            security_context: self.security.executor.pod.clone(),
            volumes: Some(vec![self.pvc_volume(task_id)]),
            ..Default::default()
        };

        self.job(name, labels, pod_spec)
    }

    /// Shared Job template: fail fast, TTL from config, labels copied
    /// onto the pod template so label sweeps catch pods too.
    fn job(&self, name: String, labels: BTreeMap<String, String>, pod_spec: PodSpec) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some(name),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(JobSpec {
                backoff_limit: Some(0),
                ttl_seconds_after_finished: self.config.job_ttl_seconds,
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(pod_spec),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn infra_container(
        &self,
        name: &str,
        command: Vec<String>,
        volume_mounts: Vec<VolumeMount>,
    ) -> Container {
        let mut mounts = volume_mounts;
        if let Some(mount) = self.security_context_mount() {
            mounts.push(mount);
        }
        Container {
            name: name.to_owned(),
            image: Some(self.config.image.clone()),
            command: Some(command),
            env: Some(self.stage_env()),
            image_pull_policy: Some(self.config.image_pull_policy.clone()),
            security_context: self.security.infrastructure.container.clone(),
            volume_mounts: (!mounts.is_empty()).then_some(mounts),
            ..Default::default()
        }
    }

    fn infra_pod_spec(&self, container: Container, volumes: Vec<Volume>) -> PodSpec {
        let mut volumes = volumes;
        if let Some(volume) = self.security_context_volume() {
            volumes.push(volume);
        }
        PodSpec {
            containers: vec![container],
            restart_policy: Some(self.config.restart_policy.clone()),
            service_account_name: self.config.service_account_name.clone(),
            security_context: self.security.infrastructure.pod.clone(),
            volumes: (!volumes.is_empty()).then_some(volumes),
            ..Default::default()
        }
    }

    fn pvc_volume(&self, task_id: &str) -> Volume {
        Volume {
            name: TASK_PVC_VOLUME.to_owned(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: names::pvc_name(task_id),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn task_request_volume(&self, task_id: &str) -> Volume {
        Volume {
            name: TASK_REQUEST_VOLUME.to_owned(),
            config_map: Some(ConfigMapVolumeSource {
                name: names::task_config_map_name(task_id),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn task_request_mount(&self) -> VolumeMount {
        let dir = self
            .config
            .task_request_path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/poiesis".to_owned());
        VolumeMount {
            name: TASK_REQUEST_VOLUME.to_owned(),
            mount_path: dir,
            ..Default::default()
        }
    }

    fn security_context_volume(&self) -> Option<Volume> {
        let enabled = self.config.infrastructure_security_context_enabled
            || self.config.executor_security_context_enabled;
        let name = self.config.security_context_configmap_name.as_ref()?;
        enabled.then(|| Volume {
            name: SECURITY_CONTEXT_VOLUME.to_owned(),
            config_map: Some(ConfigMapVolumeSource {
                name: name.clone(),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn security_context_mount(&self) -> Option<VolumeMount> {
        let enabled = self.config.infrastructure_security_context_enabled
            || self.config.executor_security_context_enabled;
        self.config.security_context_configmap_name.as_ref()?;
        enabled.then(|| VolumeMount {
            name: SECURITY_CONTEXT_VOLUME.to_owned(),
            mount_path: self.config.security_context_path.to_string_lossy().into_owned(),
            ..Default::default()
        })
    }

    /// Environment projected into every stage container.
    fn stage_env(&self) -> Vec<EnvVar> {
        let mut env = vec![
            value_env(env_vars::BROKER_HOST, &self.config.broker.host),
            value_env(env_vars::BROKER_PORT, &self.config.broker.port.to_string()),
            value_env(env_vars::NAMESPACE, &self.config.namespace),
            value_env(env_vars::IMAGE, &self.config.image),
            value_env(env_vars::RESTART_POLICY, &self.config.restart_policy),
            value_env(env_vars::IMAGE_PULL_POLICY, &self.config.image_pull_policy),
            value_env(env_vars::PVC_ACCESS_MODE, &self.config.pvc_access_mode),
            value_env(env_vars::LOG_LEVEL, &self.config.log_level),
            value_env(
                env_vars::MONITOR_TIMEOUT_SECONDS,
                &self.config.monitor_timeout_seconds.to_string(),
            ),
            value_env(
                env_vars::TASK_REQUEST_PATH,
                &self.config.task_request_path.to_string_lossy(),
            ),
            value_env(
                env_vars::MONGODB_URI_SECRET_KEY,
                &self.config.mongodb_uri_secret_key,
            ),
            value_env(
                env_vars::INFRA_SECURITY_CONTEXT_ENABLED,
                &self.config.infrastructure_security_context_enabled.to_string(),
            ),
            value_env(
                env_vars::EXECUTOR_SECURITY_CONTEXT_ENABLED,
                &self.config.executor_security_context_enabled.to_string(),
            ),
            value_env(
                env_vars::SECURITY_CONTEXT_PATH,
                &self.config.security_context_path.to_string_lossy(),
            ),
        ];

        if let Some(sa) = &self.config.service_account_name {
            env.push(value_env(env_vars::SERVICE_ACCOUNT_NAME, sa));
        }
        if let Some(ttl) = self.config.job_ttl_seconds {
            env.push(value_env(env_vars::JOB_TTL, &ttl.to_string()));
        }
        if let Some(class) = &self.config.pvc_storage_class {
            env.push(value_env(env_vars::PVC_STORAGE_CLASS, class));
        }
        if let Some(name) = &self.config.security_context_configmap_name {
            env.push(value_env(env_vars::SECURITY_CONTEXT_CONFIGMAP_NAME, name));
        }
        if let Some(region) = &self.config.s3.region {
            env.push(value_env(env_vars::AWS_REGION, region));
        }
        if let Some(endpoint) = &self.config.s3.endpoint {
            env.push(value_env(env_vars::S3_URL, endpoint));
        }

        // Secret projections: broker password, document-store URI, and
        // object-store credentials come from their Secrets, never as
        // literal values.
        if let Some(secret) = &self.config.redis_secret_name {
            env.push(value_env(env_vars::REDIS_SECRET_NAME, secret));
            env.push(secret_env(
                env_vars::BROKER_PASSWORD,
                secret,
                env_vars::BROKER_PASSWORD,
                true,
            ));
        }
        if let Some(secret) = &self.config.mongo_secret_name {
            env.push(value_env(env_vars::MONGO_SECRET_NAME, secret));
            env.push(secret_env(
                env_vars::MONGODB_CONNECTION_STRING,
                secret,
                &self.config.mongodb_uri_secret_key,
                false,
            ));
        }
        if let Some(secret) = &self.config.s3_secret_name {
            env.push(value_env(env_vars::S3_SECRET_NAME, secret));
            env.push(secret_env(
                env_vars::AWS_ACCESS_KEY_ID,
                secret,
                env_vars::AWS_ACCESS_KEY_ID,
                true,
            ));
            env.push(secret_env(
                env_vars::AWS_SECRET_ACCESS_KEY,
                secret,
                env_vars::AWS_SECRET_ACCESS_KEY,
                true,
            ));
        }

        env
    }
}

fn value_env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_owned(),
        value: Some(value.to_owned()),
        ..Default::default()
    }
}

fn secret_env(name: &str, secret: &str, key: &str, optional: bool) -> EnvVar {
    EnvVar {
        name: name.to_owned(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_owned(),
                key: key.to_owned(),
                optional: Some(optional),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn executor_resources(resources: Option<&TesResources>) -> Option<ResourceRequirements> {
    let resources = resources?;
    let mut requests = BTreeMap::new();
    if let Some(cpu) = resources.cpu_cores {
        requests.insert("cpu".to_owned(), Quantity(cpu.to_string()));
    }
    if let Some(ram) = resources.ram_gb {
        requests.insert("memory".to_owned(), Quantity(format!("{ram}Gi")));
    }
    if requests.is_empty() {
        return None;
    }
    Some(ResourceRequirements {
        requests: Some(requests.clone()),
        limits: Some(requests),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use poiesis_models::tes::{TesInput, TesOutput};

    fn test_config() -> Config {
        Config {
            namespace: "poiesis".to_owned(),
            image: "docker.io/elixircloud/poiesis:latest".to_owned(),
            service_account_name: Some("poiesis-sa".to_owned()),
            restart_policy: "Never".to_owned(),
            image_pull_policy: "IfNotPresent".to_owned(),
            job_ttl_seconds: Some(120),
            pvc_access_mode: "ReadWriteOnce".to_owned(),
            pvc_storage_class: None,
            infrastructure_security_context_enabled: false,
            executor_security_context_enabled: false,
            security_context_path: "/poiesis/security".into(),
            security_context_configmap_name: None,
            redis_secret_name: Some("poiesis-redis".to_owned()),
            mongo_secret_name: Some("poiesis-mongo".to_owned()),
            s3_secret_name: None,
            mongodb_uri_secret_key: "uri".to_owned(),
            task_request_path: "/poiesis/task.json".into(),
            monitor_timeout_seconds: 0,
            broker: crate::config::BrokerConfig {
                host: "redis".to_owned(),
                port: 6379,
                password: None,
            },
            s3: crate::config::S3Config::default(),
            log_level: "info".to_owned(),
        }
    }

    fn sample_task() -> TesTask {
        TesTask {
            id: Some("11111111-2222-4333-8444-555555555555".to_owned()),
            executors: vec![TesExecutor {
                image: "alpine".to_owned(),
                command: vec!["/bin/cat".to_owned(), "/data/in.txt".to_owned()],
                ..TesExecutor::default()
            }],
            inputs: Some(vec![TesInput {
                path: "/data/in.txt".to_owned(),
                url: Some("s3://b/in.txt".to_owned()),
                ..TesInput::default()
            }]),
            outputs: Some(vec![TesOutput {
                path: "/data/out.txt".to_owned(),
                url: "s3://b/out.txt".to_owned(),
                ..TesOutput::default()
            }]),
            resources: Some(TesResources {
                cpu_cores: Some(2),
                ram_gb: Some(4.0),
                ..TesResources::default()
            }),
            ..TesTask::default()
        }
    }

    #[test]
    fn jobs_fail_fast_with_ttl() {
        let config = test_config();
        let security = SecurityContexts::default();
        let builder = ManifestBuilder::new(&config, &security);
        let job = builder.tif_job("abc");
        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(0));
        assert_eq!(spec.ttl_seconds_after_finished, Some(120));
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.service_account_name.as_deref(), Some("poiesis-sa"));
    }

    #[test]
    fn filer_job_mounts_claim_at_staging_root() {
        let config = test_config();
        let security = SecurityContexts::default();
        let builder = ManifestBuilder::new(&config, &security);
        let job = builder.tof_job("abc");
        let pod = job.spec.unwrap().template.spec.unwrap();
        let mounts = pod.containers[0].volume_mounts.as_ref().unwrap();
        assert!(
            mounts
                .iter()
                .any(|m| m.name == TASK_PVC_VOLUME && m.mount_path == "/transfer")
        );
        let volumes = pod.volumes.unwrap();
        let claim = volumes
            .iter()
            .find_map(|v| v.persistent_volume_claim.as_ref())
            .unwrap();
        assert_eq!(claim.claim_name, "pvc-abc");
    }

    #[test]
    fn stage_labels_match_canonical_table() {
        let config = test_config();
        let security = SecurityContexts::default();
        let builder = ManifestBuilder::new(&config, &security);

        let tif = builder.tif_job("abc");
        let labels = tif.metadata.labels.unwrap();
        assert_eq!(labels.get("component").map(String::as_str), Some("tif"));
        assert_eq!(labels.get("tes-task-id").map(String::as_str), Some("abc"));
        assert_eq!(labels.get("part-of").map(String::as_str), Some("torc-abc"));

        let texam = builder.texam_job("abc");
        let labels = texam.metadata.labels.unwrap();
        assert_eq!(labels.get("component").map(String::as_str), Some("texam"));
        assert_eq!(labels.get("tes-task-id").map(String::as_str), Some("abc"));
    }

    #[test]
    fn executor_job_mounts_semantic_paths_and_resources() {
        let config = test_config();
        let security = SecurityContexts::default();
        let builder = ManifestBuilder::new(&config, &security);
        let task = sample_task();
        let task_id = task.id.clone().unwrap();
        let job = builder.executor_job(
            &task,
            &task_id,
            &task.executors[0],
            0,
            "/bin/cat '/data/in.txt'",
        );

        assert_eq!(
            job.metadata.name.as_deref(),
            Some("te-11111111-2222-4333-8444-555555555555-0")
        );
        let labels = job.metadata.labels.as_ref().unwrap();
        assert_eq!(
            labels.get("parent").map(String::as_str),
            Some("texam-11111111-2222-4333-8444-555555555555")
        );

        let pod = job.spec.unwrap().template.spec.unwrap();
        let container = &pod.containers[0];
        assert_eq!(
            container.command.as_deref(),
            Some(["/bin/sh".to_owned(), "-c".to_owned()].as_slice())
        );
        let mounts = container.volume_mounts.as_ref().unwrap();
        assert!(
            mounts
                .iter()
                .any(|m| m.mount_path == "/data" && m.sub_path.as_deref() == Some("data"))
        );
        let resources = container.resources.as_ref().unwrap();
        let limits = resources.limits.as_ref().unwrap();
        assert_eq!(limits.get("cpu"), Some(&Quantity("2".to_owned())));
        assert_eq!(limits.get("memory"), Some(&Quantity("4Gi".to_owned())));
    }

    #[test]
    fn stage_env_projects_secrets_by_reference() {
        let config = test_config();
        let security = SecurityContexts::default();
        let builder = ManifestBuilder::new(&config, &security);
        let job = builder.texam_job("abc");
        let pod = job.spec.unwrap().template.spec.unwrap();
        let env = pod.containers[0].env.as_ref().unwrap();

        let uri = env
            .iter()
            .find(|e| e.name == env_vars::MONGODB_CONNECTION_STRING)
            .unwrap();
        let secret_ref = uri
            .value_from
            .as_ref()
            .unwrap()
            .secret_key_ref
            .as_ref()
            .unwrap();
        assert_eq!(secret_ref.name, "poiesis-mongo");
        assert_eq!(secret_ref.key, "uri");

        let host = env.iter().find(|e| e.name == env_vars::BROKER_HOST).unwrap();
        assert_eq!(host.value.as_deref(), Some("redis"));
    }

    #[test]
    fn torc_job_embeds_the_task_payload() {
        let config = test_config();
        let security = SecurityContexts::default();
        let builder = ManifestBuilder::new(&config, &security);
        let task = sample_task();
        let task_id = task.id.clone().unwrap();
        let job = builder.torc_job(&task, &task_id).unwrap();

        assert_eq!(
            job.metadata.name.as_deref(),
            Some(format!("torc-{task_id}").as_str())
        );
        let labels = job.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get("component").map(String::as_str), Some("torc"));
        assert_eq!(
            labels.get("tes-task-id").map(String::as_str),
            Some(task_id.as_str())
        );
        assert_eq!(
            labels.get("part-of").map(String::as_str),
            Some("poiesis-api")
        );

        let spec = job.spec.as_ref().unwrap();
        assert_eq!(spec.backoff_limit, Some(0));
        assert_eq!(spec.ttl_seconds_after_finished, Some(120));

        let pod = spec.template.spec.as_ref().unwrap();
        assert_eq!(pod.service_account_name.as_deref(), Some("poiesis-sa"));
        let container = &pod.containers[0];
        let command = container.command.as_ref().unwrap();
        assert_eq!(command[..4], ["poiesis", "torc", "run", "--task"]);
        let embedded: TesTask = serde_json::from_str(&command[4]).unwrap();
        assert_eq!(embedded.id, task.id);

        // The orchestrator gets the same env projection as the stages.
        let env = container.env.as_ref().unwrap();
        assert!(
            env.iter()
                .any(|e| e.name == env_vars::MONGODB_CONNECTION_STRING)
        );
    }

    #[test]
    fn task_config_map_is_owned_by_the_torc_job() {
        let config = test_config();
        let security = SecurityContexts::default();
        let builder = ManifestBuilder::new(&config, &security);
        let task = sample_task();
        let task_id = task.id.clone().unwrap();

        let owner = OwnerReference {
            api_version: "batch/v1".to_owned(),
            kind: "Job".to_owned(),
            name: format!("torc-{task_id}"),
            uid: "uid-1234".to_owned(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        };
        let config_map = builder
            .task_config_map(&task, &task_id, Some(owner))
            .unwrap();

        assert_eq!(
            config_map.metadata.name.as_deref(),
            Some(format!("tes-task-{task_id}").as_str())
        );
        let owners = config_map.metadata.owner_references.as_ref().unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "Job");
        assert_eq!(owners[0].name, format!("torc-{task_id}"));
        assert_eq!(owners[0].uid, "uid-1234");

        let payload = config_map.data.as_ref().unwrap().get("task.json").unwrap();
        let embedded: TesTask = serde_json::from_str(payload).unwrap();
        assert_eq!(embedded.id, task.id);
        assert_eq!(embedded.executors.len(), task.executors.len());
    }

    #[test]
    fn pvc_defaults_to_one_gi() {
        let config = test_config();
        let security = SecurityContexts::default();
        let builder = ManifestBuilder::new(&config, &security);

        let pvc = builder.pvc("abc", None);
        let requests = pvc
            .spec
            .unwrap()
            .resources
            .unwrap()
            .requests
            .unwrap();
        assert_eq!(requests.get("storage"), Some(&Quantity("1Gi".to_owned())));

        let pvc = builder.pvc("abc", Some(8.0));
        let requests = pvc
            .spec
            .unwrap()
            .resources
            .unwrap()
            .requests
            .unwrap();
        assert_eq!(requests.get("storage"), Some(&Quantity("8Gi".to_owned())));
    }
}
