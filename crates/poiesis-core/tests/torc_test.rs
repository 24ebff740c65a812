//! Pipeline-orchestrator tests: stage sequencing, skipping, retry, and
//! terminal states, against the in-memory ports.
//!
//! Stage Jobs are "run" by a creation hook: filer stages publish their
//! terminal message directly, the Texam stage runs the real engine
//! in-process against the same fakes.

use std::sync::Arc;

use poiesis_core::broker::{Message, MessageBroker};
use poiesis_core::config::{BrokerConfig, Config, S3Config};
use poiesis_core::error::CoreError;
use poiesis_core::security::SecurityContexts;
use poiesis_core::texam::Texam;
use poiesis_core::torc::{Torc, launch};
use poiesis_db::repository::TaskRepository;
use poiesis_db::schema::TaskDocument;
use poiesis_models::tes::{TesExecutor, TesInput, TesOutput, TesState, TesTask};
use poiesis_test_utils::{FakeKubernetes, InMemoryBroker, InMemoryRepository};

fn test_config() -> Config {
    Config {
        namespace: "poiesis".to_owned(),
        image: "docker.io/elixircloud/poiesis:latest".to_owned(),
        service_account_name: None,
        restart_policy: "Never".to_owned(),
        image_pull_policy: "IfNotPresent".to_owned(),
        job_ttl_seconds: Some(60),
        pvc_access_mode: "ReadWriteOnce".to_owned(),
        pvc_storage_class: None,
        infrastructure_security_context_enabled: false,
        executor_security_context_enabled: false,
        security_context_path: "/poiesis/security".into(),
        security_context_configmap_name: None,
        redis_secret_name: None,
        mongo_secret_name: None,
        s3_secret_name: None,
        mongodb_uri_secret_key: "uri".to_owned(),
        task_request_path: "/poiesis/task.json".into(),
        monitor_timeout_seconds: 0,
        broker: BrokerConfig {
            host: "redis".to_owned(),
            port: 6379,
            password: None,
        },
        s3: S3Config::default(),
        log_level: "info".to_owned(),
    }
}

fn full_task(task_id: &str) -> TesTask {
    TesTask {
        id: Some(task_id.to_owned()),
        name: Some("torc-test".to_owned()),
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
        executors: vec![TesExecutor {
            image: "alpine".to_owned(),
            command: vec!["/bin/cat".to_owned(), "/data/in.txt".to_owned()],
            stdout: Some("/data/out.txt".to_owned()),
            ..TesExecutor::default()
        }],
        ..TesTask::default()
    }
}

struct Harness {
    task_id: String,
    task: TesTask,
    repo: Arc<InMemoryRepository>,
    k8s: Arc<FakeKubernetes>,
    broker: Arc<InMemoryBroker>,
}

/// How the hook answers each stage Job.
#[derive(Clone, Copy, PartialEq)]
enum StageBehavior {
    Succeed,
    Fail,
    /// Run the real Texam engine (Texam stage only).
    RunTexam,
}

impl Harness {
    async fn new(task: TesTask) -> Self {
        let task_id = task.id.clone().unwrap();
        let repo = Arc::new(InMemoryRepository::new());
        repo.insert_task(TaskDocument::new(task.clone(), "user-1", "hash"))
            .await
            .expect("insert should succeed");
        Self {
            task_id,
            task,
            repo,
            k8s: Arc::new(FakeKubernetes::new()),
            broker: Arc::new(InMemoryBroker::new()),
        }
    }

    /// Install the stage hook: tif/tof publish per their behavior, the
    /// texam stage either publishes or runs the real engine.
    fn script_stages(&self, tif: StageBehavior, texam: StageBehavior, tof: StageBehavior) {
        let task = self.task.clone();
        let task_id = self.task_id.clone();
        let repo = self.repo.clone();
        let k8s = self.k8s.clone();
        let broker = self.broker.clone();

        self.k8s.on_create_job(move |job| {
            let name = job.metadata.name.clone().unwrap_or_default();
            let behavior = if name.starts_with("tif-") {
                tif
            } else if name.starts_with("texam-") {
                texam
            } else if name.starts_with("tof-") {
                tof
            } else {
                // Executor jobs are handled by the Texam engine itself.
                return;
            };

            let stage_label = name.split('-').next().unwrap_or_default().to_uppercase();
            let broker = broker.clone();
            let task_id = task_id.clone();
            match behavior {
                StageBehavior::Succeed => {
                    tokio::spawn(async move {
                        let text = if stage_label == "TEXAM" {
                            format!("TExAM job for {task_id} has been completed.")
                        } else {
                            "Filer completed".to_owned()
                        };
                        let _ = broker.publish(&task_id, &Message::success(text)).await;
                    });
                }
                StageBehavior::Fail => {
                    tokio::spawn(async move {
                        let text = if stage_label == "TEXAM" {
                            "TExAM job failed to run all jobs successfully.".to_owned()
                        } else {
                            format!("{stage_label} failed: transfer error")
                        };
                        let _ = broker.publish(&task_id, &Message::error(text)).await;
                    });
                }
                StageBehavior::RunTexam => {
                    let texam = Texam::new(
                        task.clone(),
                        repo.clone(),
                        k8s.clone(),
                        broker.clone(),
                        test_config(),
                        SecurityContexts::default(),
                    )
                    .expect("texam should build");
                    tokio::spawn(async move {
                        texam.execute().await.expect("texam should run");
                    });
                }
            }
        });
    }

    fn torc(&self) -> Torc {
        Torc::new(
            self.task.clone(),
            self.repo.clone(),
            self.k8s.clone(),
            self.broker.clone(),
            test_config(),
            SecurityContexts::default(),
        )
        .expect("torc should build")
    }
}

#[tokio::test]
async fn launch_creates_torc_job_and_owned_config_map() {
    let task_id = uuid::Uuid::new_v4().to_string();
    let task = full_task(&task_id);
    let k8s = Arc::new(FakeKubernetes::new());
    let config = test_config();
    let security = SecurityContexts::default();

    let job_name = launch(&task, k8s.as_ref(), &config, &security)
        .await
        .unwrap();
    assert_eq!(job_name, format!("torc-{task_id}"));
    assert!(k8s.job_exists(&job_name));

    // The task ConfigMap is owned by the Torc Job so the platform
    // garbage-collects it with the Job.
    let config_map = k8s.config_map(&format!("tes-task-{task_id}")).unwrap();
    let owners = config_map.metadata.owner_references.as_ref().unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].kind, "Job");
    assert_eq!(owners[0].name, job_name);
    assert!(!owners[0].uid.is_empty());

    let payload = config_map.data.as_ref().unwrap().get("task.json").unwrap();
    let embedded: TesTask = serde_json::from_str(payload).unwrap();
    assert_eq!(embedded.id.as_deref(), Some(task_id.as_str()));
}

#[tokio::test]
async fn happy_path_runs_all_stages_and_completes() {
    let task_id = uuid::Uuid::new_v4().to_string();
    let h = Harness::new(full_task(&task_id)).await;
    h.script_stages(
        StageBehavior::Succeed,
        StageBehavior::RunTexam,
        StageBehavior::Succeed,
    );
    // All executor output is redirected into /data/out.txt.
    h.k8s.set_job_log(&format!("te-{task_id}-0"), "");

    h.torc().execute().await.unwrap();

    let doc = h.repo.document(&task_id).unwrap();
    assert_eq!(doc.state, TesState::Complete);
    assert_eq!(
        h.repo.state_history(&task_id),
        vec![TesState::Initializing, TesState::Running, TesState::Complete]
    );

    // One attempt, one executor log, exit 0, everything closed out.
    let logs = doc.task.logs.as_ref().unwrap();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].end_time.is_some());
    assert_eq!(logs[0].logs.len(), 1);
    assert_eq!(logs[0].logs[0].exit_code, 0);
    assert_eq!(logs[0].logs[0].stdout.as_deref(), Some(""));
    assert!(logs[0].logs[0].end_time.is_some());

    // Stage order: input filer, executor engine, executor, output filer.
    assert_eq!(
        h.k8s.created_job_names(),
        vec![
            format!("tif-{task_id}"),
            format!("texam-{task_id}"),
            format!("te-{task_id}-0"),
            format!("tof-{task_id}"),
        ]
    );

    // The claim is gone after success.
    assert!(h.k8s.pvc_names().is_empty());
}

#[tokio::test]
async fn zero_inputs_skips_tif_and_zero_outputs_skips_tof() {
    let task_id = uuid::Uuid::new_v4().to_string();
    let task = TesTask {
        inputs: None,
        outputs: None,
        ..full_task(&task_id)
    };
    let h = Harness::new(task).await;
    h.script_stages(
        StageBehavior::Succeed,
        StageBehavior::Succeed,
        StageBehavior::Succeed,
    );

    h.torc().execute().await.unwrap();

    let created = h.k8s.created_job_names();
    assert_eq!(created, vec![format!("texam-{task_id}")]);
    let doc = h.repo.document(&task_id).unwrap();
    assert_eq!(doc.state, TesState::Complete);
}

#[tokio::test(start_paused = true)]
async fn transient_pvc_failure_retries_and_completes() {
    let task_id = uuid::Uuid::new_v4().to_string();
    let h = Harness::new(full_task(&task_id)).await;
    h.script_stages(
        StageBehavior::Succeed,
        StageBehavior::Succeed,
        StageBehavior::Succeed,
    );
    h.k8s.fail_pvc_creates(1);

    h.torc().execute().await.unwrap();

    let doc = h.repo.document(&task_id).unwrap();
    assert_eq!(doc.state, TesState::Complete);

    // One TaskLog per attempt; the failed attempt was closed out before
    // the retry.
    let logs = doc.task.logs.as_ref().unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs[0].end_time.is_some());
    assert!(logs[1].end_time.is_some());
    assert!(
        logs[0]
            .system_logs
            .as_ref()
            .unwrap()
            .iter()
            .any(|line| line.contains("Attempt 1 failed"))
    );
}

#[tokio::test(start_paused = true)]
async fn persistent_stage_failure_exhausts_retries_to_system_error() {
    let task_id = uuid::Uuid::new_v4().to_string();
    let h = Harness::new(full_task(&task_id)).await;
    h.script_stages(
        StageBehavior::Fail,
        StageBehavior::Succeed,
        StageBehavior::Succeed,
    );

    let err = h.torc().execute().await.unwrap_err();
    assert!(matches!(err, CoreError::StageFailed { .. }));

    let doc = h.repo.document(&task_id).unwrap();
    assert_eq!(doc.state, TesState::SystemError);

    // Three attempts, each with its own closed-out log.
    let logs = doc.task.logs.as_ref().unwrap();
    assert_eq!(logs.len(), 3);
    assert!(logs.iter().all(|l| l.end_time.is_some()));

    // Three tif jobs were submitted (one per attempt).
    let tif_count = h
        .k8s
        .created_job_names()
        .iter()
        .filter(|n| n.starts_with("tif-"))
        .count();
    assert_eq!(tif_count, 3);
    assert!(h.k8s.pvc_names().is_empty());
}

#[tokio::test]
async fn executor_failure_is_terminal_without_retry() {
    let task_id = uuid::Uuid::new_v4().to_string();
    let h = Harness::new(full_task(&task_id)).await;
    h.script_stages(
        StageBehavior::Succeed,
        StageBehavior::Fail,
        StageBehavior::Succeed,
    );

    let err = h.torc().execute().await.unwrap_err();
    assert!(err.is_executor_failure());

    let doc = h.repo.document(&task_id).unwrap();
    assert_eq!(doc.state, TesState::ExecutorError);

    // Exactly one attempt: executor failures are not retried, and the
    // output filer never ran.
    let logs = doc.task.logs.as_ref().unwrap();
    assert_eq!(logs.len(), 1);
    assert!(
        !h.k8s
            .created_job_names()
            .iter()
            .any(|n| n.starts_with("tof-"))
    );
}

#[tokio::test]
async fn executor_failure_records_short_circuit_logs() {
    // Same as above but with the real engine driving two executors, the
    // first of which fails.
    let task_id = uuid::Uuid::new_v4().to_string();
    let mut task = full_task(&task_id);
    task.executors.push(task.executors[0].clone());
    let h = Harness::new(task).await;
    h.script_stages(
        StageBehavior::Succeed,
        StageBehavior::RunTexam,
        StageBehavior::Succeed,
    );
    h.k8s.set_outcome(
        &format!("te-{task_id}-0"),
        poiesis_test_utils::JobOutcome::Failed {
            message: "command exited 1".to_owned(),
        },
    );

    let err = h.torc().execute().await.unwrap_err();
    assert!(err.is_executor_failure());

    let doc = h.repo.document(&task_id).unwrap();
    assert_eq!(doc.state, TesState::ExecutorError);
    let attempt = doc.task.logs.as_ref().unwrap().last().unwrap();
    assert_eq!(attempt.logs.len(), 2);
    assert_eq!(attempt.logs[0].exit_code, 1);
    assert!(
        attempt.logs[1]
            .stderr
            .as_deref()
            .unwrap()
            .contains("failed to start because executor 0 failed")
    );
}
