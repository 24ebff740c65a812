//! Cancellation-controller tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use poiesis_core::cancel::CancelController;
use poiesis_core::error::CoreError;
use poiesis_core::kubernetes::KubernetesPort;
use poiesis_core::manifest::ManifestBuilder;
use poiesis_core::config::{BrokerConfig, Config, S3Config};
use poiesis_core::security::SecurityContexts;
use poiesis_db::repository::TaskRepository;
use poiesis_db::schema::TaskDocument;
use poiesis_models::tes::{TesState, TesTask};
use poiesis_test_utils::{FakeKubernetes, InMemoryRepository, sample_task};

fn test_config() -> Config {
    Config {
        namespace: "poiesis".to_owned(),
        image: "docker.io/elixircloud/poiesis:latest".to_owned(),
        service_account_name: None,
        restart_policy: "Never".to_owned(),
        image_pull_policy: "IfNotPresent".to_owned(),
        job_ttl_seconds: None,
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

struct Harness {
    repo: Arc<InMemoryRepository>,
    k8s: Arc<FakeKubernetes>,
}

impl Harness {
    fn new() -> Self {
        Self {
            repo: Arc::new(InMemoryRepository::new()),
            k8s: Arc::new(FakeKubernetes::new()),
        }
    }

    async fn insert(&self, task: &TesTask, user: &str, state: TesState) -> String {
        let task_id = task.id.clone().unwrap();
        self.repo
            .insert_task(TaskDocument::new(task.clone(), user, "hash"))
            .await
            .expect("insert should succeed");
        self.repo
            .update_task_state(&task_id, state)
            .await
            .expect("state update should succeed");
        task_id
    }

    /// Populate the fake cluster with a task's derived resources.
    async fn materialize_resources(&self, task: &TesTask, task_id: &str) {
        let config = test_config();
        let security = SecurityContexts::default();
        let builder = ManifestBuilder::new(&config, &security);
        self.k8s
            .create_pvc(builder.pvc(task_id, None))
            .await
            .expect("pvc create should succeed");
        self.k8s
            .create_job(builder.texam_job(task_id))
            .await
            .expect("job create should succeed");
        self.k8s
            .create_job(builder.executor_job(
                task,
                task_id,
                &task.executors[0],
                0,
                "/bin/true",
            ))
            .await
            .expect("job create should succeed");
    }

    fn controller(&self) -> CancelController {
        CancelController::new(self.repo.clone(), self.k8s.clone())
    }
}

#[tokio::test]
async fn missing_task_is_not_found() {
    let h = Harness::new();
    let err = h
        .controller()
        .execute("00000000-0000-4000-8000-000000000000", "user-1")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
}

#[tokio::test]
async fn another_users_task_is_not_found_not_forbidden() {
    let h = Harness::new();
    let task = sample_task();
    let task_id = h.insert(&task, "owner", TesState::Running).await;

    let err = h
        .controller()
        .execute(&task_id, "intruder")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));

    // The task is untouched.
    let doc = h.repo.document(&task_id).unwrap();
    assert_eq!(doc.state, TesState::Running);
}

#[tokio::test]
async fn terminal_and_in_flight_cancel_states_are_bad_requests() {
    let h = Harness::new();
    for state in [TesState::Complete, TesState::Canceled, TesState::Canceling] {
        let task = sample_task();
        let task_id = h.insert(&task, "user-1", state).await;
        let err = h
            .controller()
            .execute(&task_id, "user-1")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::BadRequest(_)), "state {state}");
    }
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_flight_reaps_resources_and_confirms() {
    let h = Harness::new();
    let task = sample_task();
    let task_id = h.insert(&task, "user-1", TesState::Running).await;
    h.materialize_resources(&task, &task_id).await;

    let selector = format!("tes-task-id={task_id}");
    assert!(h.k8s.any_resources_matching(&selector));

    h.controller().execute(&task_id, "user-1").await.unwrap();

    // The response path only flips to CANCELING; deletion is async.
    let doc = h.repo.document(&task_id).unwrap();
    assert_eq!(doc.state, TesState::Canceling);

    // Wait for the detached reaper to finish.
    for _ in 0..100 {
        if h.repo.document(&task_id).unwrap().state == TesState::Canceled {
            break;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    assert!(!h.k8s.any_resources_matching(&selector));
    assert_eq!(
        h.repo.state_history(&task_id),
        vec![
            TesState::Initializing,
            TesState::Running,
            TesState::Canceling,
            TesState::Canceled,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn reaper_ignores_resources_of_other_tasks() {
    let h = Harness::new();
    let task = sample_task();
    let task_id = h.insert(&task, "user-1", TesState::Running).await;
    h.materialize_resources(&task, &task_id).await;

    // An unrelated resource that must survive the sweep.
    let mut labels = BTreeMap::new();
    labels.insert("tes-task-id".to_owned(), "other-task".to_owned());
    h.k8s
        .create_job(Job {
            metadata: ObjectMeta {
                name: Some("texam-other-task".to_owned()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        })
        .await
        .unwrap();

    h.controller().execute(&task_id, "user-1").await.unwrap();
    for _ in 0..100 {
        if h.repo.document(&task_id).unwrap().state == TesState::Canceled {
            break;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    assert!(!h.k8s.any_resources_matching(&format!("tes-task-id={task_id}")));
    assert!(h.k8s.any_resources_matching("tes-task-id=other-task"));
}
