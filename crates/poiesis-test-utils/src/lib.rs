//! Shared test utilities for poiesis integration tests.
//!
//! In-memory implementations of the repository, broker, and
//! orchestrator ports, so the pipeline can be exercised end-to-end in
//! one process without a cluster, a document store, or a broker.

pub mod broker;
pub mod kubernetes;
pub mod repository;

pub use broker::InMemoryBroker;
pub use kubernetes::{FakeKubernetes, JobOutcome};
pub use repository::InMemoryRepository;

use poiesis_models::tes::{TesExecutor, TesTask};
use uuid::Uuid;

/// A minimal valid task with one no-op executor and a fresh UUID.
pub fn sample_task() -> TesTask {
    TesTask {
        id: Some(Uuid::new_v4().to_string()),
        name: Some("test-task".to_owned()),
        executors: vec![TesExecutor {
            image: "alpine".to_owned(),
            command: vec!["/bin/true".to_owned()],
            ..TesExecutor::default()
        }],
        ..TesTask::default()
    }
}
