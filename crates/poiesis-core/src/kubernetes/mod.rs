//! The orchestrator port: create/read/delete/watch the platform
//! resources the engine derives from a task.
//!
//! Failure semantics: NotFound on any delete is swallowed by the
//! adaptor; other API errors propagate as [`CoreError::Platform`].
//! Watches may end cleanly on timeout; callers must treat "stream ended
//! before a terminal event" as a timeout.

pub mod adaptor;

use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod};

use crate::error::CoreError;

/// A watch event for a resource of type `T`.
#[derive(Debug, Clone)]
pub enum WatchEvent<T> {
    /// The resource was added or modified.
    Applied(T),
    Deleted(T),
}

pub type WatchStream<T> = BoxStream<'static, Result<WatchEvent<T>, CoreError>>;

/// Narrow client interface over the container orchestrator.
#[async_trait]
pub trait KubernetesPort: Send + Sync {
    async fn create_job(&self, job: Job) -> Result<String, CoreError>;
    async fn get_job(&self, name: &str) -> Result<Job, CoreError>;
    /// Idempotent: deleting an absent job succeeds.
    async fn delete_job(&self, name: &str) -> Result<(), CoreError>;
    async fn list_jobs(&self, label_selector: &str) -> Result<Vec<Job>, CoreError>;
    async fn delete_jobs_by_label(&self, label_selector: &str) -> Result<(), CoreError>;
    /// Watch jobs matching a field selector, e.g. `metadata.name=<name>`.
    async fn watch_jobs(
        &self,
        field_selector: &str,
        timeout_seconds: u32,
    ) -> Result<WatchStream<Job>, CoreError>;

    async fn create_pod(&self, pod: Pod) -> Result<String, CoreError>;
    async fn get_pod(&self, name: &str) -> Result<Pod, CoreError>;
    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>, CoreError>;
    async fn get_pod_log(&self, name: &str) -> Result<String, CoreError>;
    /// Idempotent: deleting an absent pod succeeds.
    async fn delete_pod(&self, name: &str) -> Result<(), CoreError>;
    async fn delete_pods_by_label(&self, label_selector: &str) -> Result<(), CoreError>;
    async fn watch_pods(
        &self,
        label_selector: &str,
        timeout_seconds: u32,
    ) -> Result<WatchStream<Pod>, CoreError>;

    async fn create_pvc(&self, pvc: PersistentVolumeClaim) -> Result<String, CoreError>;
    /// Idempotent: deleting an absent claim succeeds.
    async fn delete_pvc(&self, name: &str) -> Result<(), CoreError>;
    async fn list_pvcs_by_label(
        &self,
        label_selector: &str,
    ) -> Result<Vec<PersistentVolumeClaim>, CoreError>;
    async fn delete_pvcs_by_label(&self, label_selector: &str) -> Result<(), CoreError>;

    async fn create_config_map(&self, config_map: ConfigMap) -> Result<String, CoreError>;
    async fn patch_config_map(&self, name: &str, config_map: ConfigMap) -> Result<(), CoreError>;
}
