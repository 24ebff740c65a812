//! kube-client adaptor for the orchestrator port.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod};
use kube::api::{
    Api, DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams, WatchParams,
};
use kube::core::WatchEvent as KubeWatchEvent;
use kube::{Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::kubernetes::{KubernetesPort, WatchEvent, WatchStream};

/// Orchestrator adaptor backed by the cluster API.
///
/// Client configuration is inferred: in-cluster service account when
/// running inside a pod, kubeconfig otherwise.
#[derive(Clone)]
pub struct KubeAdapter {
    client: Client,
    namespace: String,
}

impl KubeAdapter {
    pub async fn new(namespace: impl Into<String>) -> Result<Self, CoreError> {
        let client = Client::try_default().await.map_err(platform_err)?;
        Ok(Self {
            client,
            namespace: namespace.into(),
        })
    }

    fn jobs(&self) -> Api<Job> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pvcs(&self) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn config_maps(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

fn platform_err(e: kube::Error) -> CoreError {
    CoreError::Platform(e.to_string())
}

/// Swallow NotFound so deletes are idempotent.
fn ignore_not_found(result: Result<(), kube::Error>) -> Result<(), CoreError> {
    match result {
        Ok(()) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(platform_err(e)),
    }
}

async fn delete_all_by_label<K>(api: &Api<K>, label_selector: &str) -> Result<(), CoreError>
where
    K: Resource + Clone + std::fmt::Debug + DeserializeOwned + Serialize + Send + 'static,
    K::DynamicType: Default,
{
    let lp = ListParams::default().labels(label_selector);
    api.delete_collection(&DeleteParams::background(), &lp)
        .await
        .map(|_| ())
        .map_err(platform_err)
}

fn watch_stream<K>(
    stream: impl futures::Stream<Item = Result<KubeWatchEvent<K>, kube::Error>> + Send + 'static,
) -> WatchStream<K>
where
    K: Clone + Send + 'static,
{
    stream
        .map_err(platform_err)
        .try_filter_map(|event| async move {
            Ok(match event {
                KubeWatchEvent::Added(obj) | KubeWatchEvent::Modified(obj) => {
                    Some(WatchEvent::Applied(obj))
                }
                KubeWatchEvent::Deleted(obj) => Some(WatchEvent::Deleted(obj)),
                KubeWatchEvent::Bookmark(_) => None,
                KubeWatchEvent::Error(e) => {
                    return Err(CoreError::Platform(format!("watch error: {e}")));
                }
            })
        })
        .boxed()
}

#[async_trait]
impl KubernetesPort for KubeAdapter {
    async fn create_job(&self, job: Job) -> Result<String, CoreError> {
        let created = self
            .jobs()
            .create(&PostParams::default(), &job)
            .await
            .map_err(platform_err)?;
        let name = created.metadata.name.unwrap_or_default();
        info!(job = %name, namespace = %self.namespace, "created job");
        Ok(name)
    }

    async fn get_job(&self, name: &str) -> Result<Job, CoreError> {
        self.jobs().get(name).await.map_err(platform_err)
    }

    async fn delete_job(&self, name: &str) -> Result<(), CoreError> {
        debug!(job = name, "deleting job");
        ignore_not_found(
            self.jobs()
                .delete(name, &DeleteParams::background())
                .await
                .map(|_| ()),
        )
    }

    async fn list_jobs(&self, label_selector: &str) -> Result<Vec<Job>, CoreError> {
        let lp = ListParams::default().labels(label_selector);
        Ok(self.jobs().list(&lp).await.map_err(platform_err)?.items)
    }

    async fn delete_jobs_by_label(&self, label_selector: &str) -> Result<(), CoreError> {
        delete_all_by_label(&self.jobs(), label_selector).await
    }

    async fn watch_jobs(
        &self,
        field_selector: &str,
        timeout_seconds: u32,
    ) -> Result<WatchStream<Job>, CoreError> {
        let mut wp = WatchParams::default().fields(field_selector);
        if timeout_seconds > 0 {
            wp = wp.timeout(timeout_seconds);
        }
        let stream = self.jobs().watch(&wp, "0").await.map_err(platform_err)?;
        Ok(watch_stream(stream))
    }

    async fn create_pod(&self, pod: Pod) -> Result<String, CoreError> {
        let created = self
            .pods()
            .create(&PostParams::default(), &pod)
            .await
            .map_err(platform_err)?;
        Ok(created.metadata.name.unwrap_or_default())
    }

    async fn get_pod(&self, name: &str) -> Result<Pod, CoreError> {
        self.pods().get(name).await.map_err(platform_err)
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>, CoreError> {
        let lp = ListParams::default().labels(label_selector);
        Ok(self.pods().list(&lp).await.map_err(platform_err)?.items)
    }

    async fn get_pod_log(&self, name: &str) -> Result<String, CoreError> {
        self.pods()
            .logs(name, &LogParams::default())
            .await
            .map_err(platform_err)
    }

    async fn delete_pod(&self, name: &str) -> Result<(), CoreError> {
        ignore_not_found(
            self.pods()
                .delete(name, &DeleteParams::default())
                .await
                .map(|_| ()),
        )
    }

    async fn delete_pods_by_label(&self, label_selector: &str) -> Result<(), CoreError> {
        delete_all_by_label(&self.pods(), label_selector).await
    }

    async fn watch_pods(
        &self,
        label_selector: &str,
        timeout_seconds: u32,
    ) -> Result<WatchStream<Pod>, CoreError> {
        let mut wp = WatchParams::default().labels(label_selector);
        if timeout_seconds > 0 {
            wp = wp.timeout(timeout_seconds);
        }
        let stream = self.pods().watch(&wp, "0").await.map_err(platform_err)?;
        Ok(watch_stream(stream))
    }

    async fn create_pvc(&self, pvc: PersistentVolumeClaim) -> Result<String, CoreError> {
        let created = self
            .pvcs()
            .create(&PostParams::default(), &pvc)
            .await
            .map_err(platform_err)?;
        let name = created.metadata.name.unwrap_or_default();
        info!(pvc = %name, namespace = %self.namespace, "created pvc");
        Ok(name)
    }

    async fn delete_pvc(&self, name: &str) -> Result<(), CoreError> {
        debug!(pvc = name, "deleting pvc");
        ignore_not_found(
            self.pvcs()
                .delete(name, &DeleteParams::default())
                .await
                .map(|_| ()),
        )
    }

    async fn list_pvcs_by_label(
        &self,
        label_selector: &str,
    ) -> Result<Vec<PersistentVolumeClaim>, CoreError> {
        let lp = ListParams::default().labels(label_selector);
        Ok(self.pvcs().list(&lp).await.map_err(platform_err)?.items)
    }

    async fn delete_pvcs_by_label(&self, label_selector: &str) -> Result<(), CoreError> {
        delete_all_by_label(&self.pvcs(), label_selector).await
    }

    async fn create_config_map(&self, config_map: ConfigMap) -> Result<String, CoreError> {
        let created = self
            .config_maps()
            .create(&PostParams::default(), &config_map)
            .await
            .map_err(platform_err)?;
        Ok(created.metadata.name.unwrap_or_default())
    }

    async fn patch_config_map(&self, name: &str, config_map: ConfigMap) -> Result<(), CoreError> {
        self.config_maps()
            .patch(name, &PatchParams::default(), &Patch::Merge(&config_map))
            .await
            .map(|_| ())
            .map_err(platform_err)
    }
}
