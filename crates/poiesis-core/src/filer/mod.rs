//! File staging: scheme-dispatched transfer strategies and the Tif/Tof
//! runtimes built on them.
//!
//! Dispatch is a closed set keyed on the URL scheme: no URL means inline
//! content, `file` is a local copy, `s3` the object store, `http(s)`
//! download-only. Unknown schemes fail closed instead of defaulting to a
//! local copy.

pub mod content;
pub mod http;
pub mod local;
pub mod s3;
pub mod tif;
pub mod tof;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{error, info};
use url::Url;

use poiesis_models::tes::{TesInput, TesOutput};

use crate::broker::{Message, MessageBroker};
use crate::config::S3Config;
use crate::error::CoreError;

/// One filesystem match of a wildcard output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobItem {
    /// Location of the match under the staging root.
    pub local_path: PathBuf,
    /// Upload key relative to the output URL, `path_prefix` stripped.
    pub relative_path: String,
    pub is_directory: bool,
}

/// A transfer strategy bound to one input or output.
#[derive(Debug)]
pub enum Strategy {
    Content(content::ContentStrategy),
    Local(local::LocalStrategy),
    S3(s3::S3Strategy),
    Http(http::HttpStrategy),
}

impl Strategy {
    /// Strategy for an input: inline content when no URL is given,
    /// otherwise dispatched on the URL scheme.
    pub fn for_input(input: &TesInput, s3_config: &S3Config) -> Result<Self, CoreError> {
        match input.url.as_deref() {
            None => {
                let content = input.content.clone().ok_or_else(|| {
                    CoreError::Transfer(format!(
                        "input {} has neither url nor content",
                        input.path
                    ))
                })?;
                Ok(Self::Content(content::ContentStrategy::new(content)))
            }
            Some(url) => Self::for_url(url, s3_config),
        }
    }

    /// Strategy for an output, dispatched on the URL scheme.
    pub fn for_output(output: &TesOutput, s3_config: &S3Config) -> Result<Self, CoreError> {
        Self::for_url(&output.url, s3_config)
    }

    fn for_url(url: &str, s3_config: &S3Config) -> Result<Self, CoreError> {
        let parsed = Url::parse(url)
            .map_err(|e| CoreError::Transfer(format!("invalid URL {url:?}: {e}")))?;
        match parsed.scheme() {
            "file" => Ok(Self::Local(local::LocalStrategy::new(parsed.path()))),
            "s3" => Ok(Self::S3(s3::S3Strategy::new(url, s3_config)?)),
            "http" | "https" => Ok(Self::Http(http::HttpStrategy::new(url))),
            other => Err(CoreError::Transfer(format!(
                "unsupported URL scheme {other:?} in {url:?}"
            ))),
        }
    }

    pub async fn download_file(&self, container_path: &Path) -> Result<(), CoreError> {
        match self {
            Self::Content(s) => s.download_file(container_path).await,
            Self::Local(s) => s.download_file(container_path).await,
            Self::S3(s) => s.download_file(container_path).await,
            Self::Http(s) => s.download_file(container_path).await,
        }
    }

    pub async fn download_dir(&self, container_path: &Path) -> Result<(), CoreError> {
        match self {
            Self::Content(s) => s.download_dir(container_path).await,
            Self::Local(s) => s.download_dir(container_path).await,
            Self::S3(s) => s.download_dir(container_path).await,
            Self::Http(s) => s.download_dir(container_path).await,
        }
    }

    pub async fn upload_file(&self, container_path: &Path) -> Result<(), CoreError> {
        match self {
            Self::Content(s) => s.upload_file(container_path).await,
            Self::Local(s) => s.upload_file(container_path).await,
            Self::S3(s) => s.upload_file(container_path).await,
            Self::Http(s) => s.upload_file(container_path).await,
        }
    }

    pub async fn upload_dir(&self, container_path: &Path) -> Result<(), CoreError> {
        match self {
            Self::Content(s) => s.upload_dir(container_path).await,
            Self::Local(s) => s.upload_dir(container_path).await,
            Self::S3(s) => s.upload_dir(container_path).await,
            Self::Http(s) => s.upload_dir(container_path).await,
        }
    }

    pub async fn upload_glob(&self, items: &[GlobItem]) -> Result<(), CoreError> {
        match self {
            Self::Content(s) => s.upload_glob(items).await,
            Self::Local(s) => s.upload_glob(items).await,
            Self::S3(s) => s.upload_glob(items).await,
            Self::Http(s) => s.upload_glob(items).await,
        }
    }
}

/// A filer runtime (Tif or Tof).
#[async_trait]
pub trait Filer: Send + Sync {
    fn task_id(&self) -> &str;
    /// Name used in failure messages, e.g. "TIF".
    fn label(&self) -> &'static str;
    /// Transfer every declared item; the first failure aborts.
    async fn file(&self) -> Result<(), CoreError>;
}

/// Run a filer and publish its terminal message on the task channel.
///
/// The error is re-raised after publishing so the process exits non-zero.
pub async fn run_filer(filer: &dyn Filer, broker: &dyn MessageBroker) -> Result<(), CoreError> {
    info!(task_id = filer.task_id(), filer = filer.label(), "starting file operation");
    match filer.file().await {
        Ok(()) => {
            info!(task_id = filer.task_id(), filer = filer.label(), "file operation completed");
            broker
                .publish(filer.task_id(), &Message::success("Filer completed"))
                .await?;
            Ok(())
        }
        Err(e) => {
            error!(task_id = filer.task_id(), filer = filer.label(), error = %e, "file operation failed");
            let text = format!("{} failed: {e}", filer.label());
            if let Err(publish_err) = broker
                .publish(filer.task_id(), &Message::error(text))
                .await
            {
                error!(task_id = filer.task_id(), error = %publish_err, "failed to publish filer failure");
            }
            Err(e)
        }
    }
}

/// Create the parent directory of a staging destination.
pub(crate) async fn ensure_parent(path: &Path) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CoreError::Transfer(format!("cannot create {}: {e}", parent.display())))?;
    }
    Ok(())
}
