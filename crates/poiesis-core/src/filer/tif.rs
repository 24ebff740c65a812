//! Tif: the input filer.
//!
//! Resolves every declared input to a strategy and stages it onto the
//! shared volume. The first failure aborts and is reported on the task
//! channel by [`super::run_filer`]. Torc skips this stage entirely for
//! tasks without inputs.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info};

use poiesis_models::tes::{TesFileType, TesInput, TesTask};

use crate::config::{Config, S3Config};
use crate::error::CoreError;
use crate::filer::{Filer, Strategy};
use crate::staging::{STAGING_ROOT, container_path};

pub struct Tif {
    task_id: String,
    inputs: Vec<TesInput>,
    s3_config: S3Config,
    staging_root: PathBuf,
}

impl Tif {
    pub fn new(task: &TesTask, config: &Config) -> Result<Self, CoreError> {
        let task_id = task
            .id
            .clone()
            .ok_or_else(|| CoreError::BadRequest("task has no id".to_owned()))?;
        Ok(Self {
            task_id,
            inputs: task.inputs().to_vec(),
            s3_config: config.s3.clone(),
            staging_root: PathBuf::from(STAGING_ROOT),
        })
    }

    /// Override the staging root (the volume mount point in production).
    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = root.into();
        self
    }
}

#[async_trait]
impl Filer for Tif {
    fn task_id(&self) -> &str {
        &self.task_id
    }

    fn label(&self) -> &'static str {
        "TIF"
    }

    async fn file(&self) -> Result<(), CoreError> {
        for input in &self.inputs {
            info!(url = ?input.url, path = %input.path, "downloading input");
            let strategy = Strategy::for_input(input, &self.s3_config)?;
            let dest = container_path(&input.path, &self.staging_root);
            debug!(dest = %dest.display(), "staging destination");
            match input.r#type {
                TesFileType::File => strategy.download_file(&dest).await?,
                TesFileType::Directory => strategy.download_dir(&dest).await?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with_inputs(inputs: Vec<TesInput>) -> TesTask {
        TesTask {
            id: Some("11111111-2222-4333-8444-555555555555".to_owned()),
            inputs: Some(inputs),
            ..TesTask::default()
        }
    }

    fn test_config() -> Config {
        Config::from_env()
    }

    #[tokio::test]
    async fn stages_content_and_local_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src.txt");
        std::fs::write(&source, "from disk").unwrap();

        let task = task_with_inputs(vec![
            TesInput {
                path: "/data/inline.txt".to_owned(),
                content: Some("inline bytes".to_owned()),
                ..TesInput::default()
            },
            TesInput {
                path: "/data/disk.txt".to_owned(),
                url: Some(format!("file://{}", source.display())),
                ..TesInput::default()
            },
        ]);

        let staging = dir.path().join("transfer");
        let tif = Tif::new(&task, &test_config())
            .unwrap()
            .with_staging_root(&staging);
        tif.file().await.unwrap();

        assert_eq!(
            std::fs::read_to_string(staging.join("data/inline.txt")).unwrap(),
            "inline bytes"
        );
        assert_eq!(
            std::fs::read_to_string(staging.join("data/disk.txt")).unwrap(),
            "from disk"
        );
    }

    #[tokio::test]
    async fn first_failure_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let task = task_with_inputs(vec![
            TesInput {
                path: "/data/missing.txt".to_owned(),
                url: Some("file:///nonexistent/missing.txt".to_owned()),
                ..TesInput::default()
            },
            TesInput {
                path: "/data/inline.txt".to_owned(),
                content: Some("never staged".to_owned()),
                ..TesInput::default()
            },
        ]);

        let staging = dir.path().join("transfer");
        let tif = Tif::new(&task, &test_config())
            .unwrap()
            .with_staging_root(&staging);
        assert!(tif.file().await.is_err());
        assert!(!staging.join("data/inline.txt").exists());
    }
}
