//! Tof: the output filer.
//!
//! Symmetric to Tif, but uploads. Wildcard outputs (a glob in the path,
//! or an explicit `path_prefix`) are resolved against the staged volume
//! and uploaded with relative keys; everything else is a plain file or
//! directory upload. Torc skips this stage for tasks without outputs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{info, warn};

use poiesis_models::tes::{TesFileType, TesOutput, TesTask};

use crate::config::{Config, S3Config};
use crate::error::CoreError;
use crate::filer::{Filer, GlobItem, Strategy};
use crate::staging::{STAGING_ROOT, container_path, has_glob, infer_base_path};

pub struct Tof {
    task_id: String,
    outputs: Vec<TesOutput>,
    s3_config: S3Config,
    staging_root: PathBuf,
}

impl Tof {
    pub fn new(task: &TesTask, config: &Config) -> Result<Self, CoreError> {
        let task_id = task
            .id
            .clone()
            .ok_or_else(|| CoreError::BadRequest("task has no id".to_owned()))?;
        Ok(Self {
            task_id,
            outputs: task.outputs().to_vec(),
            s3_config: config.s3.clone(),
            staging_root: PathBuf::from(STAGING_ROOT),
        })
    }

    /// Override the staging root (the volume mount point in production).
    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = root.into();
        self
    }

    async fn upload_output(&self, output: &TesOutput) -> Result<(), CoreError> {
        let strategy = Strategy::for_output(output, &self.s3_config)?;

        if has_glob(&output.path) || output.path_prefix.is_some() {
            let items = resolve_glob_items(output, &self.staging_root)?;
            if items.is_empty() {
                let base = base_path_of(output);
                warn!(
                    pattern = %output.path,
                    base = %base,
                    "glob matched nothing, uploading the base directory instead"
                );
                let fallback = container_path(&base, &self.staging_root);
                return strategy.upload_dir(&fallback).await;
            }
            return strategy.upload_glob(&items).await;
        }

        let source = container_path(&output.path, &self.staging_root);
        match output.r#type {
            TesFileType::File => strategy.upload_file(&source).await,
            TesFileType::Directory => strategy.upload_dir(&source).await,
        }
    }
}

#[async_trait]
impl Filer for Tof {
    fn task_id(&self) -> &str {
        &self.task_id
    }

    fn label(&self) -> &'static str {
        "TOF"
    }

    async fn file(&self) -> Result<(), CoreError> {
        for output in &self.outputs {
            info!(url = %output.url, path = %output.path, "uploading output");
            self.upload_output(output).await?;
        }
        Ok(())
    }
}

/// The directory glob matches are rooted in: the declared `path_prefix`,
/// or the portion of the pattern preceding its first metacharacter.
fn base_path_of(output: &TesOutput) -> String {
    output
        .path_prefix
        .clone()
        .unwrap_or_else(|| infer_base_path(&output.path))
}

/// Resolve a wildcard output against the staged volume.
///
/// Each match's upload key is its path as seen by the executor (staging
/// root stripped) with the base path removed.
pub fn resolve_glob_items(
    output: &TesOutput,
    staging_root: &Path,
) -> Result<Vec<GlobItem>, CoreError> {
    let pattern = container_path(&output.path, staging_root);
    let pattern = pattern.to_string_lossy();
    let base = base_path_of(output);

    let mut items = Vec::new();
    let matches = glob::glob(&pattern)
        .map_err(|e| CoreError::Transfer(format!("invalid glob pattern {}: {e}", output.path)))?;
    for entry in matches {
        let local_path =
            entry.map_err(|e| CoreError::Transfer(format!("glob walk failed: {e}")))?;
        let is_directory = local_path.is_dir();
        let semantic = semantic_path(&local_path, staging_root)?;
        let relative_path = semantic
            .strip_prefix(base.as_str())
            .unwrap_or(&semantic)
            .trim_start_matches('/')
            .to_owned();
        items.push(GlobItem {
            local_path,
            relative_path,
            is_directory,
        });
    }
    Ok(items)
}

/// The absolute path the executor saw, recovered by stripping the
/// staging root.
fn semantic_path(local: &Path, staging_root: &Path) -> Result<String, CoreError> {
    let relative = local.strip_prefix(staging_root).map_err(|_| {
        CoreError::Transfer(format!(
            "{} is outside the staging root {}",
            local.display(),
            staging_root.display()
        ))
    })?;
    Ok(format!("/{}", relative.to_string_lossy()))
}
