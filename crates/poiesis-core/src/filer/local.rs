//! Local-filesystem strategy for `file://` URLs.

use std::path::{Path, PathBuf};

use tracing::info;
use walkdir::WalkDir;

use crate::error::CoreError;
use crate::filer::{GlobItem, ensure_parent};

/// Copies files or directories between a mounted filesystem path and the
/// staging volume, preserving metadata where the platform allows.
#[derive(Debug)]
pub struct LocalStrategy {
    path: PathBuf,
}

impl LocalStrategy {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn download_file(&self, container_path: &Path) -> Result<(), CoreError> {
        copy_file(&self.path, container_path).await
    }

    pub async fn download_dir(&self, container_path: &Path) -> Result<(), CoreError> {
        copy_tree(&self.path, container_path).await
    }

    pub async fn upload_file(&self, container_path: &Path) -> Result<(), CoreError> {
        copy_file(container_path, &self.path).await
    }

    pub async fn upload_dir(&self, container_path: &Path) -> Result<(), CoreError> {
        copy_tree(container_path, &self.path).await
    }

    pub async fn upload_glob(&self, items: &[GlobItem]) -> Result<(), CoreError> {
        for item in items {
            let dest = self.path.join(&item.relative_path);
            if item.is_directory {
                copy_tree(&item.local_path, &dest).await?;
            } else {
                copy_file(&item.local_path, &dest).await?;
            }
        }
        Ok(())
    }
}

fn io_err(context: &Path, e: std::io::Error) -> CoreError {
    CoreError::Transfer(format!("{}: {e}", context.display()))
}

/// Copy one file, refusing directories.
async fn copy_file(source: &Path, dest: &Path) -> Result<(), CoreError> {
    let meta = tokio::fs::metadata(source)
        .await
        .map_err(|e| io_err(source, e))?;
    if !meta.is_file() {
        return Err(CoreError::Transfer(format!(
            "{} is not a file",
            source.display()
        )));
    }
    ensure_parent(dest).await?;
    tokio::fs::copy(source, dest)
        .await
        .map_err(|e| io_err(dest, e))?;
    info!(from = %source.display(), to = %dest.display(), "copied file");
    Ok(())
}

/// Copy a directory tree, refusing plain files.
async fn copy_tree(source: &Path, dest: &Path) -> Result<(), CoreError> {
    let meta = tokio::fs::metadata(source)
        .await
        .map_err(|e| io_err(source, e))?;
    if !meta.is_dir() {
        return Err(CoreError::Transfer(format!(
            "{} is not a directory",
            source.display()
        )));
    }
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|e| CoreError::Transfer(format!("walk failed: {e}")))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| CoreError::Transfer(format!("walk escaped its root: {e}")))?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            tokio::fs::create_dir_all(&target)
                .await
                .map_err(|e| io_err(&target, e))?;
        } else if entry.file_type().is_file() {
            ensure_parent(&target).await?;
            tokio::fs::copy(entry.path(), &target)
                .await
                .map_err(|e| io_err(&target, e))?;
        }
    }
    info!(from = %source.display(), to = %dest.display(), "copied directory");
    Ok(())
}
