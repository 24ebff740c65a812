//! Inline-content strategy: the bytes arrive in the task document.

use std::path::Path;

use tracing::info;

use crate::error::CoreError;
use crate::filer::{GlobItem, ensure_parent};

/// Writes `TesInput.content` to the staging volume. Uploads are not
/// supported per TES.
#[derive(Debug)]
pub struct ContentStrategy {
    content: String,
}

impl ContentStrategy {
    pub fn new(content: String) -> Self {
        Self { content }
    }

    pub async fn download_file(&self, container_path: &Path) -> Result<(), CoreError> {
        ensure_parent(container_path).await?;
        tokio::fs::write(container_path, self.content.as_bytes())
            .await
            .map_err(|e| {
                CoreError::Transfer(format!("cannot write {}: {e}", container_path.display()))
            })?;
        info!(path = %container_path.display(), "wrote inline content");
        Ok(())
    }

    pub async fn download_dir(&self, _container_path: &Path) -> Result<(), CoreError> {
        Err(CoreError::Transfer(
            "inline content cannot stage a directory".to_owned(),
        ))
    }

    pub async fn upload_file(&self, _container_path: &Path) -> Result<(), CoreError> {
        Err(unsupported_upload())
    }

    pub async fn upload_dir(&self, _container_path: &Path) -> Result<(), CoreError> {
        Err(unsupported_upload())
    }

    pub async fn upload_glob(&self, _items: &[GlobItem]) -> Result<(), CoreError> {
        Err(unsupported_upload())
    }
}

fn unsupported_upload() -> CoreError {
    CoreError::Transfer("content filer does not support uploads".to_owned())
}
