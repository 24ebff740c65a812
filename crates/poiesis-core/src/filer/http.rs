//! HTTP(S) strategy: streaming downloads only.

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::CoreError;
use crate::filer::{GlobItem, ensure_parent};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Streams a GET response to the staging volume. Uploads, directory
/// downloads, and globs are not supported over HTTP.
#[derive(Debug)]
pub struct HttpStrategy {
    url: String,
}

impl HttpStrategy {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub async fn download_file(&self, container_path: &Path) -> Result<(), CoreError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| CoreError::Transfer(format!("http client: {e}")))?;

        let response = client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CoreError::Transfer(format!("GET {}: {e}", self.url)))?
            .error_for_status()
            .map_err(|e| CoreError::Transfer(format!("GET {}: {e}", self.url)))?;

        ensure_parent(container_path).await?;
        let mut file = tokio::fs::File::create(container_path).await.map_err(|e| {
            CoreError::Transfer(format!("cannot create {}: {e}", container_path.display()))
        })?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| CoreError::Transfer(format!("GET {}: {e}", self.url)))?;
            file.write_all(&chunk).await.map_err(|e| {
                CoreError::Transfer(format!("cannot write {}: {e}", container_path.display()))
            })?;
        }
        file.flush().await.map_err(|e| {
            CoreError::Transfer(format!("cannot flush {}: {e}", container_path.display()))
        })?;

        info!(url = %self.url, path = %container_path.display(), "downloaded file");
        Ok(())
    }

    pub async fn download_dir(&self, _container_path: &Path) -> Result<(), CoreError> {
        Err(CoreError::Transfer(
            "directory downloads are not supported over HTTP".to_owned(),
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
    CoreError::Transfer("uploading to HTTP or HTTPS is not supported".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn uploads_and_dir_downloads_are_rejected() {
        let strategy = HttpStrategy::new("http://example.org/f");
        assert!(strategy.upload_file(Path::new("/tmp/x")).await.is_err());
        assert!(strategy.upload_dir(Path::new("/tmp/x")).await.is_err());
        assert!(strategy.upload_glob(&[]).await.is_err());
        assert!(strategy.download_dir(Path::new("/tmp/x")).await.is_err());
    }
}
