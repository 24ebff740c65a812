//! S3 / S3-compatible object-store strategy.

use std::path::Path;

use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Builder as S3ConfigBuilder, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::S3Config;
use crate::error::CoreError;
use crate::filer::{GlobItem, ensure_parent};

/// Region used for signing when none is configured; custom endpoints
/// generally ignore it.
const FALLBACK_REGION: &str = "us-east-1";

/// A parsed `s3://` URL.
///
/// Both forms are handled: `s3://bucket/key` and
/// `s3://host[:port]/bucket/key` (a netloc containing `.` or `:` is an
/// endpoint host, not a bucket).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedS3Url {
    pub host: Option<String>,
    pub bucket: String,
    pub key: String,
}

pub fn parse_s3_url(url: &str) -> Result<ParsedS3Url, CoreError> {
    let parsed =
        Url::parse(url).map_err(|e| CoreError::Transfer(format!("invalid S3 URL {url:?}: {e}")))?;
    if parsed.scheme() != "s3" {
        return Err(CoreError::Transfer(format!(
            "URL must start with s3://, got: {url}"
        )));
    }

    let netloc = match (parsed.host_str(), parsed.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_owned(),
        (None, _) => String::new(),
    };
    let path = parsed.path().trim_start_matches('/');

    let host_in_netloc = netloc.contains('.') || netloc.contains(':');
    if host_in_netloc {
        let (bucket, key) = match path.split_once('/') {
            Some((bucket, key)) => (bucket.to_owned(), key.to_owned()),
            None => (path.to_owned(), String::new()),
        };
        if bucket.is_empty() {
            return Err(CoreError::Transfer(format!(
                "bucket not found in S3 URL path: {url}"
            )));
        }
        Ok(ParsedS3Url {
            host: Some(netloc),
            bucket,
            key,
        })
    } else {
        if netloc.is_empty() {
            return Err(CoreError::Transfer(format!(
                "bucket name could not be determined from S3 URL: {url}"
            )));
        }
        Ok(ParsedS3Url {
            host: None,
            bucket: netloc,
            key: path.to_owned(),
        })
    }
}

/// Reduce a key that may contain glob metacharacters to its longest
/// literal prefix ending at a `/`.
pub fn sanitize_s3_key(key: &str) -> String {
    match key.find(['*', '?', '[', '{']) {
        None => key.to_owned(),
        Some(glob_start) => match key[..glob_start].rfind('/') {
            Some(last_slash) => key[..=last_slash].to_owned(),
            None => String::new(),
        },
    }
}

/// Object-store strategy bound to one bucket/key.
#[derive(Debug)]
pub struct S3Strategy {
    client: Client,
    bucket: String,
    key: String,
}

impl S3Strategy {
    /// Build the strategy from an `s3://` URL.
    ///
    /// Credentials come from the environment-derived [`S3Config`]; a URL
    /// without an embedded host falls back to the configured endpoint.
    pub fn new(url: &str, config: &S3Config) -> Result<Self, CoreError> {
        let parsed = parse_s3_url(url)?;
        let key = sanitize_s3_key(&parsed.key);
        debug!(raw = %parsed.key, sanitized = %key, "parsed S3 key");

        let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        else {
            return Err(CoreError::Config(
                "object-store credentials are not set, ask your administrator to set them"
                    .to_owned(),
            ));
        };

        let credentials = Credentials::new(access_key, secret_key, None, None, "poiesis");
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| FALLBACK_REGION.to_owned());
        let mut builder = S3ConfigBuilder::new()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(region));

        if let Some(host) = parsed.host.or_else(|| config.endpoint.clone()) {
            let endpoint = if host.starts_with("http://") || host.starts_with("https://") {
                host
            } else {
                warn!(host = %host, "S3 host has no scheme, defaulting to http://");
                format!("http://{host}")
            };
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: parsed.bucket,
            key,
        })
    }

    fn key_prefix(&self) -> String {
        if self.key.is_empty() || self.key.ends_with('/') {
            self.key.clone()
        } else {
            format!("{}/", self.key)
        }
    }

    async fn download_object(&self, key: &str, dest: &Path) -> Result<(), CoreError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_err("download", &self.bucket, key, e))?;

        ensure_parent(dest).await?;
        let mut body = response.body.into_async_read();
        let mut file = tokio::fs::File::create(dest).await.map_err(|e| {
            CoreError::Transfer(format!("cannot create {}: {e}", dest.display()))
        })?;
        tokio::io::copy(&mut body, &mut file).await.map_err(|e| {
            CoreError::Transfer(format!("cannot write {}: {e}", dest.display()))
        })?;
        Ok(())
    }

    async fn upload_object(&self, source: &Path, key: &str) -> Result<(), CoreError> {
        let body = ByteStream::from_path(source).await.map_err(|e| {
            CoreError::Transfer(format!("cannot read {}: {e}", source.display()))
        })?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| sdk_err("upload", &self.bucket, key, e))?;
        debug!(path = %source.display(), bucket = %self.bucket, key, "uploaded object");
        Ok(())
    }

    pub async fn download_file(&self, container_path: &Path) -> Result<(), CoreError> {
        let key = self.key.clone();
        self.download_object(&key, container_path).await?;
        info!(bucket = %self.bucket, key = %self.key, path = %container_path.display(), "downloaded file");
        Ok(())
    }

    /// Download every object under the key prefix, preserving relative
    /// paths.
    pub async fn download_dir(&self, container_path: &Path) -> Result<(), CoreError> {
        let prefix = self.key_prefix();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| sdk_err("list", &self.bucket, &prefix, e))?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                let relative = key.strip_prefix(&prefix).unwrap_or(key);
                if relative.is_empty() {
                    continue;
                }
                self.download_object(key, &container_path.join(relative))
                    .await?;
            }
        }
        info!(bucket = %self.bucket, prefix = %prefix, path = %container_path.display(), "downloaded directory");
        Ok(())
    }

    pub async fn upload_file(&self, container_path: &Path) -> Result<(), CoreError> {
        if !container_path.is_file() {
            return Err(CoreError::Transfer(format!(
                "output file not found: {}",
                container_path.display()
            )));
        }
        let key = self.key.clone();
        self.upload_object(container_path, &key).await
    }

    /// Walk the local tree and upload each file under the key prefix
    /// with POSIX-normalized relative keys.
    pub async fn upload_dir(&self, container_path: &Path) -> Result<(), CoreError> {
        if !container_path.is_dir() {
            return Err(CoreError::Transfer(format!(
                "output directory not found: {}",
                container_path.display()
            )));
        }
        let prefix = self.key_prefix();
        for entry in walkdir::WalkDir::new(container_path) {
            let entry = entry.map_err(|e| CoreError::Transfer(format!("walk failed: {e}")))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(container_path)
                .map_err(|e| CoreError::Transfer(format!("walk escaped its root: {e}")))?;
            let key = format!("{prefix}{}", posix_key(relative));
            self.upload_object(entry.path(), &key).await?;
        }
        info!(bucket = %self.bucket, prefix = %prefix, path = %container_path.display(), "uploaded directory");
        Ok(())
    }

    /// Upload glob matches under the key prefix; directory matches are
    /// uploaded recursively.
    pub async fn upload_glob(&self, items: &[GlobItem]) -> Result<(), CoreError> {
        let prefix = self.key_prefix();
        info!(count = items.len(), bucket = %self.bucket, key = %self.key, "uploading glob matches");
        for item in items {
            let item_key = format!("{prefix}{}", item.relative_path);
            if item.is_directory {
                warn!(path = %item.local_path.display(), "glob matched a directory, uploading recursively");
                for entry in walkdir::WalkDir::new(&item.local_path) {
                    let entry =
                        entry.map_err(|e| CoreError::Transfer(format!("walk failed: {e}")))?;
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let relative = entry
                        .path()
                        .strip_prefix(&item.local_path)
                        .map_err(|e| CoreError::Transfer(format!("walk escaped its root: {e}")))?;
                    let key = format!("{item_key}/{}", posix_key(relative));
                    self.upload_object(entry.path(), &key).await?;
                }
            } else {
                self.upload_object(&item.local_path, &item_key).await?;
            }
        }
        Ok(())
    }
}

fn posix_key(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn sdk_err<E>(op: &str, bucket: &str, key: &str, e: E) -> CoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    CoreError::Transfer(format!(
        "{op} s3://{bucket}/{key}: {}",
        DisplayErrorContext(e)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_with_host_and_port() {
        let parsed = parse_s3_url("s3://host:9000/b/k/f").unwrap();
        assert_eq!(parsed.host.as_deref(), Some("host:9000"));
        assert_eq!(parsed.bucket, "b");
        assert_eq!(parsed.key, "k/f");
    }

    #[test]
    fn url_with_dotted_host() {
        let parsed = parse_s3_url("s3://minio.storage.svc/b/k").unwrap();
        assert_eq!(parsed.host.as_deref(), Some("minio.storage.svc"));
        assert_eq!(parsed.bucket, "b");
        assert_eq!(parsed.key, "k");
    }

    #[test]
    fn url_without_host() {
        let parsed = parse_s3_url("s3://b/k/f").unwrap();
        assert_eq!(parsed.host, None);
        assert_eq!(parsed.bucket, "b");
        assert_eq!(parsed.key, "k/f");
    }

    #[test]
    fn non_s3_scheme_is_rejected() {
        assert!(parse_s3_url("https://b/k").is_err());
    }

    #[test]
    fn host_form_without_bucket_is_rejected() {
        assert!(parse_s3_url("s3://host:9000").is_err());
    }

    #[test]
    fn key_sanitization() {
        assert_eq!(sanitize_s3_key("res/SRR*.fna"), "res/");
        assert_eq!(sanitize_s3_key("res/SRR123.fna"), "res/SRR123.fna");
        assert_eq!(sanitize_s3_key("SRR*.fna"), "");
        assert_eq!(sanitize_s3_key("a/b/c?d"), "a/b/");
    }

    #[test]
    fn missing_credentials_is_a_config_error() {
        let err = S3Strategy::new("s3://b/k", &S3Config::default()).unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn strategy_uses_sanitized_key() {
        let config = S3Config {
            access_key_id: Some("ak".to_owned()),
            secret_access_key: Some("sk".to_owned()),
            ..S3Config::default()
        };
        let strategy = S3Strategy::new("s3://b/res/SRR*.fna", &config).unwrap();
        assert_eq!(strategy.key, "res/");
        assert_eq!(strategy.bucket, "b");
    }
}
