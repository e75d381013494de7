//! Local filesystem bucket.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::instrument;

use super::{validate_key, BlobStore};
use crate::{AppError, AppResult};

/// Sidecar directory holding per-object metadata, mirroring the key layout.
const METADATA_DIR: &str = ".metadata";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMetadata {
    content_type: String,
}

/// Bucket stored as a directory tree under `root`.
pub struct FilesystemBlobStore {
    bucket: String,
    root: PathBuf,
}

impl FilesystemBlobStore {
    /// Open the bucket directory `storage_root/bucket`, creating it if needed.
    pub async fn open(storage_root: impl AsRef<Path>, bucket: &str) -> AppResult<Self> {
        if bucket.trim().is_empty() || bucket.contains('/') || bucket.contains('\\') {
            return Err(AppError::config(
                "INVALID_BUCKET",
                format!("Invalid bucket name '{bucket}'."),
            ));
        }
        let root = storage_root.as_ref().join(bucket);
        fs::create_dir_all(&root).await.map_err(|err| {
            AppError::new("BLOB/UNAVAILABLE", "Bucket directory cannot be created.")
                .with_context("path", root.display().to_string())
                .with_cause(err)
        })?;
        Ok(Self {
            bucket: bucket.to_string(),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> AppResult<PathBuf> {
        validate_key(key)?;
        if key == METADATA_DIR || key.starts_with(&format!("{METADATA_DIR}/")) {
            return Err(
                AppError::new("BLOB/INVALID_KEY", "Invalid object key: reserved prefix.")
                    .with_context("key", key.to_string()),
            );
        }
        Ok(self.root.join(key))
    }

    fn metadata_path(&self, key: &str) -> PathBuf {
        self.root.join(METADATA_DIR).join(format!("{key}.json"))
    }

    async fn write_metadata(&self, key: &str, metadata: &ObjectMetadata) -> AppResult<()> {
        let path = self.metadata_path(key);
        ensure_parent(&path).await?;
        let body = serde_json::to_vec(metadata)?;
        fs::write(&path, body)
            .await
            .map_err(|err| io_error("write_metadata", key, err))
    }

    /// Content type recorded at upload, if any.
    pub async fn content_type(&self, key: &str) -> AppResult<Option<String>> {
        self.key_path(key)?;
        let path = self.metadata_path(key);
        match fs::read(&path).await {
            Ok(raw) => {
                let metadata: ObjectMetadata = serde_json::from_slice(&raw)?;
                Ok(Some(metadata.content_type))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error("read_metadata", key, err)),
        }
    }
}

fn io_error(operation: &str, key: &str, err: std::io::Error) -> AppError {
    AppError::new("BLOB/IO", format!("Storage {operation} failed."))
        .with_context("operation", operation.to_string())
        .with_context("key", key.to_string())
        .with_cause(err)
}

async fn ensure_parent(path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|err| {
            AppError::from(err)
                .with_context("operation", "create_dirs")
                .with_context("path", parent.display().to_string())
        })?;
    }
    Ok(())
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn ping(&self) -> AppResult<()> {
        match fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(AppError::new("BLOB/UNAVAILABLE", "Bucket root is not a directory.")
                .with_context("bucket", self.bucket.clone())),
            Err(err) => Err(AppError::new("BLOB/UNAVAILABLE", "Bucket is not reachable.")
                .with_context("bucket", self.bucket.clone())
                .with_cause(err)),
        }
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        let path = self.key_path(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_error("exists", key, err)),
        }
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn copy(&self, from: &str, to: &str) -> AppResult<()> {
        let source = self.key_path(from)?;
        let target = self.key_path(to)?;
        if !self.exists(from).await? {
            return Err(AppError::new("BLOB/NOT_FOUND", "Source object does not exist.")
                .with_context("key", from.to_string()));
        }
        ensure_parent(&target).await?;
        fs::copy(&source, &target)
            .await
            .map_err(|err| io_error("copy", from, err).with_context("to", to.to_string()))?;
        if let Some(content_type) = self.content_type(from).await? {
            self.write_metadata(to, &ObjectMetadata { content_type }).await?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn upload(&self, local: &Path, key: &str, content_type: &str) -> AppResult<()> {
        let target = self.key_path(key)?;
        ensure_parent(&target).await?;
        fs::copy(local, &target).await.map_err(|err| {
            io_error("upload", key, err).with_context("local", local.display().to_string())
        })?;
        self.write_metadata(
            key,
            &ObjectMetadata {
                content_type: content_type.to_string(),
            },
        )
        .await
    }

    async fn list(&self, prefix: &str) -> AppResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|err| io_error("list", prefix, err))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|err| io_error("list", prefix, err))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|err| io_error("list", prefix, err))?;
                if file_type.is_dir() {
                    if dir == self.root && entry.file_name() == METADATA_DIR {
                        continue;
                    }
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}
