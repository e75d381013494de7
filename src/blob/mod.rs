//! Object storage abstraction for image blobs.
//!
//! Keys are path-like (`{collection}/{documentId}/{filename}`); the bucket a
//! store serves is fixed at construction.

pub mod filesystem;
pub mod signing;

use std::path::Path;

use async_trait::async_trait;

use crate::{AppError, AppResult};

pub use filesystem::FilesystemBlobStore;
pub use signing::{UrlExpiry, UrlSigner};

#[async_trait]
pub trait BlobStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Round trip used to fail fast before a job writes anything.
    async fn ping(&self) -> AppResult<()>;

    async fn exists(&self, key: &str) -> AppResult<bool>;

    /// Server-side copy. Overwrites `to` if it already exists.
    async fn copy(&self, from: &str, to: &str) -> AppResult<()>;

    /// Store the bytes of a local file under `key`.
    async fn upload(&self, local: &Path, key: &str, content_type: &str) -> AppResult<()>;

    /// Keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> AppResult<Vec<String>>;

    fn backend_name(&self) -> &'static str;
}

/// Reject keys that could escape the bucket or address nothing.
pub fn validate_key(key: &str) -> AppResult<()> {
    let invalid = |reason: &str| {
        AppError::new("BLOB/INVALID_KEY", format!("Invalid object key: {reason}."))
            .with_context("key", key.to_string())
    };
    if key.is_empty() {
        return Err(invalid("empty"));
    }
    if key.starts_with('/') || key.starts_with('\\') {
        return Err(invalid("absolute path"));
    }
    if key.contains('\\') {
        return Err(invalid("backslash"));
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(invalid("unsafe path segment"));
    }
    Ok(())
}

/// Swap the leading collection segment of `path`, keeping the
/// `{documentId}/{filename}` suffix. `None` when `path` is not under `from`.
pub fn relocate_key(path: &str, from: &str, to: &str) -> Option<String> {
    let prefix = format!("{from}/");
    path.strip_prefix(&prefix)
        .map(|suffix| format!("{to}/{suffix}"))
}
