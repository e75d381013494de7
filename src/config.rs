//! Credential loading and local data layout.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{AppError, AppResult};

/// Overrides the directory that holds project databases and buckets.
pub const DATA_DIR_ENV: &str = "RECORRIDO_DATA_DIR";
/// Ambient credential path honoured when no `--serviceAccount` is given.
pub const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";
/// Bucket fallback for jobs that need storage.
pub const BUCKET_ENV: &str = "FIREBASE_STORAGE_BUCKET";

const APP_DIR: &str = "recorrido-admin";
const DOCUMENTS_FILE: &str = "documents.sqlite3";
const STORAGE_DIR: &str = "storage";

/// Service-account key file as issued by the console.
#[derive(Clone, Deserialize)]
pub struct ServiceAccount {
    #[serde(rename = "type", default)]
    pub account_type: String,
    pub project_id: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
}

impl fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("account_type", &self.account_type)
            .field("project_id", &self.project_id)
            .field("private_key_id", &self.private_key_id)
            .field("private_key", &"<redacted>")
            .field("client_email", &self.client_email)
            .finish()
    }
}

impl ServiceAccount {
    /// Read and parse the key file. A missing or unparsable file is a
    /// configuration error; key material is checked by [`Self::validate`].
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            return Err(AppError::config(
                "SERVICE_ACCOUNT_NOT_FOUND",
                format!("serviceAccount file not found: {}", path.display()),
            )
            .with_context("path", path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path).map_err(|err| {
            AppError::config("SERVICE_ACCOUNT_UNREADABLE", "serviceAccount file cannot be read.")
                .with_context("path", path.display().to_string())
                .with_cause(err)
        })?;
        serde_json::from_str(&raw).map_err(|err| {
            AppError::config("SERVICE_ACCOUNT_INVALID", "serviceAccount file is not a valid key file.")
                .with_context("path", path.display().to_string())
                .with_cause(err)
        })
    }

    /// Credentials that parse but cannot authenticate.
    pub fn validate(&self) -> AppResult<()> {
        let reject = |reason: &str| {
            AppError::new("AUTH/INVALID_CREDENTIALS", format!("Service account rejected: {reason}."))
                .with_context("client_email", self.client_email.clone())
        };
        if !self.account_type.is_empty() && self.account_type != "service_account" {
            return Err(reject("unsupported credential type"));
        }
        if self.project_id.trim().is_empty() {
            return Err(reject("missing project_id"));
        }
        if self.private_key.trim().is_empty() {
            return Err(reject("missing private_key"));
        }
        if !self.client_email.contains('@') {
            return Err(reject("client_email is not an account address"));
        }
        Ok(())
    }
}

/// Where a project's document database and buckets live on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$RECORRIDO_DATA_DIR`, else the platform data directory.
    pub fn from_env() -> AppResult<Self> {
        if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::new(dir));
        }
        let base = match dirs::data_dir() {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        Ok(Self::new(base.join(APP_DIR)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn documents_path(&self, project_id: &str) -> PathBuf {
        self.root.join(project_id).join(DOCUMENTS_FILE)
    }

    pub fn storage_root(&self, project_id: &str) -> PathBuf {
        self.root.join(project_id).join(STORAGE_DIR)
    }
}

/// Everything needed to open a [`crate::session::Session`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub account: ServiceAccount,
    /// Overrides `account.project_id` when set.
    pub project_id: Option<String>,
    pub bucket: Option<String>,
    pub layout: DataLayout,
}

impl SessionConfig {
    pub fn project_id(&self) -> &str {
        self.project_id
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(&self.account.project_id)
    }
}
