//! Per-invocation handle on the document store, the bucket and the URL signer.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::blob::{signing, BlobStore, FilesystemBlobStore, UrlExpiry, UrlSigner};
use crate::config::SessionConfig;
use crate::store::{DocumentStore, SqliteDocumentStore};
use crate::{AppError, AppResult};

/// Built once per job run and passed down explicitly.
pub struct Session {
    project_id: String,
    documents: Arc<dyn DocumentStore>,
    blobs: Option<Arc<dyn BlobStore>>,
    signer: UrlSigner,
}

impl Session {
    pub fn new(
        project_id: impl Into<String>,
        documents: Arc<dyn DocumentStore>,
        blobs: Option<Arc<dyn BlobStore>>,
        signer: UrlSigner,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            documents,
            blobs,
            signer,
        }
    }

    /// Validate credentials and reach both stores before returning, so a job
    /// never starts writing with a half-working session.
    pub async fn open(config: &SessionConfig) -> AppResult<Self> {
        config.account.validate()?;
        let project_id = config.project_id().to_string();

        let db_path = config.layout.documents_path(&project_id);
        let documents = SqliteDocumentStore::open(&db_path).await?;
        documents.ping().await?;

        let blobs: Option<Arc<dyn BlobStore>> = match config.bucket.as_deref() {
            Some(bucket) => {
                let store =
                    FilesystemBlobStore::open(config.layout.storage_root(&project_id), bucket)
                        .await?;
                store.ping().await?;
                Some(Arc::new(store))
            }
            None => None,
        };

        info!(
            target: "recorrido_admin",
            event = "session_opened",
            project_id = %project_id,
            client_email = %config.account.client_email,
            documents = %db_path.display(),
            bucket = config.bucket.as_deref().unwrap_or("-"),
        );

        Ok(Self::new(
            project_id,
            Arc::new(documents),
            blobs,
            UrlSigner::new(config.account.client_email.clone(), &config.account.private_key),
        ))
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn documents(&self) -> &dyn DocumentStore {
        self.documents.as_ref()
    }

    /// The configured bucket; jobs that touch storage fail here when the
    /// invocation did not name one.
    pub fn blobs(&self) -> AppResult<&dyn BlobStore> {
        self.blobs.as_deref().ok_or_else(|| {
            AppError::config("MISSING_BUCKET", "This job needs a storage bucket (--bucket).")
        })
    }

    pub fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    pub fn signed_url(&self, key: &str, expiry: UrlExpiry) -> AppResult<String> {
        let bucket = self.blobs()?.bucket();
        Ok(self
            .signer
            .signed_url(bucket, key, expiry.resolve(Utc::now())))
    }

    pub fn public_url(&self, key: &str) -> AppResult<String> {
        Ok(signing::public_url(self.blobs()?.bucket(), key))
    }
}
