//! Document store abstraction and the SQLite-backed implementation.

pub mod sqlite;

use async_trait::async_trait;

use crate::document::{Document, DocumentId, DocumentWrite, WriteBatch, WriteMode};
use crate::{AppError, AppResult};

pub use sqlite::SqliteDocumentStore;

/// Page size constraints for collection reads.
pub const DEFAULT_PAGE_SIZE: usize = 300;
pub const MIN_PAGE_SIZE: usize = 1;
pub const MAX_PAGE_SIZE: usize = 1000;

/// Hosted-database style collections of keyed JSON documents.
///
/// Enumeration order is ascending identifier order for every backend, so a
/// cursor is simply the last identifier seen.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Cheap round trip used to fail fast before a job writes anything.
    async fn ping(&self) -> AppResult<()>;

    /// Up to `page_size` documents with identifiers strictly after `after`.
    async fn list_page(
        &self,
        collection: &str,
        after: Option<&DocumentId>,
        page_size: usize,
    ) -> AppResult<Vec<Document>>;

    async fn get(&self, collection: &str, id: &DocumentId) -> AppResult<Option<Document>>;

    async fn write(
        &self,
        collection: &str,
        id: &DocumentId,
        write: &DocumentWrite,
        mode: WriteMode,
    ) -> AppResult<()>;

    /// Create a document under a store-assigned identifier.
    async fn create(&self, collection: &str, write: &DocumentWrite) -> AppResult<DocumentId>;

    /// Apply every write in the batch or none of them.
    async fn commit(&self, batch: &WriteBatch) -> AppResult<()>;

    fn backend_name(&self) -> &'static str;
}

pub fn not_found(collection: &str, id: &DocumentId) -> AppError {
    AppError::new("STORE/NOT_FOUND", "Document does not exist.")
        .with_context("collection", collection.to_string())
        .with_context("id", id.to_string())
}

pub fn validate_page_size(page_size: usize) -> AppResult<usize> {
    if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(AppError::config(
            "INVALID_PAGE_SIZE",
            format!("Page size must be between {MIN_PAGE_SIZE} and {MAX_PAGE_SIZE} documents."),
        )
        .with_context("page_size", page_size.to_string()));
    }
    Ok(page_size)
}
