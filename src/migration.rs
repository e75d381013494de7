//! Collection-to-collection document migration with optional relocation of
//! the referenced storage objects.
//!
//! Documents are processed one at a time in identifier order. Every source
//! document is copied to the destination collection under the same
//! identifier with merge semantics, then annotated with a migration marker.
//! Re-running the job converges on the same destination content: marker
//! fields never travel to the destination, relocated objects are overwritten
//! in place, and URLs minted with a fixed expiry are stable.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::blob::{relocate_key, BlobStore, UrlExpiry};
use crate::document::{
    validate_collection, Document, DocumentId, DocumentWrite, ImageEntry, ImageRef, PlaceRecord,
    WriteMode,
};
use crate::session::Session;
use crate::store::{validate_page_size, DEFAULT_PAGE_SIZE};
use crate::{AppError, AppResult};

/// Marker field naming the collection a source document was copied to.
pub const MIGRATED_TO_FIELD: &str = "_migratedTo";
/// Server timestamp of the last successful migration of a source document.
pub const MIGRATED_AT_FIELD: &str = "migratedAt";

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub source: String,
    pub destination: String,
    /// Physically copy objects under `{source}/` to `{destination}/` and mint
    /// fresh URLs. When false only the `path` strings are rewritten.
    pub copy_storage: bool,
    /// Log every would-be mutation and perform none.
    pub dry_run: bool,
    /// Process at most this many documents, taken from the start of the
    /// collection.
    pub limit: Option<usize>,
    pub page_size: usize,
    pub url_expiry: UrlExpiry,
    /// Skip documents whose marker already names the destination.
    pub skip_migrated: bool,
}

impl MigrationOptions {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            copy_storage: false,
            dry_run: false,
            limit: None,
            page_size: DEFAULT_PAGE_SIZE,
            url_expiry: UrlExpiry::default(),
            skip_migrated: false,
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        validate_collection(&self.source)?;
        validate_collection(&self.destination)?;
        if self.source == self.destination {
            return Err(AppError::config(
                "SAME_COLLECTION",
                "Source and destination collections must differ.",
            )
            .with_context("collection", self.source.clone()));
        }
        if self.limit == Some(0) {
            return Err(AppError::config("INVALID_LIMIT", "--limit must be a positive integer."));
        }
        validate_page_size(self.page_size)?;
        Ok(())
    }
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self::new("places", "estaciones")
    }
}

/// A document the job could not fully migrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationFailure {
    pub id: String,
    pub code: String,
    pub reason: String,
}

impl MigrationFailure {
    fn from_error(id: &str, err: &AppError) -> Self {
        let reason = match err.cause() {
            Some(cause) => format!("{}: {}", err.message(), cause.message()),
            None => err.message().to_string(),
        };
        Self {
            id: id.to_string(),
            code: err.code().to_string(),
            reason,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationReport {
    pub source: String,
    pub destination: String,
    pub dry_run: bool,
    pub scanned: u64,
    pub migrated_count: u64,
    pub skipped: u64,
    /// Objects physically copied to the destination prefix.
    pub relocated_images: u64,
    /// Image paths rewritten without touching storage.
    pub rewritten_paths: u64,
    pub errors: Vec<MigrationFailure>,
    pub elapsed_ms: u64,
}

impl MigrationReport {
    pub fn failed(&self) -> u64 {
        self.errors.len() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentOutcome {
    Migrated,
    Skipped,
    Failed,
}

/// Emitted after each document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationProgress {
    pub id: String,
    pub outcome: DocumentOutcome,
    pub scanned: u64,
    pub migrated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub limit: Option<u64>,
}

pub type ProgressCallback = Arc<dyn Fn(MigrationProgress) + Send + Sync>;

#[derive(Debug, Default)]
struct ImageTally {
    relocated: u64,
    rewritten: u64,
}

enum Processed {
    Migrated(ImageTally),
    Skipped,
}

/// Copy every document of `options.source` into `options.destination`.
///
/// Per-document problems are collected in the report; only systemic errors
/// (credentials, store or bucket unreachable) end the run early.
pub async fn run_migration(
    session: &Session,
    options: &MigrationOptions,
    progress: Option<ProgressCallback>,
) -> AppResult<MigrationReport> {
    options.validate()?;
    let blobs = if options.copy_storage {
        Some(session.blobs()?)
    } else {
        None
    };

    info!(
        target: "recorrido_admin",
        event = "migration_started",
        source = %options.source,
        destination = %options.destination,
        copy_storage = options.copy_storage,
        dry_run = options.dry_run,
        limit = options.limit.map(|l| l as u64),
    );

    let started = Instant::now();
    let mut report = MigrationReport {
        source: options.source.clone(),
        destination: options.destination.clone(),
        dry_run: options.dry_run,
        ..MigrationReport::default()
    };
    let mut cursor: Option<DocumentId> = None;

    loop {
        let wanted = match options.limit {
            Some(limit) => {
                let remaining = limit.saturating_sub(report.scanned as usize);
                if remaining == 0 {
                    break;
                }
                remaining.min(options.page_size)
            }
            None => options.page_size,
        };

        let page = session
            .documents()
            .list_page(&options.source, cursor.as_ref(), wanted)
            .await
            .map_err(|err| {
                err.with_context("operation", "migration_list")
                    .with_context("collection", options.source.clone())
            })?;
        let fetched = page.len();
        if fetched == 0 {
            break;
        }
        cursor = page.last().map(|doc| doc.id.clone());

        for document in page {
            report.scanned += 1;
            let id = document.id.to_string();
            let outcome = match migrate_document(session, blobs, options, document).await {
                Ok(Processed::Migrated(tally)) => {
                    report.migrated_count += 1;
                    report.relocated_images += tally.relocated;
                    report.rewritten_paths += tally.rewritten;
                    info!(
                        target: "recorrido_admin",
                        event = "migration_document",
                        id = %id,
                        relocated = tally.relocated,
                        rewritten = tally.rewritten,
                        migrated = report.migrated_count,
                        scanned = report.scanned,
                        dry_run = options.dry_run,
                    );
                    DocumentOutcome::Migrated
                }
                Ok(Processed::Skipped) => {
                    report.skipped += 1;
                    info!(
                        target: "recorrido_admin",
                        event = "migration_skip",
                        id = %id,
                        reason = "already_migrated",
                    );
                    DocumentOutcome::Skipped
                }
                Err(err) if err.is_systemic() => {
                    error!(
                        target: "recorrido_admin",
                        event = "migration_aborted",
                        id = %id,
                        code = %err.code(),
                        error = %err,
                    );
                    return Err(err.with_context("id", id));
                }
                Err(err) => {
                    warn!(
                        target: "recorrido_admin",
                        event = "migration_document_failed",
                        id = %id,
                        code = %err.code(),
                        error = %err,
                    );
                    report.errors.push(MigrationFailure::from_error(&id, &err));
                    DocumentOutcome::Failed
                }
            };

            if let Some(callback) = progress.as_ref() {
                callback(MigrationProgress {
                    id,
                    outcome,
                    scanned: report.scanned,
                    migrated: report.migrated_count,
                    skipped: report.skipped,
                    failed: report.failed(),
                    limit: options.limit.map(|l| l as u64),
                });
            }
        }

        if fetched < wanted {
            break;
        }
    }

    report.elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        target: "recorrido_admin",
        event = "migration_finished",
        scanned = report.scanned,
        migrated = report.migrated_count,
        skipped = report.skipped,
        failed = report.failed(),
        elapsed_ms = report.elapsed_ms,
    );
    Ok(report)
}

async fn migrate_document(
    session: &Session,
    blobs: Option<&dyn BlobStore>,
    options: &MigrationOptions,
    document: Document,
) -> AppResult<Processed> {
    if options.skip_migrated
        && document.get_str(MIGRATED_TO_FIELD) == Some(options.destination.as_str())
    {
        return Ok(Processed::Skipped);
    }

    let id = document.id.clone();
    let mut record = PlaceRecord::from_document(document)?;
    record.fields.remove(MIGRATED_TO_FIELD);
    record.fields.remove(MIGRATED_AT_FIELD);

    let mut tally = ImageTally::default();
    let mut fallbacks: Vec<(String, AppError)> = Vec::new();

    if let Some(images) = record.images.take() {
        let mut rewritten = Vec::with_capacity(images.len());
        for entry in images {
            let image = match entry {
                ImageEntry::Reference(image) => image,
                opaque => {
                    rewritten.push(opaque);
                    continue;
                }
            };
            let Some(target) = relocate_key(&image.path, &options.source, &options.destination)
            else {
                rewritten.push(ImageEntry::Reference(image));
                continue;
            };

            let next = match blobs {
                Some(blobs) => {
                    let outcome = if options.dry_run {
                        preview_object(&id, blobs, &image.path, &target)
                            .await
                            .map(|()| None)
                    } else {
                        relocate_object(session, blobs, &image.path, &target, options.url_expiry)
                            .await
                            .map(Some)
                    };
                    match outcome {
                        Ok(url) => {
                            tally.relocated += 1;
                            ImageRef {
                                path: target,
                                url: url.or(image.url),
                                ..image
                            }
                        }
                        Err(err) if err.is_systemic() => return Err(err),
                        Err(err) => {
                            warn!(
                                target: "recorrido_admin",
                                event = "storage_copy_failed",
                                id = %id,
                                from = %image.path,
                                to = %target,
                                error = %err,
                            );
                            fallbacks.push((image.path.clone(), err));
                            image
                        }
                    }
                }
                None => {
                    tally.rewritten += 1;
                    ImageRef {
                        path: target,
                        ..image
                    }
                }
            };
            rewritten.push(ImageEntry::Reference(next));
        }
        record.images = Some(rewritten);
    }

    let write = DocumentWrite::from_fields(record.into_fields());
    if options.dry_run {
        info!(
            target: "recorrido_admin",
            event = "dry_run_write",
            collection = %options.destination,
            id = %id,
            fields = write.len(),
        );
    } else {
        session
            .documents()
            .write(&options.destination, &id, &write, WriteMode::Merge)
            .await
            .map_err(|err| {
                AppError::new("MIGRATION/DESTINATION_WRITE", "Destination write failed")
                    .with_context("collection", options.destination.clone())
                    .with_cause(err)
            })?;
    }

    if let Some((path, cause)) = fallbacks.first() {
        return Err(AppError::new(
            "MIGRATION/IMAGE_RELOCATION_FAILED",
            format!("Storage copy failed for {path}; original image reference kept"),
        )
        .with_context("path", path.clone())
        .with_context("failed_images", fallbacks.len().to_string())
        .with_cause(cause.clone()));
    }

    if options.dry_run {
        info!(
            target: "recorrido_admin",
            event = "dry_run_mark",
            collection = %options.source,
            id = %id,
            marker = MIGRATED_TO_FIELD,
        );
    } else {
        let marker = DocumentWrite::new()
            .set(MIGRATED_TO_FIELD, Value::String(options.destination.clone()))
            .server_timestamp(MIGRATED_AT_FIELD);
        session
            .documents()
            .write(&options.source, &id, &marker, WriteMode::Merge)
            .await
            .map_err(|err| {
                AppError::new("MIGRATION/MARKER_WRITE", "Migration marker write failed")
                    .with_context("collection", options.source.clone())
                    .with_cause(err)
            })?;
    }

    Ok(Processed::Migrated(tally))
}

/// Copy `from` to `to` and mint a URL for the copy.
/// Dry-run stand-in for [`relocate_object`]: fails the same way a copy of a
/// missing source would, without touching the bucket.
async fn preview_object(
    id: &DocumentId,
    blobs: &dyn BlobStore,
    from: &str,
    to: &str,
) -> AppResult<()> {
    info!(
        target: "recorrido_admin",
        event = "dry_run_copy",
        id = %id,
        from = %from,
        to = %to,
    );
    if !blobs.exists(from).await? {
        return Err(AppError::new("BLOB/NOT_FOUND", "Source object does not exist.")
            .with_context("key", from.to_string()));
    }
    Ok(())
}

async fn relocate_object(
    session: &Session,
    blobs: &dyn BlobStore,
    from: &str,
    to: &str,
    expiry: UrlExpiry,
) -> AppResult<String> {
    info!(
        target: "recorrido_admin",
        event = "storage_copy",
        from = %from,
        to = %to,
    );
    blobs.copy(from, to).await?;
    session.signed_url(to, expiry)
}
