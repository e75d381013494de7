//! Add a missing field, with a default value, to every document of a
//! collection.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::document::{validate_collection, DocumentId, DocumentWrite, WriteMode};
use crate::session::Session;
use crate::store::{validate_page_size, DEFAULT_PAGE_SIZE};
use crate::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct BackfillOptions {
    pub collection: String,
    pub field: String,
    pub value: Value,
    pub dry_run: bool,
    pub limit: Option<usize>,
    pub page_size: usize,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            collection: "estaciones".into(),
            field: "insigniaID".into(),
            value: Value::Null,
            dry_run: false,
            limit: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl BackfillOptions {
    pub fn validate(&self) -> AppResult<()> {
        validate_collection(&self.collection)?;
        if self.field.trim().is_empty() {
            return Err(AppError::config("INVALID_FIELD", "--field must not be empty."));
        }
        if self.limit == Some(0) {
            return Err(AppError::config("INVALID_LIMIT", "--limit must be a positive integer."));
        }
        validate_page_size(self.page_size)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillFailure {
    pub id: String,
    pub code: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackfillReport {
    pub collection: String,
    pub field: String,
    pub dry_run: bool,
    pub scanned: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: Vec<BackfillFailure>,
}

/// Merge `{field: value}` into every document lacking `field`. A field that is
/// present with any value, null included, is left alone.
pub async fn run_backfill(session: &Session, options: &BackfillOptions) -> AppResult<BackfillReport> {
    options.validate()?;
    let mut report = BackfillReport {
        collection: options.collection.clone(),
        field: options.field.clone(),
        dry_run: options.dry_run,
        ..BackfillReport::default()
    };
    let write = DocumentWrite::new().set(options.field.clone(), options.value.clone());
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
            .list_page(&options.collection, cursor.as_ref(), wanted)
            .await?;
        let fetched = page.len();
        if fetched == 0 {
            break;
        }
        cursor = page.last().map(|doc| doc.id.clone());

        for document in page {
            report.scanned += 1;
            if document.fields.contains_key(&options.field) {
                report.skipped += 1;
                continue;
            }
            if options.dry_run {
                info!(
                    target: "recorrido_admin",
                    event = "dry_run_write",
                    collection = %options.collection,
                    id = %document.id,
                    field = %options.field,
                );
                report.updated += 1;
                continue;
            }
            match session
                .documents()
                .write(&options.collection, &document.id, &write, WriteMode::Merge)
                .await
            {
                Ok(()) => {
                    report.updated += 1;
                    info!(
                        target: "recorrido_admin",
                        event = "backfill_document",
                        id = %document.id,
                        field = %options.field,
                    );
                }
                Err(err) if err.is_systemic() => return Err(err),
                Err(err) => {
                    warn!(
                        target: "recorrido_admin",
                        event = "backfill_document_failed",
                        id = %document.id,
                        error = %err,
                    );
                    report.errors.push(BackfillFailure {
                        id: document.id.to_string(),
                        code: err.code().to_string(),
                        reason: err.message().to_string(),
                    });
                }
            }
        }

        if fetched < wanted {
            break;
        }
    }

    info!(
        target: "recorrido_admin",
        event = "backfill_finished",
        collection = %options.collection,
        scanned = report.scanned,
        updated = report.updated,
        skipped = report.skipped,
        failed = report.errors.len() as u64,
    );
    Ok(report)
}
