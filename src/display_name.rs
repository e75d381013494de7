//! Keep `users.displayName` in step with `users.nombre`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::document::{BatchWrite, Document, DocumentId, DocumentWrite, WriteBatch, WriteMode};
use crate::session::Session;
use crate::store::DEFAULT_PAGE_SIZE;
use crate::AppResult;

pub const USERS_COLLECTION: &str = "users";
pub const FALLBACK_DISPLAY_NAME: &str = "Usuario";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayNameChange {
    pub id: String,
    pub previous: Option<String>,
    pub display_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisplayNameReport {
    pub dry_run: bool,
    pub total: u64,
    pub updated: u64,
    pub skipped: u64,
    pub batches: u64,
    pub changes: Vec<DisplayNameChange>,
}

fn non_empty<'a>(fields: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a str> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// The display name a user should carry, or `None` when it is already right.
///
/// `nombre` wins; a user without one keeps a non-empty `displayName`; anyone
/// left gets [`FALLBACK_DISPLAY_NAME`].
pub fn resolve_display_name(document: &Document) -> Option<String> {
    let current = non_empty(&document.fields, "displayName");
    let nombre = non_empty(&document.fields, "nombre");
    if current.is_some() && current == nombre {
        return None;
    }
    let resolved = nombre.or(current).unwrap_or(FALLBACK_DISPLAY_NAME);
    if Some(resolved) == current {
        return None;
    }
    Some(resolved.to_string())
}

pub async fn sync_display_names(session: &Session, dry_run: bool) -> AppResult<DisplayNameReport> {
    let mut report = DisplayNameReport {
        dry_run,
        ..DisplayNameReport::default()
    };
    let mut batch = WriteBatch::new();
    let mut cursor: Option<DocumentId> = None;

    loop {
        let page = session
            .documents()
            .list_page(USERS_COLLECTION, cursor.as_ref(), DEFAULT_PAGE_SIZE)
            .await?;
        let fetched = page.len();
        if fetched == 0 {
            break;
        }
        cursor = page.last().map(|doc| doc.id.clone());

        for document in page {
            report.total += 1;
            let Some(display_name) = resolve_display_name(&document) else {
                report.skipped += 1;
                continue;
            };
            let event = if dry_run { "dry_run_write" } else { "display_name_planned" };
            info!(
                target: "recorrido_admin",
                event,
                id = %document.id,
                display_name = %display_name,
            );
            report.changes.push(DisplayNameChange {
                id: document.id.to_string(),
                previous: document.get_str("displayName").map(str::to_string),
                display_name: display_name.clone(),
            });
            report.updated += 1;
            if dry_run {
                continue;
            }
            if batch.is_full() {
                commit(session, &mut batch, &mut report).await?;
            }
            batch.push(BatchWrite {
                collection: USERS_COLLECTION.to_string(),
                id: document.id,
                write: DocumentWrite::new()
                    .set("displayName", Value::String(display_name))
                    .server_timestamp("updatedAt"),
                mode: WriteMode::Update,
            })?;
        }

        if fetched < DEFAULT_PAGE_SIZE {
            break;
        }
    }

    if report.total == 0 {
        info!(target: "recorrido_admin", event = "display_name_no_users");
    }
    if !batch.is_empty() {
        commit(session, &mut batch, &mut report).await?;
    }
    info!(
        target: "recorrido_admin",
        event = "display_name_finished",
        total = report.total,
        updated = report.updated,
        skipped = report.skipped,
        batches = report.batches,
        dry_run,
    );
    Ok(report)
}

async fn commit(
    session: &Session,
    batch: &mut WriteBatch,
    report: &mut DisplayNameReport,
) -> AppResult<()> {
    let pending = std::mem::take(batch);
    session.documents().commit(&pending).await.map_err(|err| {
        err.with_context("operation", "display_name_commit")
            .with_context("batch_size", pending.len().to_string())
    })?;
    report.batches += 1;
    info!(
        target: "recorrido_admin",
        event = "display_name_batch_committed",
        writes = pending.len() as u64,
    );
    Ok(())
}
