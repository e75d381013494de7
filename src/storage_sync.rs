//! Point user profile fields at the images stored under `users/{uid}/`.

use std::collections::BTreeSet;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::blob::BlobStore;
use crate::display_name::USERS_COLLECTION;
use crate::document::{DocumentId, DocumentWrite, WriteMode};
use crate::session::Session;
use crate::{AppError, AppResult};

pub const USERS_PREFIX: &str = "users/";
const PROFILE_IMAGE: &str = "profile.jpg";
const BACKGROUND_IMAGE: &str = "background.jpg";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSyncFailure {
    pub uid: String,
    pub code: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSyncReport {
    pub users: u64,
    pub updated: u64,
    pub without_images: u64,
    pub errors: Vec<UserSyncFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UserOutcome {
    Updated,
    NoImages,
}

/// User identifiers owning at least one object under `users/{uid}/`, sorted.
pub fn discover_user_ids<'a>(keys: impl IntoIterator<Item = &'a str>) -> AppResult<Vec<String>> {
    let pattern = Regex::new(r"^users/([^/]+)/")
        .map_err(|err| AppError::new("APP/REGEX", err.to_string()))?;
    let ids: BTreeSet<String> = keys
        .into_iter()
        .filter_map(|key| pattern.captures(key))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect();
    Ok(ids.into_iter().collect())
}

/// Sync one user (`uid`) or every user with a storage folder.
pub async fn sync_storage_urls(
    session: &Session,
    uid: Option<&str>,
) -> AppResult<StorageSyncReport> {
    let blobs = session.blobs()?;
    let users = match uid {
        Some(uid) => vec![uid.to_string()],
        None => {
            let keys = blobs.list(USERS_PREFIX).await?;
            let ids = discover_user_ids(keys.iter().map(String::as_str))?;
            info!(
                target: "recorrido_admin",
                event = "storage_sync_discovered",
                users = ids.len() as u64,
            );
            ids
        }
    };

    let mut report = StorageSyncReport::default();
    for uid in users {
        report.users += 1;
        match sync_user(session, blobs, &uid).await {
            Ok(UserOutcome::Updated) => report.updated += 1,
            Ok(UserOutcome::NoImages) => {
                report.without_images += 1;
                warn!(
                    target: "recorrido_admin",
                    event = "storage_sync_no_images",
                    uid = %uid,
                );
            }
            Err(err) if err.is_systemic() => return Err(err),
            Err(err) => {
                warn!(
                    target: "recorrido_admin",
                    event = "storage_sync_user_failed",
                    uid = %uid,
                    error = %err,
                );
                report.errors.push(UserSyncFailure {
                    uid,
                    code: err.code().to_string(),
                    reason: err.message().to_string(),
                });
            }
        }
    }

    info!(
        target: "recorrido_admin",
        event = "storage_sync_finished",
        users = report.users,
        updated = report.updated,
        without_images = report.without_images,
        failed = report.errors.len() as u64,
    );
    Ok(report)
}

async fn sync_user(session: &Session, blobs: &dyn BlobStore, uid: &str) -> AppResult<UserOutcome> {
    let id = DocumentId::new(uid)?;
    let mut write = DocumentWrite::new();
    for (file, field) in [(PROFILE_IMAGE, "photoURL"), (BACKGROUND_IMAGE, "backgroundURL")] {
        let key = format!("{USERS_PREFIX}{uid}/{file}");
        if blobs.exists(&key).await? {
            let url = session.public_url(&key)?;
            info!(
                target: "recorrido_admin",
                event = "storage_sync_url",
                uid = %uid,
                field,
                url = %url,
            );
            write = write.set(field, Value::String(url));
        }
    }
    if write.is_empty() {
        return Ok(UserOutcome::NoImages);
    }
    session
        .documents()
        .write(USERS_COLLECTION, &id, &write, WriteMode::Update)
        .await?;
    Ok(UserOutcome::Updated)
}
