//! Upload local images to a place's storage folder and append them to the
//! place's `imagenes` list.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::blob::{BlobStore, UrlExpiry};
use crate::document::{validate_collection, DocumentId, DocumentWrite, ImageRef, WriteMode, IMAGES_FIELD};
use crate::session::Session;
use crate::time::now_ms;
use crate::{AppError, AppResult};

pub const PLACES_COLLECTION: &str = "estaciones";
pub const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";
const DEFAULT_EXTENSION: &str = ".jpg";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedImage {
    pub place_id: String,
    pub local: String,
    pub path: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFailure {
    pub place_id: String,
    pub local: String,
    pub code: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadReport {
    pub dry_run: bool,
    pub uploaded: Vec<UploadedImage>,
    /// Local files that did not exist and were skipped.
    pub missing: Vec<String>,
    pub errors: Vec<UploadFailure>,
}

#[derive(Debug, Clone)]
pub struct PlaceImageUpload {
    pub collection: String,
    pub place_id: String,
    pub files: Vec<PathBuf>,
    pub url_expiry: UrlExpiry,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct BadgeUpload {
    pub collection: String,
    /// `(placeId, fileName)` pairs, see [`load_badge_mapping`].
    pub mapping: Vec<(String, String)>,
    pub folder: PathBuf,
    pub url_expiry: UrlExpiry,
    pub dry_run: bool,
}

impl BadgeUpload {
    pub fn new(mapping: Vec<(String, String)>, folder: impl Into<PathBuf>) -> Self {
        Self {
            collection: PLACES_COLLECTION.to_string(),
            mapping,
            folder: folder.into(),
            url_expiry: UrlExpiry::one_year(),
            dry_run: false,
        }
    }
}

/// Content type from the file extension, `image/jpeg` when unknown.
pub fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{ext}"))
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `{collection}/{placeId}/img_{millis}_{index}{ext}`.
pub fn place_image_key(collection: &str, place_id: &str, millis: i64, index: usize, local: &Path) -> String {
    let ext = extension_of(local).unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
    format!("{collection}/{place_id}/img_{millis}_{index}{ext}")
}

/// `{collection}/{placeId}/img_{millis}{ext}`.
pub fn badge_key(collection: &str, place_id: &str, millis: i64, local: &Path) -> String {
    let ext = extension_of(local).unwrap_or_default();
    format!("{collection}/{place_id}/img_{millis}{ext}")
}

/// Read a `{ "placeId": "file.png" }` mapping file.
pub fn load_badge_mapping(path: &Path) -> AppResult<Vec<(String, String)>> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        AppError::input("MAPPING_UNREADABLE", "Mapping file cannot be read.")
            .with_context("path", path.display().to_string())
            .with_cause(err)
    })?;
    let invalid = |reason: &str| {
        AppError::input("MAPPING_INVALID", format!("Mapping file is invalid: {reason}."))
            .with_context("path", path.display().to_string())
    };
    let value: Value = serde_json::from_str(&raw)
        .map_err(|err| invalid("not JSON").with_cause(err))?;
    let Value::Object(entries) = value else {
        return Err(invalid("expected an object of placeId to file name"));
    };
    entries
        .into_iter()
        .map(|(place_id, file)| match file {
            Value::String(file) if !file.trim().is_empty() => Ok((place_id, file)),
            _ => Err(invalid("file names must be non-empty strings").with_context("place_id", place_id)),
        })
        .collect()
}

fn place_id(raw: &str) -> AppResult<DocumentId> {
    DocumentId::new(raw).map_err(|err| {
        AppError::config("INVALID_PLACE_ID", format!("Invalid place id '{raw}'.")).with_cause(err)
    })
}

pub async fn upload_place_images(
    session: &Session,
    request: &PlaceImageUpload,
) -> AppResult<UploadReport> {
    validate_collection(&request.collection)?;
    let id = place_id(&request.place_id)?;
    let blobs = session.blobs()?;
    let mut report = UploadReport {
        dry_run: request.dry_run,
        ..UploadReport::default()
    };
    info!(
        target: "recorrido_admin",
        event = "upload_started",
        collection = %request.collection,
        place_id = %id,
        files = request.files.len() as u64,
    );

    for (index, local) in request.files.iter().enumerate() {
        let key = place_image_key(&request.collection, id.as_str(), now_ms(), index, local);
        let attach = Attach {
            collection: &request.collection,
            id: &id,
            local,
            key,
            alt: file_name_of(local),
            expiry: request.url_expiry,
            dry_run: request.dry_run,
        };
        record(&mut report, upload_and_attach(session, blobs, attach).await, &id, local)?;
    }
    Ok(report)
}

pub async fn upload_badges(session: &Session, request: &BadgeUpload) -> AppResult<UploadReport> {
    validate_collection(&request.collection)?;
    if !request.folder.is_dir() {
        return Err(AppError::input("FOLDER_NOT_FOUND", "Images folder does not exist.")
            .with_context("path", request.folder.display().to_string()));
    }
    let blobs = session.blobs()?;
    let mut report = UploadReport {
        dry_run: request.dry_run,
        ..UploadReport::default()
    };

    for (raw_id, file) in &request.mapping {
        let id = place_id(raw_id)?;
        let local = request.folder.join(file);
        let attach = Attach {
            collection: &request.collection,
            id: &id,
            local: &local,
            key: badge_key(&request.collection, id.as_str(), now_ms(), &local),
            alt: String::new(),
            expiry: request.url_expiry,
            dry_run: request.dry_run,
        };
        record(&mut report, upload_and_attach(session, blobs, attach).await, &id, &local)?;
    }
    Ok(report)
}

struct Attach<'a> {
    collection: &'a str,
    id: &'a DocumentId,
    local: &'a Path,
    key: String,
    alt: String,
    expiry: UrlExpiry,
    dry_run: bool,
}

enum Attached {
    Uploaded(ImageRef),
    Missing,
}

fn record(
    report: &mut UploadReport,
    result: AppResult<Attached>,
    id: &DocumentId,
    local: &Path,
) -> AppResult<()> {
    match result {
        Ok(Attached::Uploaded(image)) => report.uploaded.push(UploadedImage {
            place_id: id.to_string(),
            local: local.display().to_string(),
            path: image.path,
            url: image.url.unwrap_or_default(),
        }),
        Ok(Attached::Missing) => report.missing.push(local.display().to_string()),
        Err(err) if err.is_systemic() => return Err(err),
        Err(err) => {
            warn!(
                target: "recorrido_admin",
                event = "upload_failed",
                place_id = %id,
                local = %local.display(),
                error = %err,
            );
            report.errors.push(UploadFailure {
                place_id: id.to_string(),
                local: local.display().to_string(),
                code: err.code().to_string(),
                reason: err.message().to_string(),
            });
        }
    }
    Ok(())
}

async fn upload_and_attach(
    session: &Session,
    blobs: &dyn BlobStore,
    attach: Attach<'_>,
) -> AppResult<Attached> {
    if !attach.local.is_file() {
        warn!(
            target: "recorrido_admin",
            event = "upload_missing_file",
            local = %attach.local.display(),
        );
        return Ok(Attached::Missing);
    }
    let content_type = content_type_for(attach.local);
    let event = if attach.dry_run { "dry_run_upload" } else { "upload" };
    info!(
        target: "recorrido_admin",
        event,
        local = %attach.local.display(),
        key = %attach.key,
        content_type = %content_type,
    );

    if !attach.dry_run {
        blobs.upload(attach.local, &attach.key, &content_type).await?;
    }
    let url = session.signed_url(&attach.key, attach.expiry)?;
    let image = ImageRef::new(url, attach.key, attach.alt);

    if attach.dry_run {
        info!(
            target: "recorrido_admin",
            event = "dry_run_write",
            collection = %attach.collection,
            id = %attach.id,
        );
        return Ok(Attached::Uploaded(image));
    }

    let write = DocumentWrite::new()
        .array_union(IMAGES_FIELD, vec![image.to_value()])
        .server_timestamp("updatedAt");
    session
        .documents()
        .write(attach.collection, attach.id, &write, WriteMode::Merge)
        .await?;
    info!(
        target: "recorrido_admin",
        event = "upload_attached",
        collection = %attach.collection,
        id = %attach.id,
        path = %image.path,
    );
    Ok(Attached::Uploaded(image))
}
