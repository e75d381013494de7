//! Create the fixture stations used by development builds of the app.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::document::{validate_collection, DocumentWrite, Fields};
use crate::session::Session;
use crate::uploads::PLACES_COLLECTION;
use crate::{AppError, AppResult};

const BUILTIN_FIXTURES: &str = include_str!("../fixtures/estaciones.json");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeededDocument {
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedReport {
    pub collection: String,
    pub dry_run: bool,
    pub created: Vec<SeededDocument>,
}

fn parse_fixtures(raw: &str, source: &str) -> AppResult<Vec<Fields>> {
    let invalid = |reason: &str| {
        AppError::input("FIXTURES_INVALID", format!("Fixture file is invalid: {reason}."))
            .with_context("source", source.to_string())
    };
    let value: Value = serde_json::from_str(raw).map_err(|err| invalid("not JSON").with_cause(err))?;
    let Value::Array(items) = value else {
        return Err(invalid("expected an array of documents"));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(fields) => Ok(fields),
            _ => Err(invalid("every entry must be an object")),
        })
        .collect()
}

/// The stations shipped with the crate.
pub fn builtin_fixtures() -> AppResult<Vec<Fields>> {
    parse_fixtures(BUILTIN_FIXTURES, "builtin")
}

pub fn load_fixtures(path: &Path) -> AppResult<Vec<Fields>> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        AppError::input("FIXTURES_UNREADABLE", "Fixture file cannot be read.")
            .with_context("path", path.display().to_string())
            .with_cause(err)
    })?;
    parse_fixtures(&raw, &path.display().to_string())
}

/// Create one document per fixture under a store-assigned identifier, with
/// `createdAt` and `updatedAt` set by the store.
pub async fn seed_estaciones(
    session: &Session,
    collection: Option<&str>,
    fixtures: Vec<Fields>,
    dry_run: bool,
) -> AppResult<SeedReport> {
    let collection = collection.unwrap_or(PLACES_COLLECTION);
    validate_collection(collection)?;
    let mut report = SeedReport {
        collection: collection.to_string(),
        dry_run,
        ..SeedReport::default()
    };

    for fields in fixtures {
        let name = fields
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let write = DocumentWrite::from_fields(fields)
            .server_timestamp("createdAt")
            .server_timestamp("updatedAt");
        if dry_run {
            info!(
                target: "recorrido_admin",
                event = "dry_run_create",
                collection,
                name = %name,
            );
            report.created.push(SeededDocument { id: None, name });
            continue;
        }
        let id = session.documents().create(collection, &write).await?;
        info!(
            target: "recorrido_admin",
            event = "seed_created",
            collection,
            id = %id,
            name = %name,
        );
        report.created.push(SeededDocument {
            id: Some(id.to_string()),
            name,
        });
    }
    Ok(report)
}
