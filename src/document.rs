//! Document shapes shared by every job: identifiers, field maps, image
//! references and the write operations stores understand.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{AppError, AppResult};

/// Top-level fields of a schema-flexible document.
pub type Fields = Map<String, Value>;

/// Field holding the list of image references on place-like records.
pub const IMAGES_FIELD: &str = "imagenes";

/// Upper bound on writes committed in one atomic batch.
pub const MAX_BATCH_WRITES: usize = 500;

/// Store-assigned document identifier. Never empty, never contains `/`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(raw: impl Into<String>) -> AppResult<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(AppError::new(
                "RECORD/INVALID_ID",
                "Document identifier must not be empty.",
            ));
        }
        if raw.contains('/') {
            return Err(
                AppError::new("RECORD/INVALID_ID", "Document identifier must not contain '/'.")
                    .with_context("id", raw),
            );
        }
        Ok(Self(raw))
    }

    /// Fresh identifier for documents created without an explicit id.
    pub fn generate() -> Self {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        Self(raw[..20].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DocumentId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DocumentId::new(value)
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.0
    }
}

/// Collection names double as the leading segment of blob keys, so they
/// follow the same rules as identifiers.
pub fn validate_collection(name: &str) -> AppResult<()> {
    if name.trim().is_empty() || name.contains('/') {
        return Err(AppError::config(
            "INVALID_COLLECTION",
            format!("Invalid collection name '{name}'."),
        )
        .with_context("collection", name.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: DocumentId, fields: Fields) -> Self {
        Self { id, fields }
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}

/// `{ url, path, alt }` entry of an `imagenes` list. Unknown keys ride along in
/// `extra` so a rewrite never drops data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    #[serde(flatten)]
    pub extra: Fields,
}

impl ImageRef {
    pub fn new(url: impl Into<String>, path: impl Into<String>, alt: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            path: path.into(),
            alt: Some(alt.into()),
            extra: Fields::new(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// One element of an image list. Anything that is not an object with a string
/// `path` is kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageEntry {
    Reference(ImageRef),
    Opaque(Value),
}

impl ImageEntry {
    pub fn from_value(value: Value) -> Self {
        if value.is_object() {
            if let Ok(image) = serde_json::from_value::<ImageRef>(value.clone()) {
                return ImageEntry::Reference(image);
            }
        }
        ImageEntry::Opaque(value)
    }

    pub fn into_value(self) -> Value {
        match self {
            ImageEntry::Reference(image) => image.to_value(),
            ImageEntry::Opaque(value) => value,
        }
    }
}

/// A document that passed the minimal shape check: it has an identifier and
/// its `imagenes` field, when present and not null, is a sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceRecord {
    pub id: DocumentId,
    pub images: Option<Vec<ImageEntry>>,
    /// Every other field, untouched.
    pub fields: Fields,
}

impl PlaceRecord {
    pub fn from_document(document: Document) -> AppResult<Self> {
        let Document { id, mut fields } = document;
        let images = match fields.remove(IMAGES_FIELD) {
            None => None,
            Some(Value::Null) => {
                fields.insert(IMAGES_FIELD.to_string(), Value::Null);
                None
            }
            Some(Value::Array(items)) => {
                Some(items.into_iter().map(ImageEntry::from_value).collect())
            }
            Some(other) => {
                return Err(AppError::new(
                    "RECORD/MALFORMED",
                    format!("Field '{IMAGES_FIELD}' is not a sequence."),
                )
                .with_context("id", id.to_string())
                .with_context("found", json_kind(&other)));
            }
        };
        Ok(Self { id, images, fields })
    }

    pub fn into_fields(self) -> Fields {
        let mut fields = self.fields;
        if let Some(images) = self.images {
            fields.insert(
                IMAGES_FIELD.to_string(),
                Value::Array(images.into_iter().map(ImageEntry::into_value).collect()),
            );
        }
        fields
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Per-field transform carried by a write.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldWrite {
    Set(Value),
    /// Replaced by the store's clock at write time.
    ServerTimestamp,
    /// Appends each value not already present in the target array.
    ArrayUnion(Vec<Value>),
}

/// How a write treats an existing (or missing) document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Create the document if missing; otherwise only the listed fields change.
    Merge,
    /// Fail with `STORE/NOT_FOUND` if the document does not exist.
    Update,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentWrite {
    fields: BTreeMap<String, FieldWrite>,
}

impl DocumentWrite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields(fields: Fields) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|(key, value)| (key, FieldWrite::Set(value)))
                .collect(),
        }
    }

    pub fn set(mut self, field: impl Into<String>, value: Value) -> Self {
        self.fields.insert(field.into(), FieldWrite::Set(value));
        self
    }

    pub fn server_timestamp(mut self, field: impl Into<String>) -> Self {
        self.fields.insert(field.into(), FieldWrite::ServerTimestamp);
        self
    }

    pub fn array_union(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.fields.insert(field.into(), FieldWrite::ArrayUnion(values));
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldWrite> {
        self.fields.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Apply the transforms to `target`. Fields not named by this write are
    /// left alone. Under [`WriteMode::Merge`] a map value is merged into a
    /// stored map key by key; under [`WriteMode::Update`] it replaces it.
    pub fn apply(&self, target: &mut Fields, mode: WriteMode, now: &str) {
        for (field, op) in &self.fields {
            match op {
                FieldWrite::Set(value) => match (mode, target.get_mut(field)) {
                    (WriteMode::Merge, Some(existing)) => merge_value(existing, value),
                    _ => {
                        target.insert(field.clone(), value.clone());
                    }
                },
                FieldWrite::ServerTimestamp => {
                    target.insert(field.clone(), Value::String(now.to_string()));
                }
                FieldWrite::ArrayUnion(values) => {
                    let mut items = match target.remove(field) {
                        Some(Value::Array(items)) => items,
                        _ => Vec::new(),
                    };
                    for value in values {
                        if !items.contains(value) {
                            items.push(value.clone());
                        }
                    }
                    target.insert(field.clone(), Value::Array(items));
                }
            }
        }
    }
}

/// Maps merge recursively; anything else is replaced by `incoming`.
fn merge_value(existing: &mut Value, incoming: &Value) {
    match (existing, incoming) {
        (Value::Object(stored), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match stored.get_mut(key) {
                    Some(slot) => merge_value(slot, value),
                    None => {
                        stored.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchWrite {
    pub collection: String,
    pub id: DocumentId,
    pub write: DocumentWrite,
    pub mode: WriteMode,
}

/// Writes committed atomically. Holds at most [`MAX_BATCH_WRITES`] entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<BatchWrite>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, write: BatchWrite) -> AppResult<()> {
        if self.writes.len() >= MAX_BATCH_WRITES {
            return Err(AppError::new(
                "STORE/BATCH_TOO_LARGE",
                format!("A write batch holds at most {MAX_BATCH_WRITES} writes."),
            ));
        }
        self.writes.push(write);
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.writes.len() >= MAX_BATCH_WRITES
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[BatchWrite] {
        &self.writes
    }
}
