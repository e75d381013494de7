use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    ConnectOptions, Row, SqliteConnection, SqlitePool,
};

use super::{not_found, DocumentStore};
use crate::document::{Document, DocumentId, DocumentWrite, Fields, WriteBatch, WriteMode};
use crate::time::{now_ms, server_timestamp};
use crate::{AppError, AppResult};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    data TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (collection, id)
) WITHOUT ROWID";

/// Collections persisted as one JSON row per document.
pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    /// Open (creating if needed) the database file at `db`.
    pub async fn open(db: &Path) -> AppResult<Self> {
        if let Some(parent) = db.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                unavailable("create_dir", err.into())
                    .with_context("path", parent.display().to_string())
            })?;
        }
        let opts = SqliteConnectOptions::new()
            .filename(db)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_millis(5000))
            .log_statements(log::LevelFilter::Off);
        let pool = SqlitePool::connect_with(opts).await.map_err(|err| {
            unavailable("connect", err.into()).with_context("path", db.display().to_string())
        })?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database, mostly for tests.
    pub async fn in_memory() -> AppResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|err| unavailable("connect", err.into()))?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> AppResult<Self> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|err| unavailable("ensure_schema", err.into()))?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn unavailable(step: &str, cause: AppError) -> AppError {
    AppError::new("STORE/UNAVAILABLE", "Document store is unavailable.")
        .with_context("backend", "sqlite")
        .with_context("step", step.to_string())
        .with_cause(cause)
}

fn store_error(err: sqlx::Error, operation: &str, collection: &str) -> AppError {
    let app = AppError::from(err);
    let app = if app.is_systemic() {
        unavailable(operation, app)
    } else {
        app
    };
    app.with_context("operation", operation.to_string())
        .with_context("collection", collection.to_string())
}

fn decode_fields(raw: &str, collection: &str, id: &str) -> AppResult<Fields> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(AppError::new(
            "STORE/CORRUPT_DOCUMENT",
            "Stored document is not a JSON object.",
        )
        .with_context("collection", collection.to_string())
        .with_context("id", id.to_string())),
        Err(err) => Err(AppError::new(
            "STORE/CORRUPT_DOCUMENT",
            "Stored document is not valid JSON.",
        )
        .with_context("collection", collection.to_string())
        .with_context("id", id.to_string())
        .with_cause(err)),
    }
}

async fn load_fields(
    conn: &mut SqliteConnection,
    collection: &str,
    id: &DocumentId,
) -> AppResult<Option<Fields>> {
    let raw: Option<String> =
        sqlx::query_scalar("SELECT data FROM documents WHERE collection = ?1 AND id = ?2")
            .bind(collection)
            .bind(id.as_str())
            .fetch_optional(&mut *conn)
            .await
            .map_err(|err| store_error(err, "load_document", collection))?;
    raw.map(|raw| decode_fields(&raw, collection, id.as_str()))
        .transpose()
}

async fn apply_write(
    conn: &mut SqliteConnection,
    collection: &str,
    id: &DocumentId,
    write: &DocumentWrite,
    mode: WriteMode,
    now: &str,
) -> AppResult<()> {
    let existing = load_fields(conn, collection, id).await?;
    if existing.is_none() && mode == WriteMode::Update {
        return Err(not_found(collection, id));
    }
    let mut fields = existing.unwrap_or_default();
    write.apply(&mut fields, mode, now);
    let data = serde_json::to_string(&fields)?;
    let stamp = now_ms();
    sqlx::query(
        "INSERT INTO documents (collection, id, data, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(collection, id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
    )
    .bind(collection)
    .bind(id.as_str())
    .bind(data)
    .bind(stamp)
    .execute(&mut *conn)
    .await
    .map_err(|err| store_error(err, "write_document", collection).with_context("id", id.to_string()))?;
    Ok(())
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT COUNT(*) FROM documents")
            .execute(&self.pool)
            .await
            .map_err(|err| unavailable("ping", err.into()))?;
        Ok(())
    }

    async fn list_page(
        &self,
        collection: &str,
        after: Option<&DocumentId>,
        page_size: usize,
    ) -> AppResult<Vec<Document>> {
        let mut rows = sqlx::query(
            "SELECT id, data FROM documents
             WHERE collection = ?1 AND (?2 IS NULL OR id > ?2)
             ORDER BY id
             LIMIT ?3",
        )
        .bind(collection)
        .bind(after.map(DocumentId::as_str))
        .bind(page_size as i64)
        .fetch(&self.pool);

        let mut page = Vec::with_capacity(page_size);
        while let Some(row) = rows
            .try_next()
            .await
            .map_err(|err| store_error(err, "list_page", collection))?
        {
            let id: String = row
                .try_get("id")
                .map_err(|err| store_error(err, "list_page", collection))?;
            let data: String = row
                .try_get("data")
                .map_err(|err| store_error(err, "list_page", collection))?;
            let fields = decode_fields(&data, collection, &id)?;
            page.push(Document::new(DocumentId::new(id)?, fields));
        }
        Ok(page)
    }

    async fn get(&self, collection: &str, id: &DocumentId) -> AppResult<Option<Document>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|err| store_error(err, "get_document", collection))?;
        let fields = load_fields(&mut conn, collection, id).await?;
        Ok(fields.map(|fields| Document::new(id.clone(), fields)))
    }

    async fn write(
        &self,
        collection: &str,
        id: &DocumentId,
        write: &DocumentWrite,
        mode: WriteMode,
    ) -> AppResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| store_error(err, "begin_tx", collection))?;
        apply_write(&mut tx, collection, id, write, mode, &server_timestamp()).await?;
        tx.commit()
            .await
            .map_err(|err| store_error(err, "commit_tx", collection))?;
        Ok(())
    }

    async fn create(&self, collection: &str, write: &DocumentWrite) -> AppResult<DocumentId> {
        let id = DocumentId::generate();
        self.write(collection, &id, write, WriteMode::Merge).await?;
        Ok(id)
    }

    async fn commit(&self, batch: &WriteBatch) -> AppResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| store_error(err, "begin_batch", "*"))?;
        let now = server_timestamp();
        for entry in batch.writes() {
            apply_write(
                &mut tx,
                &entry.collection,
                &entry.id,
                &entry.write,
                entry.mode,
                &now,
            )
            .await?;
        }
        tx.commit()
            .await
            .map_err(|err| store_error(err, "commit_batch", "*"))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::BatchWrite;
    use serde_json::json;

    fn id(raw: &str) -> DocumentId {
        DocumentId::new(raw).unwrap()
    }

    #[tokio::test]
    async fn pages_follow_identifier_order() {
        let store = SqliteDocumentStore::in_memory().await.unwrap();
        for raw in ["C", "A", "B", "D"] {
            store
                .write(
                    "places",
                    &id(raw),
                    &DocumentWrite::new().set("name", json!(raw)),
                    WriteMode::Merge,
                )
                .await
                .unwrap();
        }
        store
            .write(
                "users",
                &id("A"),
                &DocumentWrite::new().set("nombre", json!("x")),
                WriteMode::Merge,
            )
            .await
            .unwrap();

        let first = store.list_page("places", None, 3).await.unwrap();
        let ids: Vec<_> = first.iter().map(|d| d.id.to_string()).collect();
        assert_eq!(ids, ["A", "B", "C"]);

        let rest = store
            .list_page("places", Some(&first[2].id), 3)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id.as_str(), "D");
    }

    #[tokio::test]
    async fn merge_keeps_fields_and_update_requires_document() {
        let store = SqliteDocumentStore::in_memory().await.unwrap();
        store
            .write(
                "estaciones",
                &id("A"),
                &DocumentWrite::new()
                    .set("name", json!("Plaza"))
                    .set("owner", json!("ops")),
                WriteMode::Merge,
            )
            .await
            .unwrap();
        store
            .write(
                "estaciones",
                &id("A"),
                &DocumentWrite::new().set("name", json!("Plaza de Armas")),
                WriteMode::Merge,
            )
            .await
            .unwrap();

        let doc = store.get("estaciones", &id("A")).await.unwrap().unwrap();
        assert_eq!(doc.fields["name"], json!("Plaza de Armas"));
        assert_eq!(doc.fields["owner"], json!("ops"));

        let err = store
            .write(
                "estaciones",
                &id("missing"),
                &DocumentWrite::new().set("name", json!("x")),
                WriteMode::Update,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "STORE/NOT_FOUND");
        assert!(store.get("estaciones", &id("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn batch_is_all_or_nothing() {
        let store = SqliteDocumentStore::in_memory().await.unwrap();
        store
            .write(
                "users",
                &id("u1"),
                &DocumentWrite::new().set("displayName", json!("old")),
                WriteMode::Merge,
            )
            .await
            .unwrap();

        let mut batch = WriteBatch::new();
        batch
            .push(BatchWrite {
                collection: "users".into(),
                id: id("u1"),
                write: DocumentWrite::new().set("displayName", json!("new")),
                mode: WriteMode::Update,
            })
            .unwrap();
        batch
            .push(BatchWrite {
                collection: "users".into(),
                id: id("ghost"),
                write: DocumentWrite::new().set("displayName", json!("x")),
                mode: WriteMode::Update,
            })
            .unwrap();

        let err = store.commit(&batch).await.unwrap_err();
        assert_eq!(err.code(), "STORE/NOT_FOUND");
        let doc = store.get("users", &id("u1")).await.unwrap().unwrap();
        assert_eq!(doc.fields["displayName"], json!("old"));
    }

    #[tokio::test]
    async fn create_assigns_identifier_and_server_timestamp() {
        let store = SqliteDocumentStore::in_memory().await.unwrap();
        let created = store
            .create(
                "estaciones",
                &DocumentWrite::new()
                    .set("name", json!("La Moneda"))
                    .server_timestamp("createdAt"),
            )
            .await
            .unwrap();
        let doc = store.get("estaciones", &created).await.unwrap().unwrap();
        assert_eq!(doc.fields["name"], json!("La Moneda"));
        let stamp = doc.get_str("createdAt").expect("timestamp string");
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
    }

    #[tokio::test]
    async fn file_store_waits_on_locked_database() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteDocumentStore::open(&dir.path().join("documents.sqlite3"))
            .await
            .unwrap();
        let timeout: i64 = sqlx::query_scalar("PRAGMA busy_timeout")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(timeout, 5000);
        store.close().await;
    }

    #[tokio::test]
    async fn merge_write_keeps_nested_keys() {
        let store = SqliteDocumentStore::in_memory().await.unwrap();
        for value in [json!({"geohash": "66jc"}), json!({"lat": 1, "lng": 2})] {
            store
                .write(
                    "estaciones",
                    &id("A"),
                    &DocumentWrite::new().set("ubicacion", value),
                    WriteMode::Merge,
                )
                .await
                .unwrap();
        }
        let doc = store.get("estaciones", &id("A")).await.unwrap().unwrap();
        assert_eq!(
            doc.fields["ubicacion"],
            json!({"geohash": "66jc", "lat": 1, "lng": 2})
        );
    }
}
