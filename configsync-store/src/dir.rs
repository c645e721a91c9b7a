//! Shared-directory backend.
//!
//! ```text
//! <root>/
//!   <collection>/
//!     _schema.json     (collection marker + schema)
//!     <id>.json        (one document per entry)
//! ```
//!
//! Every node pointing at the same root sees the same collection. Writes use
//! a temp file + rename so readers never observe a half-written document, and
//! there is no refresh lag: every write is searchable immediately.
//!
//! Cursors snapshot matching ids only; each page reads its documents from
//! disk when it is handed out.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::value::RawValue;
use tokio::fs;
use tokio::sync::Mutex;

use configsync_core::{EntryId, HealthStatus};

use crate::backend::{
    Backend, CursorId, DeleteOutcome, Document, Hit, IndexOutcome, Page, Query, Refresh,
};
use crate::error::{io_err, StoreError};
use crate::query::{self, Batch, CursorTable};
use crate::schema::CollectionSchema;

const SCHEMA_FILE: &str = "_schema.json";

pub struct DirBackend {
    root: PathBuf,
    cursors: Mutex<CursorTable<DocRef>>,
    tmp_seq: AtomicU64,
}

impl DirBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cursors: Mutex::new(CursorTable::new("dir")),
            tmp_seq: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, collection: &str) -> PathBuf {
        self.root.join(collection)
    }

    fn doc_path(&self, collection: &str, id: &EntryId) -> Result<PathBuf, StoreError> {
        validate_id(id)?;
        Ok(self.collection_dir(collection).join(format!("{id}.json")))
    }

    async fn require_collection(&self, collection: &str) -> Result<PathBuf, StoreError> {
        let dir = self.collection_dir(collection);
        if exists(&dir.join(SCHEMA_FILE)).await? {
            Ok(dir)
        } else {
            Err(StoreError::CollectionNotFound(collection.to_string()))
        }
    }

    /// Write `bytes` to `path` through a uniquely named sibling temp file.
    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = path.with_file_name(format!(".{file_name}.{}.{seq}.tmp", std::process::id()));

        fs::write(&tmp, bytes).await.map_err(|e| io_err(&tmp, e))?;
        set_file_permissions(&tmp).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(io_err(path, e));
        }
        Ok(())
    }

    /// `(id, file)` for every document in the collection, in id order.
    async fn doc_files(&self, collection: &str) -> Result<Vec<(EntryId, PathBuf)>, StoreError> {
        let dir = self.require_collection(collection).await?;
        let mut entries = fs::read_dir(&dir).await.map_err(|e| io_err(&dir, e))?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_err(&dir, e))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.starts_with('_') || stem.starts_with('.') {
                continue;
            }
            files.push((EntryId::from(stem), path));
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }

    async fn load_all(&self, collection: &str) -> Result<Vec<Hit>, StoreError> {
        let mut hits = Vec::new();
        for (id, path) in self.doc_files(collection).await? {
            if let Some(source) = read_doc(&path, None).await? {
                hits.push(Hit { id, source });
            }
        }
        Ok(hits)
    }

    /// Read the documents behind a cursor batch. Documents deleted since the
    /// cursor was opened are dropped; a batch that loses all of them moves on
    /// to the next one, so an empty page still means the scan is over.
    async fn resolve(
        &self,
        mut batch: Batch<DocRef>,
        keep_alive: Duration,
    ) -> Result<Page, StoreError> {
        loop {
            let exhausted = batch.items.is_empty();
            let mut hits = Vec::with_capacity(batch.items.len());
            for doc in batch.items {
                let path = self.doc_path(&doc.collection, &doc.id)?;
                if let Some(source) = read_doc(&path, None).await? {
                    hits.push(Hit { id: doc.id, source });
                }
            }
            if !hits.is_empty() || exhausted {
                return Ok(Page {
                    hits,
                    total: batch.total,
                    cursor: Some(batch.cursor),
                });
            }
            batch = self.cursors.lock().await.next(&batch.cursor, keep_alive)?;
        }
    }
}

/// What a dir cursor remembers per match; documents are read page by page.
struct DocRef {
    collection: Arc<str>,
    id: EntryId,
}

/// Fields a query filters or sorts on.
fn key_fields(query: &Query) -> Vec<&str> {
    let mut fields = Vec::new();
    if let Some(range) = &query.range {
        fields.push(range.field.as_str());
    }
    if let Some(sort) = &query.sort {
        if !fields.contains(&sort.field.as_str()) {
            fields.push(sort.field.as_str());
        }
    }
    fields
}

/// Parse the document at `path`, keeping only `fields` when given. Other
/// fields (the payload in particular) are skipped without being decoded.
///
/// `Ok(None)` when the file vanished or does not parse.
async fn read_doc(path: &Path, fields: Option<&[&str]>) -> Result<Option<Document>, StoreError> {
    let raw = match fs::read(path).await {
        Ok(raw) => raw,
        // Deleted between listing and reading.
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path, e)),
    };
    let parsed = match fields {
        None => serde_json::from_slice::<Document>(&raw),
        Some(fields) => serde_json::from_slice::<HashMap<String, &RawValue>>(&raw).and_then(|map| {
            let mut doc = serde_json::Map::new();
            for field in fields {
                if let Some(value) = map.get(*field) {
                    doc.insert(field.to_string(), serde_json::from_str(value.get())?);
                }
            }
            Ok(Document::Object(doc))
        }),
    };
    match parsed {
        Ok(doc) => Ok(Some(doc)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skipping unreadable document");
            Ok(None)
        }
    }
}

/// Ids become file names, so only URL-safe base64 characters are accepted.
fn validate_id(id: &EntryId) -> Result<(), StoreError> {
    let raw = id.as_str();
    let ok = !raw.is_empty()
        && !raw.starts_with('_')
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidId(raw.to_string()))
    }
}

async fn exists(path: &Path) -> Result<bool, StoreError> {
    fs::try_exists(path).await.map_err(|e| io_err(path, e))
}

#[cfg(unix)]
async fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .await
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
async fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[async_trait]
impl Backend for DirBackend {
    fn kind(&self) -> &'static str {
        "dir"
    }

    async fn health(&self) -> Result<HealthStatus, StoreError> {
        if exists(&self.root).await? {
            Ok(HealthStatus::Green)
        } else {
            Ok(HealthStatus::Red)
        }
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool, StoreError> {
        exists(&self.collection_dir(collection).join(SCHEMA_FILE)).await
    }

    async fn create_collection(
        &self,
        collection: &str,
        schema: &CollectionSchema,
    ) -> Result<(), StoreError> {
        let dir = self.collection_dir(collection);
        let marker = dir.join(SCHEMA_FILE);
        if exists(&marker).await? {
            return Err(StoreError::CollectionExists(collection.to_string()));
        }
        fs::create_dir_all(&dir).await.map_err(|e| io_err(&dir, e))?;
        let json = serde_json::to_vec_pretty(schema)?;
        self.write_atomic(&marker, &json).await
    }

    async fn collection_health(&self, collection: &str) -> Result<HealthStatus, StoreError> {
        self.require_collection(collection).await?;
        Ok(HealthStatus::Green)
    }

    async fn index(
        &self,
        collection: &str,
        id: &EntryId,
        doc: Document,
        _refresh: Refresh,
    ) -> Result<IndexOutcome, StoreError> {
        self.require_collection(collection).await?;
        let path = self.doc_path(collection, id)?;
        let existed = exists(&path).await?;
        let json = serde_json::to_vec(&doc)?;
        self.write_atomic(&path, &json).await?;
        Ok(if existed {
            IndexOutcome::Updated
        } else {
            IndexOutcome::Created
        })
    }

    async fn get(&self, collection: &str, id: &EntryId) -> Result<Option<Document>, StoreError> {
        self.require_collection(collection).await?;
        let path = self.doc_path(collection, id)?;
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&path, e)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| StoreError::Decode {
                id: id.to_string(),
                source,
            })
    }

    async fn delete(
        &self,
        collection: &str,
        id: &EntryId,
        _refresh: Refresh,
    ) -> Result<DeleteOutcome, StoreError> {
        self.require_collection(collection).await?;
        let path = self.doc_path(collection, id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(DeleteOutcome::NotFound),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    async fn refresh(&self, collection: &str) -> Result<(), StoreError> {
        self.require_collection(collection).await.map(|_| ())
    }

    async fn search(&self, collection: &str, query: &Query) -> Result<Page, StoreError> {
        let hits = self.load_all(collection).await?;
        Ok(query::execute(hits, query))
    }

    async fn open_cursor(
        &self,
        collection: &str,
        query: &Query,
        page_size: usize,
        keep_alive: Duration,
    ) -> Result<Page, StoreError> {
        let fields = key_fields(query);
        let mut keyed = Vec::new();
        for (id, path) in self.doc_files(collection).await? {
            if let Some(source) = read_doc(&path, Some(fields.as_slice())).await? {
                keyed.push(Hit { id, source });
            }
        }
        let collection: Arc<str> = Arc::from(collection);
        let refs = query::select(keyed, query)
            .into_iter()
            .map(|hit| DocRef {
                collection: Arc::clone(&collection),
                id: hit.id,
            })
            .collect();
        let batch = self.cursors.lock().await.open(refs, page_size, keep_alive);
        self.resolve(batch, keep_alive).await
    }

    async fn next_page(
        &self,
        cursor: &CursorId,
        keep_alive: Duration,
    ) -> Result<Page, StoreError> {
        let batch = self.cursors.lock().await.next(cursor, keep_alive)?;
        self.resolve(batch, keep_alive).await
    }

    async fn clear_cursor(&self, cursor: &CursorId) -> Result<(), StoreError> {
        self.cursors.lock().await.clear(cursor);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn backend_with(collection: &str) -> (TempDir, DirBackend) {
        let tmp = TempDir::new().unwrap();
        let backend = DirBackend::new(tmp.path().join("store"));
        let schema = CollectionSchema::file_mapping().unwrap();
        backend.create_collection(collection, &schema).await.unwrap();
        (tmp, backend)
    }

    #[tokio::test]
    async fn health_follows_root_presence() {
        let tmp = TempDir::new().unwrap();
        let backend = DirBackend::new(tmp.path().join("absent"));
        assert_eq!(backend.health().await.unwrap(), HealthStatus::Red);
        assert!(!backend.collection_exists("c").await.unwrap());

        let schema = CollectionSchema::file_mapping().unwrap();
        backend.create_collection("c", &schema).await.unwrap();
        assert_eq!(backend.health().await.unwrap(), HealthStatus::Green);
        assert_eq!(backend.collection_health("c").await.unwrap(), HealthStatus::Green);
    }

    #[tokio::test]
    async fn documents_roundtrip_through_files() {
        let (_tmp, backend) = backend_with("c").await;
        let id = EntryId::from("YS50eHQ");
        let outcome = backend
            .index("c", &id, json!({"path": "a.txt"}), Refresh::Immediate)
            .await
            .unwrap();
        assert_eq!(outcome, IndexOutcome::Created);
        assert!(backend.root().join("c").join("YS50eHQ.json").exists());
        assert_eq!(
            backend.get("c", &id).await.unwrap(),
            Some(json!({"path": "a.txt"}))
        );

        let page = backend.search("c", &Query::all()).await.unwrap();
        assert_eq!(page.total, 1, "schema marker must not be listed");

        assert_eq!(
            backend.delete("c", &id, Refresh::Immediate).await.unwrap(),
            DeleteOutcome::Deleted
        );
        assert_eq!(
            backend.delete("c", &id, Refresh::Immediate).await.unwrap(),
            DeleteOutcome::NotFound
        );
        assert_eq!(backend.get("c", &id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn ids_that_are_not_file_safe_are_rejected() {
        let (_tmp, backend) = backend_with("c").await;
        for bad in ["../x", "a/b", "_schema", ""] {
            let err = backend
                .index("c", &EntryId::from(bad), json!({}), Refresh::Immediate)
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::InvalidId(_)), "{bad:?}: {err}");
        }
    }

    #[tokio::test]
    async fn corrupt_documents_are_skipped_by_search() {
        let (_tmp, backend) = backend_with("c").await;
        std::fs::write(backend.root().join("c").join("broken.json"), "{nope").unwrap();
        backend
            .index("c", &EntryId::from("ok"), json!({"path": "ok"}), Refresh::Immediate)
            .await
            .unwrap();

        let page = backend.search("c", &Query::all()).await.unwrap();
        assert_eq!(page.total, 1);
        let err = backend.get("c", &EntryId::from("broken")).await.unwrap_err();
        assert!(matches!(err, StoreError::Decode { .. }));
    }

    #[tokio::test]
    async fn cursor_pages_are_read_from_disk_when_fetched() {
        let (_tmp, backend) = backend_with("c").await;
        for (id, path) in [("a", "1.txt"), ("b", "2.txt"), ("c", "3.txt")] {
            let doc = json!({"path": path, "content": "x".repeat(64)});
            backend
                .index("c", &EntryId::from(id), doc, Refresh::Immediate)
                .await
                .unwrap();
        }

        let query = Query::all().sorted("path:desc".parse().unwrap());
        let keep_alive = Duration::from_secs(60);
        let first = backend.open_cursor("c", &query, 1, keep_alive).await.unwrap();
        assert_eq!(first.total, 3);
        assert_eq!(first.hits[0].id.as_str(), "c");
        assert_eq!(first.hits[0].source["content"], json!("x".repeat(64)));

        // Changes after the snapshot show up in later pages.
        backend
            .delete("c", &EntryId::from("b"), Refresh::Immediate)
            .await
            .unwrap();
        backend
            .index(
                "c",
                &EntryId::from("a"),
                json!({"path": "1.txt", "content": "new"}),
                Refresh::Immediate,
            )
            .await
            .unwrap();

        let cursor = first.cursor.unwrap();
        let second = backend.next_page(&cursor, keep_alive).await.unwrap();
        assert_eq!(second.hits.len(), 1, "deleted documents are skipped");
        assert_eq!(second.hits[0].id.as_str(), "a");
        assert_eq!(second.hits[0].source["content"], json!("new"));

        let third = backend.next_page(&cursor, keep_alive).await.unwrap();
        assert!(third.hits.is_empty());
        assert_eq!(third.total, 3);
        backend.clear_cursor(&cursor).await.unwrap();
    }

    #[test]
    fn key_fields_cover_range_and_sort() {
        let query = Query::all()
            .since("@timestamp", chrono::Utc::now())
            .sorted("@timestamp:asc".parse().unwrap());
        assert_eq!(key_fields(&query), vec!["@timestamp"]);
        assert!(key_fields(&Query::all()).is_empty());
    }

    #[tokio::test]
    async fn missing_collection_is_reported() {
        let (_tmp, backend) = backend_with("c").await;
        let err = backend.search("other", &Query::all()).await.unwrap_err();
        assert!(matches!(err, StoreError::CollectionNotFound(_)));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn documents_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (_tmp, backend) = backend_with("c").await;
        backend
            .index("c", &EntryId::from("x"), json!({}), Refresh::Immediate)
            .await
            .unwrap();
        let meta = std::fs::metadata(backend.root().join("c").join("x.json")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }
}
