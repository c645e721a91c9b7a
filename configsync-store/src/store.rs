//! The entry store: path-addressed CRUD over a [`Backend`] collection.
//!
//! Every public operation first runs [`EntryStore::ensure_collection`], which
//! creates the collection from the bundled schema when it is missing, waits
//! for it to turn at least yellow and then kicks off a background copy of the
//! legacy collection. Short-lived callers await that copy with
//! [`EntryStore::wait_for_migration`] before their runtime shuts down.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use configsync_core::{
    now_millis,
    settings::BackendKind,
    types::{PATH_FIELD, TIMESTAMP_FIELD},
    Entry, EntryId, EntryPath, HealthStatus, Settings, SortSpec,
};

use crate::backend::{Backend, DeleteOutcome, IndexOutcome, Query, Refresh};
use crate::dir::DirBackend;
use crate::error::StoreError;
use crate::memory::MemoryBackend;
use crate::scan::ScanCursor;
use crate::schema::CollectionSchema;

const HEALTH_POLL: Duration = Duration::from_millis(100);
const MIGRATION_PAGE: usize = 100;
const MIGRATION_KEEP_ALIVE: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsureOutcome {
    Existed,
    Created,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timed_out: bool,
}

/// Result of [`EntryStore::put`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredEntry {
    pub id: EntryId,
    pub result: IndexOutcome,
    #[serde(rename = "@timestamp", with = "configsync_core::types::timestamp_format")]
    pub timestamp: DateTime<Utc>,
}

/// Paging, projection and order of [`EntryStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    pub from: usize,
    pub size: usize,
    /// Empty means "path only".
    pub fields: Vec<String>,
    pub sort: SortSpec,
}

impl Default for ListRequest {
    fn default() -> Self {
        Self {
            from: 0,
            size: 10,
            fields: Vec::new(),
            sort: SortSpec::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Build the backend selected by `store.backend`.
pub fn open_backend(settings: &Settings) -> Arc<dyn Backend> {
    match settings.store.backend {
        BackendKind::Dir => Arc::new(DirBackend::new(settings.store.path.clone())),
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
    }
}

#[derive(Clone)]
pub struct EntryStore {
    backend: Arc<dyn Backend>,
    index: String,
    legacy_index: String,
    health_timeout: Duration,
    schema: Arc<CollectionSchema>,
    migration: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl EntryStore {
    pub fn new(backend: Arc<dyn Backend>, settings: &Settings) -> Result<Self, StoreError> {
        Ok(Self {
            backend,
            index: settings.store.index.clone(),
            legacy_index: settings.store.legacy_index.clone(),
            health_timeout: settings.health_timeout(),
            schema: Arc::new(CollectionSchema::file_mapping()?),
            migration: Arc::new(Mutex::new(None)),
        })
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Name of the entry collection.
    pub fn index(&self) -> &str {
        &self.index
    }

    // -----------------------------------------------------------------------
    // Collection lifecycle
    // -----------------------------------------------------------------------

    pub async fn ensure_collection(&self) -> Result<EnsureOutcome, StoreError> {
        if self.backend.collection_exists(&self.index).await? {
            tracing::debug!(collection = %self.index, "collection exists");
            return Ok(EnsureOutcome::Existed);
        }
        match self.backend.create_collection(&self.index, &self.schema).await {
            Ok(()) => {}
            // Another node won the race.
            Err(StoreError::CollectionExists(_)) => return Ok(EnsureOutcome::Existed),
            Err(e) => return Err(e),
        }
        tracing::info!(
            collection = %self.index,
            backend = self.backend.kind(),
            "created collection"
        );

        let report = self
            .wait_for_health(HealthStatus::Yellow, self.health_timeout)
            .await?;
        if report.timed_out {
            if self.has_legacy() {
                tracing::warn!(
                    collection = %self.index,
                    legacy = %self.legacy_index,
                    status = %report.status,
                    "collection not healthy in time; legacy copy skipped"
                );
            }
            return Err(StoreError::Timeout {
                operation: "collection health wait",
                after: self.health_timeout,
            });
        }
        self.spawn_migration().await;
        Ok(EnsureOutcome::Created)
    }

    fn has_legacy(&self) -> bool {
        !self.legacy_index.is_empty() && self.legacy_index != self.index
    }

    async fn spawn_migration(&self) {
        if !self.has_legacy() {
            return;
        }
        let backend = Arc::clone(&self.backend);
        let legacy = self.legacy_index.clone();
        let index = self.index.clone();
        let handle = tokio::spawn(async move {
            match migrate_legacy(backend.as_ref(), &legacy, &index).await {
                Ok(0) => {}
                Ok(copied) => tracing::info!(from = %legacy, to = %index, copied, "legacy collection migrated"),
                Err(e) => {
                    tracing::warn!(from = %legacy, to = %index, error = %e, "legacy migration failed")
                }
            }
        });
        *self.migration.lock().await = Some(handle);
    }

    /// Wait for a legacy copy started by this store (or a clone of it).
    /// Returns at once when none is running.
    pub async fn wait_for_migration(&self) {
        let Some(handle) = self.migration.lock().await.take() else {
            return;
        };
        if let Err(e) = handle.await {
            tracing::warn!(collection = %self.index, error = %e, "legacy migration task did not finish");
        }
    }

    // -----------------------------------------------------------------------
    // Health
    // -----------------------------------------------------------------------

    /// Wait until the entry collection reports at least `status`.
    ///
    /// A missing collection counts as red. Returns the last observed status
    /// with `timed_out = true` when the deadline passes first.
    pub async fn wait_for_health(
        &self,
        status: HealthStatus,
        timeout: Duration,
    ) -> Result<HealthReport, StoreError> {
        self.poll_health(status, timeout, true).await
    }

    /// Like [`Self::wait_for_health`] but for the store as a whole.
    pub async fn wait_for_cluster(
        &self,
        status: HealthStatus,
        timeout: Duration,
    ) -> Result<HealthReport, StoreError> {
        self.poll_health(status, timeout, false).await
    }

    async fn poll_health(
        &self,
        target: HealthStatus,
        timeout: Duration,
        collection: bool,
    ) -> Result<HealthReport, StoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            let current = if collection {
                match self.backend.collection_health(&self.index).await {
                    Ok(status) => status,
                    Err(StoreError::CollectionNotFound(_)) => HealthStatus::Red,
                    Err(e) => return Err(e),
                }
            } else {
                self.backend.health().await?
            };
            if current >= target {
                return Ok(HealthReport {
                    status: current,
                    timed_out: false,
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(HealthReport {
                    status: current,
                    timed_out: true,
                });
            }
            tokio::time::sleep(HEALTH_POLL.min(deadline - now)).await;
        }
    }

    // -----------------------------------------------------------------------
    // Entries
    // -----------------------------------------------------------------------

    /// Store `content` under `path`, stamped with the current time and
    /// immediately visible to searches.
    pub async fn put(&self, path: &EntryPath, content: Vec<u8>) -> Result<StoredEntry, StoreError> {
        self.ensure_collection().await?;
        let entry = Entry::new(path.clone(), content, now_millis());
        let id = entry.id();
        let doc = serde_json::to_value(&entry)?;
        let result = self
            .backend
            .index(&self.index, &id, doc, Refresh::Immediate)
            .await?;
        tracing::info!(path = %path, id = %id, ?result, "stored entry");
        Ok(StoredEntry {
            id,
            result,
            timestamp: entry.timestamp,
        })
    }

    /// `Ok(None)` when nothing is stored under `path`.
    pub async fn get(&self, path: &EntryPath) -> Result<Option<Entry>, StoreError> {
        self.ensure_collection().await?;
        let id = path.id();
        let Some(doc) = self.backend.get(&self.index, &id).await? else {
            return Ok(None);
        };
        serde_json::from_value(doc)
            .map(Some)
            .map_err(|source| StoreError::Decode {
                id: id.to_string(),
                source,
            })
    }

    /// Deleting a path that was never stored reports `NotFound`, not an error.
    pub async fn delete(&self, path: &EntryPath) -> Result<DeleteOutcome, StoreError> {
        self.ensure_collection().await?;
        let id = path.id();
        let result = self
            .backend
            .delete(&self.index, &id, Refresh::Immediate)
            .await?;
        tracing::info!(path = %path, id = %id, ?result, "deleted entry");
        Ok(result)
    }

    /// One page of stored entries.
    ///
    /// With no `fields` each item is the bare path string; otherwise each item
    /// is an object carrying exactly the requested fields (`null` when the
    /// document lacks one).
    pub async fn list(&self, request: &ListRequest) -> Result<Vec<serde_json::Value>, StoreError> {
        self.ensure_collection().await?;
        let path_only = request.fields.is_empty();
        let fields = if path_only {
            vec![PATH_FIELD.to_string()]
        } else {
            request.fields.clone()
        };
        let query = Query::all()
            .sorted(request.sort.clone())
            .window(request.from, request.size)
            .fields(fields.clone());
        let page = self.backend.search(&self.index, &query).await?;

        let items = page
            .hits
            .into_iter()
            .map(|hit| {
                if path_only {
                    hit.source
                        .get(PATH_FIELD)
                        .cloned()
                        .unwrap_or(serde_json::Value::Null)
                } else {
                    let mut obj = serde_json::Map::new();
                    for field in &fields {
                        let value = hit
                            .source
                            .get(field)
                            .cloned()
                            .unwrap_or(serde_json::Value::Null);
                        obj.insert(field.clone(), value);
                    }
                    serde_json::Value::Object(obj)
                }
            })
            .collect();
        Ok(items)
    }

    /// Open a paged scan over every entry with `@timestamp >= since`.
    pub async fn scan(
        &self,
        since: DateTime<Utc>,
        page_size: usize,
        keep_alive: Duration,
    ) -> Result<ScanCursor, StoreError> {
        self.ensure_collection().await?;
        let query = Query::all().since(TIMESTAMP_FIELD, since);
        let open = self
            .backend
            .open_cursor(&self.index, &query, page_size, keep_alive);
        let first = tokio::time::timeout(keep_alive, open)
            .await
            .map_err(|_| StoreError::Timeout {
                operation: "scan open",
                after: keep_alive,
            })??;
        Ok(ScanCursor::new(Arc::clone(&self.backend), first, keep_alive))
    }
}

// ---------------------------------------------------------------------------
// Legacy migration
// ---------------------------------------------------------------------------

/// Copy every document of `legacy` into `index`, keeping ids.
///
/// Writes are deferred and followed by a single refresh. Individual copy
/// failures are logged and skipped. Returns the number of copied documents.
pub async fn migrate_legacy(
    backend: &dyn Backend,
    legacy: &str,
    index: &str,
) -> Result<usize, StoreError> {
    if !backend.collection_exists(legacy).await? {
        tracing::debug!(collection = %legacy, "no legacy collection");
        return Ok(0);
    }
    tracing::info!(from = %legacy, to = %index, "copying legacy collection");

    let mut page = backend
        .open_cursor(legacy, &Query::all(), MIGRATION_PAGE, MIGRATION_KEEP_ALIVE)
        .await?;
    let cursor = page.cursor.clone();

    let copied = async {
        let mut copied = 0;
        while !page.hits.is_empty() {
            for hit in std::mem::take(&mut page.hits) {
                match backend
                    .index(index, &hit.id, hit.source, Refresh::Deferred)
                    .await
                {
                    Ok(_) => {
                        tracing::info!(id = %hit.id, "copied legacy document");
                        copied += 1;
                    }
                    Err(e) => tracing::warn!(id = %hit.id, error = %e, "failed to copy legacy document"),
                }
            }
            let Some(cursor) = &cursor else { break };
            page = backend.next_page(cursor, MIGRATION_KEEP_ALIVE).await?;
        }
        backend.refresh(index).await?;
        Ok::<usize, StoreError>(copied)
    }
    .await;

    if let Some(cursor) = cursor {
        if let Err(e) = backend.clear_cursor(&cursor).await {
            tracing::warn!(cursor = %cursor, error = %e, "failed to clear migration cursor");
        }
    }
    copied
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    fn store_on(backend: Arc<MemoryBackend>) -> EntryStore {
        EntryStore::new(backend, &Settings::default()).unwrap()
    }

    async fn seed_legacy(backend: &MemoryBackend, count: usize) {
        let schema = CollectionSchema::file_mapping().unwrap();
        backend.create_collection(".configsync", &schema).await.unwrap();
        for i in 0..count {
            backend
                .index(
                    ".configsync",
                    &EntryId(format!("legacy{i}")),
                    serde_json::json!({"path": format!("f{i}")}),
                    Refresh::Deferred,
                )
                .await
                .unwrap();
        }
        backend.refresh(".configsync").await.unwrap();
    }

    #[tokio::test]
    async fn ensure_creates_once_with_bundled_schema() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_on(Arc::clone(&backend));

        assert_eq!(store.ensure_collection().await.unwrap(), EnsureOutcome::Created);
        assert_eq!(store.ensure_collection().await.unwrap(), EnsureOutcome::Existed);
        let schema = backend.schema("configsync").await.unwrap();
        assert_eq!(schema, CollectionSchema::file_mapping().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn red_collection_times_out_creation() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_health(HealthStatus::Red);
        let store = store_on(Arc::clone(&backend));

        let err = store.ensure_collection().await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout { .. }), "got: {err}");
        assert!(err.is_unavailable());
    }

    #[tokio::test(start_paused = true)]
    async fn health_timeout_skips_the_legacy_copy() {
        let backend = Arc::new(MemoryBackend::new());
        seed_legacy(&backend, 3).await;
        backend.set_health(HealthStatus::Red);
        let store = store_on(Arc::clone(&backend));

        let err = store.ensure_collection().await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout { .. }), "got: {err}");
        store.wait_for_migration().await;

        let page = backend.search("configsync", &Query::all()).await.unwrap();
        assert_eq!(page.total, 0);
        // The collection now exists, so later calls never retry the copy.
        assert_eq!(store.ensure_collection().await.unwrap(), EnsureOutcome::Existed);
        store.wait_for_migration().await;
        let page = backend.search("configsync", &Query::all()).await.unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn first_write_can_wait_for_the_legacy_copy() {
        let backend = Arc::new(MemoryBackend::new());
        seed_legacy(&backend, MIGRATION_PAGE * 2 + 1).await;
        let store = store_on(Arc::clone(&backend));

        store
            .put(&EntryPath::parse("new.yml").unwrap(), b"x".to_vec())
            .await
            .unwrap();
        store.clone().wait_for_migration().await;

        let page = backend.search("configsync", &Query::all()).await.unwrap();
        assert_eq!(page.total, MIGRATION_PAGE * 2 + 2);
        assert_eq!(backend.open_cursors().await, 0);
        // Nothing left to wait for.
        store.wait_for_migration().await;
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_health_reports_timeout_with_last_status() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_on(Arc::clone(&backend));
        store.ensure_collection().await.unwrap();

        backend.set_health(HealthStatus::Yellow);
        let report = store
            .wait_for_health(HealthStatus::Green, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(
            report,
            HealthReport {
                status: HealthStatus::Yellow,
                timed_out: true
            }
        );

        let report = store
            .wait_for_health(HealthStatus::Yellow, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(!report.timed_out);
    }

    #[tokio::test]
    async fn list_projects_requested_fields() {
        let store = store_on(Arc::new(MemoryBackend::new()));
        for p in ["b.yml", "a.yml"] {
            store
                .put(&EntryPath::parse(p).unwrap(), b"x".to_vec())
                .await
                .unwrap();
        }

        let paths = store.list(&ListRequest::default()).await.unwrap();
        assert_eq!(paths, vec![serde_json::json!("a.yml"), serde_json::json!("b.yml")]);

        let request = ListRequest {
            fields: vec!["path".to_string(), "missing".to_string()],
            sort: "path:desc".parse().unwrap(),
            ..ListRequest::default()
        };
        let items = store.list(&request).await.unwrap();
        assert_eq!(items[0], serde_json::json!({"path": "b.yml", "missing": null}));
    }

    #[tokio::test]
    async fn migration_copies_legacy_ids() {
        let backend = Arc::new(MemoryBackend::new());
        let schema = CollectionSchema::file_mapping().unwrap();
        backend.create_collection(".configsync", &schema).await.unwrap();
        backend.create_collection("configsync", &schema).await.unwrap();
        for i in 0..3 {
            backend
                .index(
                    ".configsync",
                    &EntryId(format!("legacy{i}")),
                    serde_json::json!({"path": format!("f{i}")}),
                    Refresh::Immediate,
                )
                .await
                .unwrap();
        }

        let copied = migrate_legacy(backend.as_ref(), ".configsync", "configsync")
            .await
            .unwrap();
        assert_eq!(copied, 3);
        let page = backend.search("configsync", &Query::all()).await.unwrap();
        assert_eq!(page.total, 3, "copies are refreshed at the end");
        assert_eq!(backend.open_cursors().await, 0);
    }

    #[tokio::test]
    async fn migration_without_legacy_is_a_noop() {
        let backend = MemoryBackend::new();
        assert_eq!(migrate_legacy(&backend, ".configsync", "configsync").await.unwrap(), 0);
    }
}
