//! In-process backend.
//!
//! Each collection keeps two maps: `live` (every acknowledged write, used by
//! point reads) and `searchable` (the state as of the last refresh, used by
//! searches and cursors). That models the refresh visibility of a search
//! engine closely enough for the store layer and the tests built on it.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use configsync_core::{EntryId, HealthStatus};

use crate::backend::{
    Backend, CursorId, DeleteOutcome, Document, Hit, IndexOutcome, Page, Query, Refresh,
};
use crate::error::StoreError;
use crate::query::{self, CursorTable};
use crate::schema::CollectionSchema;

struct MemoryCollection {
    schema: CollectionSchema,
    live: BTreeMap<EntryId, Document>,
    searchable: BTreeMap<EntryId, Document>,
}

impl MemoryCollection {
    fn searchable_hits(&self) -> impl Iterator<Item = Hit> + '_ {
        self.searchable.iter().map(|(id, source)| Hit {
            id: id.clone(),
            source: source.clone(),
        })
    }
}

pub struct MemoryBackend {
    collections: RwLock<HashMap<String, MemoryCollection>>,
    cursors: Mutex<CursorTable<Hit>>,
    available: AtomicBool,
    health: AtomicU8,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            cursors: Mutex::new(CursorTable::new("mem")),
            available: AtomicBool::new(true),
            health: AtomicU8::new(encode_health(HealthStatus::Green)),
        }
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Health reported by both [`Backend::health`] and
    /// [`Backend::collection_health`].
    pub fn set_health(&self, status: HealthStatus) {
        self.health.store(encode_health(status), Ordering::SeqCst);
    }

    /// Schema a collection was created with.
    pub async fn schema(&self, collection: &str) -> Option<CollectionSchema> {
        let collections = self.collections.read().await;
        collections.get(collection).map(|coll| coll.schema.clone())
    }

    /// Number of cursors that have not been cleared or expired.
    pub async fn open_cursors(&self) -> usize {
        self.cursors.lock().await.len()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(
                "memory backend marked unavailable".to_string(),
            ))
        }
    }

    fn current_health(&self) -> HealthStatus {
        decode_health(self.health.load(Ordering::SeqCst))
    }
}

fn encode_health(status: HealthStatus) -> u8 {
    match status {
        HealthStatus::Red => 0,
        HealthStatus::Yellow => 1,
        HealthStatus::Green => 2,
    }
}

fn decode_health(raw: u8) -> HealthStatus {
    match raw {
        0 => HealthStatus::Red,
        1 => HealthStatus::Yellow,
        _ => HealthStatus::Green,
    }
}

fn missing(collection: &str) -> StoreError {
    StoreError::CollectionNotFound(collection.to_string())
}

#[async_trait]
impl Backend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn health(&self) -> Result<HealthStatus, StoreError> {
        self.check_available()?;
        Ok(self.current_health())
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self.collections.read().await.contains_key(collection))
    }

    async fn create_collection(
        &self,
        collection: &str,
        schema: &CollectionSchema,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        if collections.contains_key(collection) {
            return Err(StoreError::CollectionExists(collection.to_string()));
        }
        collections.insert(
            collection.to_string(),
            MemoryCollection {
                schema: schema.clone(),
                live: BTreeMap::new(),
                searchable: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn collection_health(&self, collection: &str) -> Result<HealthStatus, StoreError> {
        self.check_available()?;
        if !self.collections.read().await.contains_key(collection) {
            return Err(missing(collection));
        }
        Ok(self.current_health())
    }

    async fn index(
        &self,
        collection: &str,
        id: &EntryId,
        doc: Document,
        refresh: Refresh,
    ) -> Result<IndexOutcome, StoreError> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;
        if refresh == Refresh::Immediate {
            coll.searchable.insert(id.clone(), doc.clone());
        }
        match coll.live.insert(id.clone(), doc) {
            Some(_) => Ok(IndexOutcome::Updated),
            None => Ok(IndexOutcome::Created),
        }
    }

    async fn get(&self, collection: &str, id: &EntryId) -> Result<Option<Document>, StoreError> {
        self.check_available()?;
        let collections = self.collections.read().await;
        let coll = collections.get(collection).ok_or_else(|| missing(collection))?;
        Ok(coll.live.get(id).cloned())
    }

    async fn delete(
        &self,
        collection: &str,
        id: &EntryId,
        refresh: Refresh,
    ) -> Result<DeleteOutcome, StoreError> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;
        if refresh == Refresh::Immediate {
            coll.searchable.remove(id);
        }
        match coll.live.remove(id) {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => Ok(DeleteOutcome::NotFound),
        }
    }

    async fn refresh(&self, collection: &str) -> Result<(), StoreError> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;
        coll.searchable = coll.live.clone();
        Ok(())
    }

    async fn search(&self, collection: &str, query: &Query) -> Result<Page, StoreError> {
        self.check_available()?;
        let collections = self.collections.read().await;
        let coll = collections.get(collection).ok_or_else(|| missing(collection))?;
        Ok(query::execute(coll.searchable_hits(), query))
    }

    async fn open_cursor(
        &self,
        collection: &str,
        query: &Query,
        page_size: usize,
        keep_alive: Duration,
    ) -> Result<Page, StoreError> {
        self.check_available()?;
        let snapshot = {
            let collections = self.collections.read().await;
            let coll = collections.get(collection).ok_or_else(|| missing(collection))?;
            query::select(coll.searchable_hits(), query)
        };
        Ok(self.cursors.lock().await.open(snapshot, page_size, keep_alive).into())
    }

    async fn next_page(
        &self,
        cursor: &CursorId,
        keep_alive: Duration,
    ) -> Result<Page, StoreError> {
        self.check_available()?;
        self.cursors.lock().await.next(cursor, keep_alive).map(Page::from)
    }

    async fn clear_cursor(&self, cursor: &CursorId) -> Result<(), StoreError> {
        self.cursors.lock().await.clear(cursor);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
