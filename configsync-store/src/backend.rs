//! The storage backend contract.
//!
//! A [`Backend`] is an opaque document store organised into named
//! collections. Documents are JSON objects addressed by [`EntryId`]. Point
//! reads are realtime; searches and cursors only see documents made visible by
//! a refresh. Every call against a missing collection fails with
//! [`StoreError::CollectionNotFound`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use configsync_core::{EntryId, HealthStatus, SortSpec};

use crate::error::StoreError;
use crate::schema::CollectionSchema;

/// A stored document body.
pub type Document = serde_json::Value;

// ---------------------------------------------------------------------------
// Request / response shapes
// ---------------------------------------------------------------------------

/// Visibility policy for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// The write is visible to searches when the call returns.
    Immediate,
    /// The write becomes searchable on the next [`Backend::refresh`].
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOutcome {
    Created,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// `field >= gte`, compared as timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeFilter {
    pub field: String,
    pub gte: DateTime<Utc>,
}

/// Filter, order, window and projection of a search.
///
/// `fields = None` returns whole documents. `size = None` means unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub range: Option<RangeFilter>,
    pub sort: Option<SortSpec>,
    pub from: usize,
    pub size: Option<usize>,
    pub fields: Option<Vec<String>>,
}

impl Query {
    /// Match every document.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn since(mut self, field: &str, gte: DateTime<Utc>) -> Self {
        self.range = Some(RangeFilter {
            field: field.to_string(),
            gte,
        });
        self
    }

    pub fn sorted(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn window(mut self, from: usize, size: usize) -> Self {
        self.from = from;
        self.size = Some(size);
        self
    }

    pub fn fields(mut self, fields: Vec<String>) -> Self {
        self.fields = Some(fields);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub id: EntryId,
    pub source: Document,
}

/// Handle for an open scan cursor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CursorId(pub String);

impl std::fmt::Display for CursorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One batch of hits. `total` counts every match, not just this batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub hits: Vec<Hit>,
    pub total: usize,
    pub cursor: Option<CursorId>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Backend: Send + Sync {
    /// Short identifier used in logs (`"memory"`, `"dir"`).
    fn kind(&self) -> &'static str;

    /// Overall health of the store.
    async fn health(&self) -> Result<HealthStatus, StoreError>;

    async fn collection_exists(&self, collection: &str) -> Result<bool, StoreError>;

    /// Fails with [`StoreError::CollectionExists`] when it is already there.
    async fn create_collection(
        &self,
        collection: &str,
        schema: &CollectionSchema,
    ) -> Result<(), StoreError>;

    async fn collection_health(&self, collection: &str) -> Result<HealthStatus, StoreError>;

    /// Create or fully replace the document stored under `id`.
    async fn index(
        &self,
        collection: &str,
        id: &EntryId,
        doc: Document,
        refresh: Refresh,
    ) -> Result<IndexOutcome, StoreError>;

    /// Realtime point read.
    async fn get(&self, collection: &str, id: &EntryId) -> Result<Option<Document>, StoreError>;

    async fn delete(
        &self,
        collection: &str,
        id: &EntryId,
        refresh: Refresh,
    ) -> Result<DeleteOutcome, StoreError>;

    /// Make every write so far visible to searches.
    async fn refresh(&self, collection: &str) -> Result<(), StoreError>;

    async fn search(&self, collection: &str, query: &Query) -> Result<Page, StoreError>;

    /// Snapshot the matches of `query` and return the first `page_size` hits
    /// together with a cursor for the rest. `from`/`size` are ignored.
    async fn open_cursor(
        &self,
        collection: &str,
        query: &Query,
        page_size: usize,
        keep_alive: Duration,
    ) -> Result<Page, StoreError>;

    /// Next batch of an open cursor; an empty batch means it is exhausted.
    /// Each call extends the cursor's life by `keep_alive`.
    async fn next_page(&self, cursor: &CursorId, keep_alive: Duration)
        -> Result<Page, StoreError>;

    /// Release a cursor. Clearing an unknown cursor is not an error.
    async fn clear_cursor(&self, cursor: &CursorId) -> Result<(), StoreError>;
}
