//! Query evaluation and cursor bookkeeping shared by the in-process backends.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::time::Instant;

use configsync_core::{types::TIMESTAMP_FIELD, SortOrder, SortSpec};

use crate::backend::{CursorId, Document, Hit, Page, Query};
use crate::error::StoreError;

// ---------------------------------------------------------------------------
// Field access
// ---------------------------------------------------------------------------

/// Read `field` of `doc` as a timestamp. Accepts RFC 3339 strings and epoch
/// milliseconds.
pub fn doc_timestamp(doc: &Document, field: &str) -> Option<DateTime<Utc>> {
    match doc.get(field)? {
        serde_json::Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        serde_json::Value::Number(n) => Utc.timestamp_millis_opt(n.as_i64()?).single(),
        _ => None,
    }
}

enum SortKey {
    Time(DateTime<Utc>),
    Number(f64),
    Text(String),
}

impl SortKey {
    fn of(doc: &Document, field: &str) -> Option<Self> {
        if field == TIMESTAMP_FIELD {
            return doc_timestamp(doc, field).map(SortKey::Time);
        }
        match doc.get(field)? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(SortKey::Text(s.clone())),
            serde_json::Value::Number(n) => n.as_f64().map(SortKey::Number),
            other => Some(SortKey::Text(other.to_string())),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SortKey::Time(_) => 0,
            SortKey::Number(_) => 1,
            SortKey::Text(_) => 2,
        }
    }

    fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Time(a), SortKey::Time(b)) => a.cmp(b),
            (SortKey::Number(a), SortKey::Number(b)) => a.total_cmp(b),
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

pub fn matches(doc: &Document, query: &Query) -> bool {
    match &query.range {
        None => true,
        Some(range) => doc_timestamp(doc, &range.field).is_some_and(|ts| ts >= range.gte),
    }
}

/// Sort in place. Documents missing the sort field go last in either order;
/// ties fall back to id order.
pub fn sort_hits(hits: &mut [Hit], sort: &SortSpec) {
    hits.sort_by(|a, b| {
        let ord = match (
            SortKey::of(&a.source, &sort.field),
            SortKey::of(&b.source, &sort.field),
        ) {
            (Some(x), Some(y)) => match sort.order {
                SortOrder::Asc => x.compare(&y),
                SortOrder::Desc => x.compare(&y).reverse(),
            },
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        ord.then_with(|| a.id.cmp(&b.id))
    });
}

/// Keep only `fields` of an object document.
pub fn project(doc: &Document, fields: &[String]) -> Document {
    let mut out = serde_json::Map::new();
    for field in fields {
        if let Some(value) = doc.get(field) {
            out.insert(field.clone(), value.clone());
        }
    }
    serde_json::Value::Object(out)
}

/// Filter and order `hits` without windowing or projection.
pub fn select(hits: impl IntoIterator<Item = Hit>, query: &Query) -> Vec<Hit> {
    let mut selected: Vec<Hit> = hits
        .into_iter()
        .filter(|hit| matches(&hit.source, query))
        .collect();
    if let Some(sort) = &query.sort {
        sort_hits(&mut selected, sort);
    }
    selected
}

/// Full search evaluation: filter, sort, window, project.
pub fn execute(hits: impl IntoIterator<Item = Hit>, query: &Query) -> Page {
    let selected = select(hits, query);
    let total = selected.len();
    let size = query.size.unwrap_or(usize::MAX);
    let hits = selected
        .into_iter()
        .skip(query.from)
        .take(size)
        .map(|hit| match &query.fields {
            Some(fields) => Hit {
                source: project(&hit.source, fields),
                id: hit.id,
            },
            None => hit,
        })
        .collect();
    Page {
        hits,
        total,
        cursor: None,
    }
}

// ---------------------------------------------------------------------------
// Cursors
// ---------------------------------------------------------------------------

struct OpenCursor<T> {
    remaining: VecDeque<T>,
    page_size: usize,
    total: usize,
    expires_at: Instant,
}

/// One page handed out by a [`CursorTable`].
pub struct Batch<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub cursor: CursorId,
}

impl From<Batch<Hit>> for Page {
    fn from(batch: Batch<Hit>) -> Self {
        Page {
            hits: batch.items,
            total: batch.total,
            cursor: Some(batch.cursor),
        }
    }
}

/// Snapshot cursors keyed by generated ids. `T` is whatever a backend needs to
/// produce a page later: whole hits for the memory backend, document ids for
/// the directory backend. Expiry uses tokio's clock so paused-time tests can
/// drive it.
pub struct CursorTable<T> {
    prefix: &'static str,
    next_id: u64,
    open: HashMap<String, OpenCursor<T>>,
}

impl<T> CursorTable<T> {
    pub fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            next_id: 0,
            open: HashMap::new(),
        }
    }

    /// Register a snapshot and hand out its first page.
    pub fn open(&mut self, items: Vec<T>, page_size: usize, keep_alive: Duration) -> Batch<T> {
        let now = Instant::now();
        self.prune(now);
        self.next_id += 1;
        let id = format!("{}-{}", self.prefix, self.next_id);
        let mut cursor = OpenCursor {
            total: items.len(),
            remaining: items.into(),
            page_size: page_size.max(1),
            expires_at: now + keep_alive,
        };
        let first = take_page(&mut cursor);
        let total = cursor.total;
        self.open.insert(id.clone(), cursor);
        Batch {
            items: first,
            total,
            cursor: CursorId(id),
        }
    }

    pub fn next(&mut self, cursor: &CursorId, keep_alive: Duration) -> Result<Batch<T>, StoreError> {
        let now = Instant::now();
        self.prune(now);
        let open = self
            .open
            .get_mut(&cursor.0)
            .ok_or_else(|| StoreError::CursorExpired(cursor.0.clone()))?;
        open.expires_at = now + keep_alive;
        Ok(Batch {
            items: take_page(open),
            total: open.total,
            cursor: cursor.clone(),
        })
    }

    pub fn clear(&mut self, cursor: &CursorId) -> bool {
        self.open.remove(&cursor.0).is_some()
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    fn prune(&mut self, now: Instant) {
        self.open.retain(|_, cursor| cursor.expires_at > now);
    }
}

fn take_page<T>(cursor: &mut OpenCursor<T>) -> Vec<T> {
    let n = cursor.page_size.min(cursor.remaining.len());
    cursor.remaining.drain(..n).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
