//! Resumable scan over the entry collection.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::{Backend, CursorId, Hit, Page};
use crate::error::StoreError;

/// Pages of hits produced by [`EntryStore::scan`](crate::EntryStore::scan).
///
/// The first page is fetched when the scan is opened. Every later fetch is
/// bounded by the keep-alive, which also extends the backend cursor's life.
/// Call [`ScanCursor::close`] when done so the backend can release it.
pub struct ScanCursor {
    backend: Arc<dyn Backend>,
    cursor: Option<CursorId>,
    pending: Option<Vec<Hit>>,
    keep_alive: Duration,
    total: usize,
    exhausted: bool,
}

impl ScanCursor {
    pub(crate) fn new(backend: Arc<dyn Backend>, first: Page, keep_alive: Duration) -> Self {
        Self {
            backend,
            cursor: first.cursor,
            exhausted: first.hits.is_empty(),
            pending: Some(first.hits),
            keep_alive,
            total: first.total,
        }
    }

    /// Number of records matched when the scan was opened.
    pub fn total(&self) -> usize {
        self.total
    }

    /// The next non-empty page, or `None` once the scan is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Hit>>, StoreError> {
        if self.exhausted {
            return Ok(None);
        }
        if let Some(hits) = self.pending.take() {
            return Ok(Some(hits));
        }
        let Some(cursor) = self.cursor.clone() else {
            self.exhausted = true;
            return Ok(None);
        };
        let fetch = self.backend.next_page(&cursor, self.keep_alive);
        let page = tokio::time::timeout(self.keep_alive, fetch)
            .await
            .map_err(|_| StoreError::Timeout {
                operation: "scan page fetch",
                after: self.keep_alive,
            })??;
        if page.hits.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }
        Ok(Some(page.hits))
    }

    /// Release the backend cursor. Failures are logged, never returned.
    pub async fn close(mut self) {
        if let Some(cursor) = self.cursor.take() {
            if let Err(e) = self.backend.clear_cursor(&cursor).await {
                tracing::warn!(cursor = %cursor, error = %e, "failed to clear scan cursor");
            }
        }
    }
}
