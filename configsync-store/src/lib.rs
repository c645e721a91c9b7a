//! # configsync-store
//!
//! The authoritative entry store and the backends it runs on.
//!
//! - [`backend`]: the [`Backend`] contract shared by every storage engine
//! - [`memory`] / [`dir`]: in-process and shared-directory backends
//! - [`store`]: [`EntryStore`]: lazy collection setup, CRUD, listing, scans
//! - [`scan`]: [`ScanCursor`], the paged reader behind reconciliation passes

pub mod backend;
pub mod dir;
pub mod error;
pub mod memory;
pub mod query;
pub mod scan;
pub mod schema;
pub mod store;

pub use backend::{Backend, DeleteOutcome, Document, Hit, IndexOutcome, Page, Query, Refresh};
pub use dir::DirBackend;
pub use error::StoreError;
pub use memory::MemoryBackend;
pub use scan::ScanCursor;
pub use schema::CollectionSchema;
pub use store::{
    migrate_legacy, open_backend, EnsureOutcome, EntryStore, HealthReport, ListRequest,
    StoredEntry,
};
