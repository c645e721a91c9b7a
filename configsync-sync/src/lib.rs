//! # configsync-sync
//!
//! Timestamp-gated atomic writer and reconciliation passes.
//!
//! Build a [`Reconciler`] over an [`EntryStore`](configsync_store::EntryStore)
//! and call [`Reconciler::run_pass`] from the scheduler or
//! [`Reconciler::flush_pass`] for an on-demand flush.

pub mod error;
pub mod path;
pub mod reconciler;
pub mod writer;

pub use error::SyncError;
pub use reconciler::{Checkpoint, PassReport, Reconciler, TerminationFlag};
pub use writer::{write_if_newer, WriteResult};
