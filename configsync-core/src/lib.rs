//! configsync core library: domain types, settings and errors.
//!
//! - [`types`]: entry paths and ids, entries, intervals, health and sort enums
//! - [`settings`]: YAML node settings with `_at` / home-derived loaders
//! - [`error`]: [`CoreError`]

pub mod error;
pub mod settings;
pub mod types;

pub use error::CoreError;
pub use settings::Settings;
pub use types::{
    now_millis, Entry, EntryId, EntryPath, HealthStatus, Interval, SortOrder, SortSpec,
};
