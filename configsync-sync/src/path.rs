//! Mapping stored entry paths onto the local root.

use std::path::{Component, Path, PathBuf};

use configsync_core::EntryPath;

use crate::error::SyncError;

/// Resolve `path` under `root`.
///
/// Only plain name components are accepted, so the result always stays inside
/// `root`. Any `..` segment (or a drive prefix on Windows) rejects the path.
pub fn resolve(root: &Path, path: &EntryPath) -> Result<PathBuf, SyncError> {
    let rejected = |reason| SyncError::PathRejected {
        path: path.as_str().to_string(),
        reason,
    };

    if path.has_traversal() {
        return Err(rejected("parent directory segment"));
    }
    let mut resolved = root.to_path_buf();
    for component in Path::new(path.as_str()).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(rejected("parent directory segment")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(rejected("absolute path"));
            }
        }
    }
    Ok(resolved)
}
