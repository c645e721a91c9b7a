//! Timestamp-gated atomic file writer.
//!
//! ## `write_if_newer` protocol
//!
//! 1. Stat the target. Missing → write.
//! 2. Compare the target's mtime (ms) with the record timestamp (ms). Strictly
//!    older → write; otherwise leave the local file alone.
//! 3. Create parent directories.
//! 4. Write to `<path>.configsync.tmp`.
//! 5. Rename to the final path (atomic on POSIX); drop the temp file if the
//!    rename fails.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{io_err, SyncError};

// ---------------------------------------------------------------------------
// Write result
// ---------------------------------------------------------------------------

/// Outcome of an individual file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// File was written (missing locally, or older than the record).
    Written { path: PathBuf },
    /// Skipped: the local copy is at least as new as the record.
    Unchanged { path: PathBuf },
}

impl WriteResult {
    pub fn path(&self) -> &Path {
        match self {
            WriteResult::Written { path } | WriteResult::Unchanged { path } => path,
        }
    }
}

// ---------------------------------------------------------------------------
// write_if_newer
// ---------------------------------------------------------------------------

/// Write `content` to `path` unless the local file is at least as new as
/// `timestamp`.
pub fn write_if_newer(
    path: &Path,
    content: &[u8],
    timestamp: DateTime<Utc>,
) -> Result<WriteResult, SyncError> {
    if !is_stale(path, timestamp)? {
        tracing::debug!(path = %path.display(), "unchanged");
        return Ok(WriteResult::Unchanged {
            path: path.to_path_buf(),
        });
    }
    let tmp = tmp_path(path);
    atomic_write_with_tmp(path, content, &tmp)?;
    Ok(WriteResult::Written {
        path: path.to_path_buf(),
    })
}

/// `true` when `path` is missing or its mtime is strictly earlier than
/// `timestamp` at millisecond precision.
pub fn is_stale(path: &Path, timestamp: DateTime<Utc>) -> Result<bool, SyncError> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(io_err(path, e)),
    };
    let modified = meta.modified().map_err(|e| io_err(path, e))?;
    let local_ms = DateTime::<Utc>::from(modified).timestamp_millis();
    let record_ms = timestamp.timestamp_millis();
    tracing::debug!(path = %path.display(), local_ms, record_ms, "comparing timestamps");
    Ok(local_ms < record_ms)
}

fn tmp_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.configsync.tmp", path.display()))
}

fn atomic_write_with_tmp(path: &Path, content: &[u8], tmp: &Path) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    std::fs::write(tmp, content).map_err(|e| io_err(tmp, e))?;

    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use filetime::{set_file_mtime, FileTime};
    use std::fs;
    use tempfile::TempDir;

    fn set_mtime(path: &Path, ts: DateTime<Utc>) {
        let ft = FileTime::from_unix_time(ts.timestamp(), ts.timestamp_subsec_nanos());
        set_file_mtime(path, ft).unwrap();
    }

    #[test]
    fn missing_file_is_written() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.yml");
        let result = write_if_newer(&path, b"a: 1", Utc::now()).unwrap();
        assert!(matches!(result, WriteResult::Written { .. }));
        assert_eq!(fs::read(&path).unwrap(), b"a: 1");
    }

    #[test]
    fn older_local_file_is_overwritten() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.yml");
        fs::write(&path, "old").unwrap();
        let record = Utc::now();
        set_mtime(&path, record - ChronoDuration::milliseconds(1));

        let result = write_if_newer(&path, b"new", record).unwrap();
        assert!(matches!(result, WriteResult::Written { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
    }

    #[test]
    fn newer_or_equal_local_file_is_left_alone() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.yml");
        fs::write(&path, "local edit").unwrap();
        let record = Utc::now() - ChronoDuration::hours(1);

        for offset in [0, 1] {
            set_mtime(&path, record + ChronoDuration::milliseconds(offset));
            let result = write_if_newer(&path, b"stored", record).unwrap();
            assert!(matches!(result, WriteResult::Unchanged { .. }), "offset {offset}");
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), "local edit");
    }

    #[test]
    fn creates_parent_directories_and_cleans_tmp() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("deep").join("er").join("file.conf");
        write_if_newer(&path, b"x", Utc::now()).unwrap();
        assert!(path.exists());
        assert!(!tmp_path(&path).exists(), ".configsync.tmp must be cleaned up");
    }

    #[test]
    fn binary_content_is_written_verbatim() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("blob.bin");
        let bytes = [0u8, 255, 10, 13, 10];
        write_if_newer(&path, &bytes, Utc::now()).unwrap();
        assert_eq!(fs::read(&path).unwrap(), bytes);
    }

    #[test]
    fn rename_failure_leaves_target_and_cleans_tmp() {
        let root = TempDir::new().unwrap();
        // A non-empty directory squatting on the target path makes the
        // rename fail regardless of privileges.
        let path = root.path().join("file.conf");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("keep"), "original").unwrap();

        let tmp_path = root.path().join("file.conf.configsync.tmp");
        let err = atomic_write_with_tmp(&path, b"new content", &tmp_path)
            .expect_err("rename onto a non-empty directory should fail");
        assert!(matches!(err, SyncError::Io { .. }));

        assert_eq!(fs::read_to_string(path.join("keep")).unwrap(), "original");
        assert!(!tmp_path.exists(), ".configsync.tmp should be cleaned up");
    }
}
