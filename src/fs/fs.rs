// SPDX-License-Identifier: GPL-2.0-or-later

//! Filesystem helpers shared by every crate that touches on-disk state
//! (§4.1: "directory creation is idempotent and race-safe"). There is no
//! end-user UI to serve here, so this crate holds only the handful of
//! primitives the ingest, export, and retention paths actually need.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("create dir {0:?}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("no parent directory for {0:?}")]
    NoParent(PathBuf),

    #[error("write temp file {0:?}: {1}")]
    WriteTemp(PathBuf, std::io::Error),

    #[error("rename {0:?} -> {1:?}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),

    #[error("remove {0:?}: {1}")]
    Remove(PathBuf, std::io::Error),
}

/// Idempotent, race-safe directory creation (§4.1): concurrent callers
/// racing to create the same tree both see success, matching
/// `create_dir_all`'s existing idempotency, but callers get a crate-local
/// error type that names the path that failed.
pub async fn ensure_dir(dir: &Path) -> Result<(), FsError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| FsError::CreateDir(dir.to_owned(), e))
}

/// Writes `contents` to `path` without ever leaving a partially-written
/// file visible at `path`: writes to a sibling temp file first, then
/// renames over the target. Used for the export engine's concat list file
/// and anything else written once and read once.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), FsError> {
    let dir = path.parent().ok_or_else(|| FsError::NoParent(path.to_owned()))?;
    ensure_dir(dir).await?;

    let tmp_name = format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("write-atomic")
    );
    let tmp_path = dir.join(tmp_name);

    tokio::fs::write(&tmp_path, contents)
        .await
        .map_err(|e| FsError::WriteTemp(tmp_path.clone(), e))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| FsError::Rename(tmp_path, path.to_owned(), e))
}

/// Best-effort delete, swallowing "already gone" — callers use this for
/// temp-file cleanup after a cancelled or completed response body (§4.8),
/// where a second cleanup racing the first is expected, not an error.
pub async fn remove_if_exists(path: &Path) -> Result<(), FsError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) | Err(_) if !path.exists() => Ok(()),
        Err(e) => Err(FsError::Remove(path.to_owned(), e)),
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_ensure_dir_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b").join("c");
        ensure_dir(&nested).await.unwrap();
        ensure_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn test_write_atomic_no_partial_visible() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.txt");
        write_atomic(&path, b"hello").await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "hello");

        // Overwrite: no leftover temp file.
        write_atomic(&path, b"world").await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "world");
        let mut entries = tokio::fs::read_dir(tmp.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(e) = entries.next_entry().await.unwrap() {
            names.push(e.file_name());
        }
        assert_eq!(names, vec![std::ffi::OsString::from("out.txt")]);
    }

    #[tokio::test]
    async fn test_remove_if_exists_missing_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("gone.txt");
        remove_if_exists(&path).await.unwrap();
    }
}
