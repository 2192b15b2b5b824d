// SPDX-License-Identifier: GPL-2.0-or-later

use thiserror::Error;

/// Raised once retries are exhausted (§4.2: 5 attempts, 5s..30s backoff),
/// or on a non-transient sqlite failure. Callers normalize this to
/// `common::CoreError::StoreUnavailable` at the gateway boundary.
#[derive(Debug, Error)]
pub enum MetaError {
    #[error("store unavailable after retries: {0}")]
    StoreUnavailable(rusqlite::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("open database: {0}")]
    Open(rusqlite::Error),

    #[error("migrate schema: {0}")]
    Migrate(rusqlite::Error),
}

#[derive(Debug, Error)]
pub enum InsertRecordingError {
    #[error(transparent)]
    Meta(#[from] MetaError),

    /// The unique `filePath` constraint fired. Per §4.2 the caller treats
    /// this as success; it still surfaces the conflicting row's id so the
    /// caller can log it.
    #[error("recording with this file path already exists: id={0:?}")]
    DuplicateFilePath(i64),
}
