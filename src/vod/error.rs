// SPDX-License-Identifier: GPL-2.0-or-later

use metastore::MetaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("recording not found")]
    NotFound,

    #[error("segment file missing on disk")]
    FileMissing,

    #[error("store: {0}")]
    Store(#[from] MetaError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("duration out of range 1..=3600")]
    InvalidDuration,

    #[error("no recordings overlap the requested window")]
    NoRecordings,

    #[error("segment file missing on disk")]
    FileMissing,

    #[error("failed to spawn transcoder: {0}")]
    Spawn(std::io::Error),

    #[error("transcoder exited with {0}")]
    TranscodeFailed(String),

    #[error("transcoder timed out and was killed")]
    Timeout,

    #[error("store: {0}")]
    Store(#[from] MetaError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
