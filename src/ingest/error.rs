// SPDX-License-Identifier: GPL-2.0-or-later

use metastore::InsertRecordingError;
use thiserror::Error;

/// `startRecording(camera)` (§4.3). Maps to `common::CoreError::SpawnFailed`
/// at the gateway boundary.
#[derive(Debug, Error)]
pub enum StartRecordingError {
    #[error("camera not found: {0}")]
    CameraNotFound(common::CameraId),

    #[error("decrypt camera credentials: {0}")]
    Decrypt(#[from] crypto::DecryptError),

    #[error("build source url: {0}")]
    Url(#[from] url::ParseError),

    #[error("create recording directory: {0}")]
    CreateDir(#[from] fs::FsError),

    #[error("spawn transcoder: {0}")]
    Spawn(std::io::Error),

    #[error(transparent)]
    Store(#[from] metastore::MetaError),
}

#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("stat segment file: {0}")]
    Stat(std::io::Error),

    #[error(transparent)]
    Store(#[from] metastore::MetaError),
}

/// `§4.6` orphan reconciler sweeps.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] metastore::MetaError),
}

impl From<InsertRecordingError> for ReconcileError {
    fn from(e: InsertRecordingError) -> Self {
        match e {
            InsertRecordingError::Meta(e) => Self::Store(e),
            InsertRecordingError::DuplicateFilePath(_) => {
                unreachable!("caller must treat DuplicateFilePath as success before converting")
            }
        }
    }
}
