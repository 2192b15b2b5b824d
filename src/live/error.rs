// SPDX-License-Identifier: GPL-2.0-or-later

use thiserror::Error;

/// `startLive(camera)` (§4.7, §6).
#[derive(Debug, Error)]
pub enum StartLiveError {
    #[error("camera not found: {0}")]
    CameraNotFound(common::CameraId),

    #[error("decrypt camera credentials: {0}")]
    Decrypt(#[from] crypto::DecryptError),

    #[error("build source url: {0}")]
    Url(#[from] url::ParseError),

    #[error("create live directory: {0}")]
    CreateDir(#[from] fs::FsError),

    #[error("spawn transcoder: {0}")]
    Spawn(std::io::Error),

    #[error(transparent)]
    Store(#[from] metastore::MetaError),
}

#[derive(Debug, Error)]
pub enum StopLiveError {
    #[error("camera has no active live publisher")]
    NotLive,
}

/// `playlist(camera, msn?, part?)` (§4.7). `NotLive` means nobody has
/// called `startLive` for this camera (or it already tore down from
/// idleness); the gateway should surface that as `CoreError::NotFound`.
/// `Timeout` maps to `CoreError::PlaylistTimeout`.
#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("camera has no active live publisher")]
    NotLive,

    #[error("playlist wait timed out")]
    Timeout,
}
