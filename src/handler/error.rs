// SPDX-License-Identifier: GPL-2.0-or-later

//! Maps every crate-local error this gateway can see onto `common::CoreError`
//! (§7) and from there onto an HTTP status and a small JSON body. The core
//! crates never pick HTTP semantics; this is the one place that does.

use axum::{
    response::{IntoResponse, Response},
    Json,
};
use common::CoreError;
use http::StatusCode;
use serde::Serialize;

#[derive(Debug)]
pub enum ApiError {
    Core(CoreError),
    /// A failure with no natural §7 kind (e.g. an `io::Error` that isn't a
    /// missing-file case). Surfaced as a plain 500 with the detail logged
    /// server-side, not handed to the client verbatim beyond the message.
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Core(CoreError::NotFound) => StatusCode::NOT_FOUND,
            Self::Core(CoreError::Conflict(_)) => StatusCode::CONFLICT,
            Self::Core(CoreError::Validation(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Core(CoreError::StoreUnavailable) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Core(CoreError::SpawnFailed(_)) => StatusCode::BAD_GATEWAY,
            Self::Core(CoreError::TranscodeFailed(_)) => StatusCode::BAD_GATEWAY,
            Self::Core(CoreError::PlaylistTimeout) => StatusCode::GATEWAY_TIMEOUT,
            Self::Core(CoreError::FileMissing) => StatusCode::GONE,
            Self::Core(CoreError::ProtectedRecording) => StatusCode::CONFLICT,
            Self::Core(CoreError::RangeNotSatisfiable) => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match self {
            Self::Core(e) => e.to_string(),
            Self::Internal(msg) => msg,
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

impl From<metastore::MetaError> for ApiError {
    fn from(_: metastore::MetaError) -> Self {
        Self::Core(CoreError::StoreUnavailable)
    }
}

impl From<ingest::StartRecordingError> for ApiError {
    fn from(e: ingest::StartRecordingError) -> Self {
        use ingest::StartRecordingError::{CameraNotFound, CreateDir, Decrypt, Spawn, Store, Url};
        match e {
            CameraNotFound(_) => Self::Core(CoreError::NotFound),
            Decrypt(err) => Self::Core(CoreError::SpawnFailed(err.to_string())),
            Url(err) => Self::Core(CoreError::SpawnFailed(err.to_string())),
            CreateDir(err) => Self::Core(CoreError::SpawnFailed(err.to_string())),
            Spawn(err) => Self::Core(CoreError::SpawnFailed(err.to_string())),
            Store(err) => err.into(),
        }
    }
}

impl From<ingest::StopRecordingError> for ApiError {
    fn from(_: ingest::StopRecordingError) -> Self {
        Self::Core(CoreError::Conflict("camera is not recording".to_owned()))
    }
}

impl From<live::StartLiveError> for ApiError {
    fn from(e: live::StartLiveError) -> Self {
        use live::StartLiveError::{CameraNotFound, CreateDir, Decrypt, Spawn, Store, Url};
        match e {
            CameraNotFound(_) => Self::Core(CoreError::NotFound),
            Decrypt(err) => Self::Core(CoreError::SpawnFailed(err.to_string())),
            Url(err) => Self::Core(CoreError::SpawnFailed(err.to_string())),
            CreateDir(err) => Self::Core(CoreError::SpawnFailed(err.to_string())),
            Spawn(err) => Self::Core(CoreError::SpawnFailed(err.to_string())),
            Store(err) => err.into(),
        }
    }
}

impl From<live::StopLiveError> for ApiError {
    fn from(_: live::StopLiveError) -> Self {
        Self::Core(CoreError::NotFound)
    }
}

impl From<live::PlaylistError> for ApiError {
    fn from(e: live::PlaylistError) -> Self {
        match e {
            live::PlaylistError::NotLive => Self::Core(CoreError::NotFound),
            live::PlaylistError::Timeout => Self::Core(CoreError::PlaylistTimeout),
        }
    }
}

impl From<vod::StreamError> for ApiError {
    fn from(e: vod::StreamError) -> Self {
        match e {
            vod::StreamError::NotFound => Self::Core(CoreError::NotFound),
            vod::StreamError::FileMissing => Self::Core(CoreError::FileMissing),
            vod::StreamError::Store(err) => err.into(),
            vod::StreamError::Io(err) => Self::Internal(err.to_string()),
        }
    }
}

impl From<vod::ExportError> for ApiError {
    fn from(e: vod::ExportError) -> Self {
        match e {
            vod::ExportError::InvalidDuration => Self::Core(CoreError::Validation("durationSec out of range 1..=3600".to_owned())),
            vod::ExportError::NoRecordings => Self::Core(CoreError::NotFound),
            vod::ExportError::FileMissing => Self::Core(CoreError::FileMissing),
            vod::ExportError::Spawn(err) => Self::Core(CoreError::SpawnFailed(err.to_string())),
            vod::ExportError::TranscodeFailed(msg) => Self::Core(CoreError::TranscodeFailed(msg)),
            vod::ExportError::Timeout => Self::Core(CoreError::TranscodeFailed("export timed out".to_owned())),
            vod::ExportError::Store(err) => err.into(),
            vod::ExportError::Io(err) => Self::Internal(err.to_string()),
        }
    }
}

impl From<retention::RetentionError> for ApiError {
    fn from(e: retention::RetentionError) -> Self {
        match e {
            retention::RetentionError::AlreadyRunning => Self::Core(CoreError::Conflict("a retention run is already in progress".to_owned())),
            retention::RetentionError::Store(err) => err.into(),
            retention::RetentionError::Disk(err) => Self::Internal(err.to_string()),
            retention::RetentionError::Reconcile(err) => Self::Internal(err.to_string()),
            retention::RetentionError::Io(err) => Self::Internal(err.to_string()),
        }
    }
}

impl From<ingest::ReconcileError> for ApiError {
    fn from(e: ingest::ReconcileError) -> Self {
        match e {
            ingest::ReconcileError::Io(err) => Self::Internal(err.to_string()),
            ingest::ReconcileError::Store(err) => err.into(),
        }
    }
}

impl From<env::ParseSystemConfigError> for ApiError {
    fn from(e: env::ParseSystemConfigError) -> Self {
        Self::Core(CoreError::Validation(e.to_string()))
    }
}
