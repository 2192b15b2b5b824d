// SPDX-License-Identifier: GPL-2.0-or-later

//! Recording listing, VOD streaming, export and protection (§4.8, §6).

use axum::{
    extract::{Path, Query, State},
    response::Response,
    Json,
};
use common::{time::UnixNano, CoreError};
use http::HeaderMap;
use metastore::{Page, RecordingFilter, RecordingId};
use serde::{Deserialize, Serialize};

use crate::{
    auth::{self, AuthPrincipal},
    cameras::parse_camera_id,
    error::ApiError,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct ListRecordingsQuery {
    pub camera_id: Option<String>,
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub protected: Option<bool>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

const DEFAULT_PAGE_LIMIT: u32 = 100;
const MAX_PAGE_LIMIT: u32 = 1000;

#[derive(Debug, Serialize)]
pub struct RecordingResponse {
    pub id: i64,
    pub camera_id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub duration_sec: i64,
    pub size_bytes: u64,
    pub status: String,
    pub protected: bool,
}

impl From<metastore::Recording> for RecordingResponse {
    fn from(r: metastore::Recording) -> Self {
        Self {
            id: r.id.0,
            camera_id: r.camera_id.to_string(),
            start_time: *r.start_time,
            end_time: *r.end_time,
            duration_sec: r.duration_sec,
            size_bytes: r.size_bytes,
            status: match r.status {
                metastore::RecordingStatus::Recording => "recording".to_owned(),
                metastore::RecordingStatus::Completed => "completed".to_owned(),
                metastore::RecordingStatus::Deleted => "deleted".to_owned(),
            },
            protected: r.protected,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecordingListResponse {
    pub items: Vec<RecordingResponse>,
    pub total: u32,
}

pub async fn list_recordings(
    State(state): State<AppState>,
    Query(q): Query<ListRecordingsQuery>,
) -> Result<Json<RecordingListResponse>, ApiError> {
    let camera_id = q.camera_id.map(|s| parse_camera_id(&s)).transpose()?;
    let filter = RecordingFilter {
        camera_id,
        from: q.from.map(UnixNano::from),
        to: q.to.map(UnixNano::from),
        protected: q.protected,
    };
    let page = Page {
        limit: q.limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(MAX_PAGE_LIMIT),
        offset: q.offset.unwrap_or(0),
    };
    let result = state.store.recording_list_filtered(filter, page).await?;
    Ok(Json(RecordingListResponse {
        items: result.items.into_iter().map(RecordingResponse::from).collect(),
        total: result.total,
    }))
}

pub async fn get_recording(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<RecordingResponse>, ApiError> {
    let rec = state.store.recording_get(RecordingId(id)).await?.ok_or(ApiError::Core(CoreError::NotFound))?;
    Ok(Json(rec.into()))
}

pub async fn stream_recording(State(state): State<AppState>, Path(id): Path<i64>, headers: HeaderMap) -> Result<Response, ApiError> {
    Ok(vod::stream_recording(&state.store, &headers, RecordingId(id)).await?)
}

#[derive(Debug, Deserialize)]
pub struct StreamByTimeQuery {
    pub t: i64,
}

pub async fn stream_by_time(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
    Query(q): Query<StreamByTimeQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let camera_id = parse_camera_id(&camera_id)?;
    Ok(vod::stream_by_time(&state.store, &headers, &camera_id, UnixNano::from(q.t)).await?)
}

#[derive(Debug, Deserialize)]
pub struct ExportClipQuery {
    pub start: i64,
    pub duration_sec: u32,
}

pub async fn export_clip(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
    Query(q): Query<ExportClipQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let camera_id = parse_camera_id(&camera_id)?;
    let resp = vod::export_clip(
        &state.store,
        &state.export_dir,
        vod::DEFAULT_TRANSCODER_BIN,
        &headers,
        &camera_id,
        UnixNano::from(q.start),
        q.duration_sec,
    )
    .await?;
    Ok(resp)
}

#[derive(Debug, Deserialize)]
pub struct ProtectRequest {
    pub protected: bool,
}

pub async fn protect(State(state): State<AppState>, Path(id): Path<i64>, Json(req): Json<ProtectRequest>) -> Result<(), ApiError> {
    let id = RecordingId(id);
    state.store.recording_get(id).await?.ok_or(ApiError::Core(CoreError::NotFound))?;
    state.store.recording_set_protected(id, req.protected).await?;
    Ok(())
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<i64>) -> Result<(), ApiError> {
    let id = RecordingId(id);
    let rec = state.store.recording_get(id).await?.ok_or(ApiError::Core(CoreError::NotFound))?;
    if rec.protected {
        return Err(ApiError::Core(CoreError::ProtectedRecording));
    }
    fs::remove_if_exists(std::path::Path::new(&rec.file_path))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    state.store.recording_mark_deleted(id).await?;
    Ok(())
}
