// SPDX-License-Identifier: GPL-2.0-or-later

//! Camera CRUD and the ingest/live control surface (§4.2, §4.3, §4.7, §6).

use axum::{
    extract::{Path, Query, State},
    Json,
};
use common::{time::UnixNano, CameraId};
use metastore::{Camera, ConnectionState, RecordingMode, RecordingState};
use serde::{Deserialize, Serialize};

use crate::{
    auth::{self, AuthPrincipal},
    error::ApiError,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct CameraListQuery {
    pub active: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct CameraResponse {
    pub id: String,
    pub display_name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate: u32,
    pub profile_name: String,
    pub compression_hint_enabled: bool,
    pub recording_mode: String,
    pub retention_days: Option<u16>,
    pub active: bool,
    pub connection_state: String,
    pub recording_state: String,
    pub last_seen: i64,
    pub last_error: Option<String>,
}

impl From<Camera> for CameraResponse {
    fn from(c: Camera) -> Self {
        Self {
            id: c.id.to_string(),
            display_name: c.display_name,
            host: c.host,
            port: c.port,
            username: c.username,
            codec: c.codec,
            width: c.width,
            height: c.height,
            fps: c.fps,
            bitrate: c.bitrate,
            profile_name: c.profile_name,
            compression_hint_enabled: c.compression_hint_enabled,
            recording_mode: match c.recording_mode {
                RecordingMode::Continuous => "continuous".to_owned(),
                RecordingMode::Off => "off".to_owned(),
            },
            retention_days: c.retention_days,
            active: c.active,
            connection_state: match c.connection_state {
                ConnectionState::Online => "online".to_owned(),
                ConnectionState::Offline => "offline".to_owned(),
                ConnectionState::Error => "error".to_owned(),
            },
            recording_state: match c.recording_state {
                RecordingState::Recording => "recording".to_owned(),
                RecordingState::Stopped => "stopped".to_owned(),
                RecordingState::Error => "error".to_owned(),
            },
            last_seen: *c.last_seen,
            last_error: c.last_error,
        }
    }
}

pub async fn list_cameras(State(state): State<AppState>, Query(q): Query<CameraListQuery>) -> Result<Json<Vec<CameraResponse>>, ApiError> {
    let cams = state.store.camera_list(q.active).await?;
    Ok(Json(cams.into_iter().map(CameraResponse::from).collect()))
}

pub async fn get_camera(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<CameraResponse>, ApiError> {
    let id = parse_camera_id(&id)?;
    let cam = state.store.camera_get(&id).await?.ok_or(ApiError::Core(common::CoreError::NotFound))?;
    Ok(Json(cam.into()))
}

/// The admin-settable half of a camera row (§6 `camera.upsert`). State
/// fields the supervisor owns (`connectionState`, `recordingState`,
/// `lastSeen`, `lastError`) are never accepted here — `MetaStore::camera_upsert`
/// already ignores them on conflict, and a fresh insert seeds sane defaults.
#[derive(Debug, Deserialize)]
pub struct CameraUpsertRequest {
    pub id: String,
    pub display_name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate: u32,
    pub profile_name: String,
    pub compression_hint_enabled: bool,
    pub recording_mode: String,
    pub retention_days: Option<u16>,
    pub active: bool,
}

pub async fn upsert_camera(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(req): Json<CameraUpsertRequest>,
) -> Result<Json<CameraResponse>, ApiError> {
    let id = parse_camera_id(&req.id)?;
    let recording_mode = match req.recording_mode.as_str() {
        "off" => RecordingMode::Off,
        "continuous" => RecordingMode::Continuous,
        other => return Err(ApiError::Core(common::CoreError::Validation(format!("unknown recordingMode: {other}")))),
    };
    let encrypted_password = crypto::encrypt(&state.encryption_key, &req.password).map_err(|e| ApiError::Internal(e.to_string()))?;

    let existing = state.store.camera_get(&id).await?;
    let camera = Camera {
        id: id.clone(),
        display_name: req.display_name,
        host: req.host,
        port: req.port,
        username: req.username,
        encrypted_password,
        codec: req.codec,
        width: req.width,
        height: req.height,
        fps: req.fps,
        bitrate: req.bitrate,
        profile_name: req.profile_name,
        compression_hint_enabled: req.compression_hint_enabled,
        recording_mode,
        retention_days: req.retention_days,
        active: req.active,
        connection_state: existing.as_ref().map_or(ConnectionState::Offline, |c| c.connection_state),
        recording_state: existing.as_ref().map_or(RecordingState::Stopped, |c| c.recording_state),
        last_seen: existing.as_ref().map_or(UnixNano::from(0), |c| c.last_seen),
        last_error: existing.as_ref().and_then(|c| c.last_error.clone()),
    };
    state.store.camera_upsert(camera).await?;
    auth::record(&state, &principal, Some(id.clone()), "camera upserted").await;

    let cam = state.store.camera_get(&id).await?.ok_or(ApiError::Core(common::CoreError::NotFound))?;
    Ok(Json(cam.into()))
}

pub async fn start_recording(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<String>,
) -> Result<(), ApiError> {
    let id = parse_camera_id(&id)?;
    state.ingest.start_recording(&id).await?;
    auth::record(&state, &principal, Some(id), "recording started").await;
    Ok(())
}

pub async fn stop_recording(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<String>,
) -> Result<(), ApiError> {
    let id = parse_camera_id(&id)?;
    state.ingest.stop_recording(&id).await?;
    auth::record(&state, &principal, Some(id), "recording stopped").await;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct RecordingStatusResponse {
    pub state: String,
}

pub async fn recording_status(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<RecordingStatusResponse>, ApiError> {
    let id = parse_camera_id(&id)?;
    let s = state.ingest.recording_status(&id).await;
    Ok(Json(RecordingStatusResponse {
        state: match s {
            RecordingState::Recording => "recording".to_owned(),
            RecordingState::Stopped => "stopped".to_owned(),
            RecordingState::Error => "error".to_owned(),
        },
    }))
}

pub async fn start_live(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<String>,
) -> Result<(), ApiError> {
    let id = parse_camera_id(&id)?;
    state.live.start_live(&id).await?;
    auth::record(&state, &principal, Some(id), "live publishing started").await;
    Ok(())
}

pub async fn stop_live(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<String>,
) -> Result<(), ApiError> {
    let id = parse_camera_id(&id)?;
    state.live.stop_live(&id).await?;
    auth::record(&state, &principal, Some(id), "live publishing stopped").await;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct LiveStatusResponse {
    pub live: bool,
}

pub async fn live_status(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<LiveStatusResponse>, ApiError> {
    let id = parse_camera_id(&id)?;
    Ok(Json(LiveStatusResponse {
        live: state.live.live_status(&id).await,
    }))
}

pub async fn playlist(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<live::PlaylistQuery>,
) -> Result<axum::response::Response, ApiError> {
    use axum::response::IntoResponse;
    let id = parse_camera_id(&id)?;
    let body = state.live.playlist(&id, &query).await?;
    Ok((
        [(http::header::CONTENT_TYPE, "application/vnd.apple.mpegurl")],
        body,
    )
        .into_response())
}

pub(crate) fn parse_camera_id(raw: &str) -> Result<CameraId, ApiError> {
    CameraId::try_from(raw.to_owned()).map_err(|e| ApiError::Core(common::CoreError::Validation(e.to_string())))
}
