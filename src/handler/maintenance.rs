// SPDX-License-Identifier: GPL-2.0-or-later

//! Storage health, retention control and the orphan reconciler surface
//! (§4.6, §4.9, §6).

use axum::extract::{Query, State};
use axum::Json;
use common::time::Duration;
use serde::{Deserialize, Serialize};

use crate::{error::ApiError, state::AppState};

/// `integrityCheck`'s dry-run threshold differs from the 24h threshold a
/// scheduled retention run uses for its post-phase reverse sweep — an
/// operator-triggered check wants to catch orphans quickly, not wait out a
/// whole day of `mtime` settling.
const INTEGRITY_CHECK_ORPHAN_AGE: Duration = Duration::from_secs(120);

#[derive(Debug, Serialize)]
pub struct StorageStatsResponse {
    pub used_bytes: u64,
    pub max_bytes: u64,
    pub percent_used: f32,
    pub active_recordings_bytes: u64,
}

pub async fn storage_stats(State(state): State<AppState>) -> Result<Json<StorageStatsResponse>, ApiError> {
    let usage = state.disk.usage(Duration::from_secs(30)).await.map_err(|e| ApiError::Internal(e.to_string()))?;
    let active = state.store.recording_total_active_size().await?;
    Ok(Json(StorageStatsResponse {
        used_bytes: usage.used,
        max_bytes: usage.max,
        percent_used: usage.percent,
        active_recordings_bytes: active,
    }))
}

#[derive(Debug, Serialize)]
pub struct CleanupPreviewResponse {
    pub would_expire: u32,
    pub would_expire_bytes: u64,
    pub would_free_for_quota: u32,
    pub would_free_for_quota_bytes: u64,
    pub would_free_for_disk_safety: u32,
    pub would_free_for_disk_safety_bytes: u64,
}

impl From<retention::CleanupPreview> for CleanupPreviewResponse {
    fn from(p: retention::CleanupPreview) -> Self {
        Self {
            would_expire: p.would_expire,
            would_expire_bytes: p.would_expire_bytes,
            would_free_for_quota: p.would_free_for_quota,
            would_free_for_quota_bytes: p.would_free_for_quota_bytes,
            would_free_for_disk_safety: p.would_free_for_disk_safety,
            would_free_for_disk_safety_bytes: p.would_free_for_disk_safety_bytes,
        }
    }
}

pub async fn cleanup_preview(State(state): State<AppState>) -> Result<Json<CleanupPreviewResponse>, ApiError> {
    let preview = state.retention.cleanup_preview().await?;
    Ok(Json(preview.into()))
}

#[derive(Debug, Serialize)]
pub struct CleanupReportResponse {
    pub expired_deleted: u32,
    pub expired_freed_bytes: u64,
    pub quota_deleted: u32,
    pub quota_freed_bytes: u64,
    pub disk_safety_deleted: u32,
    pub disk_safety_freed_bytes: u64,
    pub orphans_imported: u32,
    pub empty_dirs_removed: u32,
}

impl From<retention::CleanupReport> for CleanupReportResponse {
    fn from(r: retention::CleanupReport) -> Self {
        Self {
            expired_deleted: r.expired_deleted,
            expired_freed_bytes: r.expired_freed_bytes,
            quota_deleted: r.quota_deleted,
            quota_freed_bytes: r.quota_freed_bytes,
            disk_safety_deleted: r.disk_safety_deleted,
            disk_safety_freed_bytes: r.disk_safety_freed_bytes,
            orphans_imported: r.orphans_imported,
            empty_dirs_removed: r.empty_dirs_removed,
        }
    }
}

pub async fn run_cleanup(State(state): State<AppState>) -> Result<Json<CleanupReportResponse>, ApiError> {
    let report = state.retention.run_cleanup().await?;
    Ok(Json(report.into()))
}

#[derive(Debug, Deserialize)]
pub struct IntegrityCheckQuery {
    #[serde(default)]
    pub fix: bool,
}

#[derive(Debug, Serialize)]
pub struct IntegrityCheckResponse {
    /// Index rows whose segment file is gone; marked `deleted` only when
    /// `fix` was set.
    pub stale_index_rows: u32,
    /// Files on disk imported as new rows; only ever non-zero when `fix`
    /// was set — computing this count without mutating would require a
    /// second full directory walk the reverse sweep doesn't expose yet.
    pub orphans_imported: u32,
}

pub async fn integrity_check(
    State(state): State<AppState>,
    Query(q): Query<IntegrityCheckQuery>,
) -> Result<Json<IntegrityCheckResponse>, ApiError> {
    let stale_index_rows = ingest::reconcile_forward(&state.store, q.fix).await?;
    let orphans_imported = if q.fix {
        ingest::reconcile_reverse(&state.store, &state.recordings_dir, INTEGRITY_CHECK_ORPHAN_AGE).await?
    } else {
        0
    };
    Ok(Json(IntegrityCheckResponse {
        stale_index_rows,
        orphans_imported,
    }))
}

#[derive(Debug, Serialize)]
pub struct OrphanSweepResponse {
    pub affected: u32,
}

/// `importOrphans()` (§6): reverse sweep only, files on disk the index
/// doesn't know about yet.
pub async fn import_orphans(State(state): State<AppState>) -> Result<Json<OrphanSweepResponse>, ApiError> {
    let affected = ingest::reconcile_reverse(&state.store, &state.recordings_dir, INTEGRITY_CHECK_ORPHAN_AGE).await?;
    Ok(Json(OrphanSweepResponse { affected }))
}

/// `removeOrphans()` (§6): forward sweep, index rows whose file is gone get
/// marked `deleted`.
pub async fn remove_orphans(State(state): State<AppState>) -> Result<Json<OrphanSweepResponse>, ApiError> {
    let affected = ingest::reconcile_forward(&state.store, true).await?;
    Ok(Json(OrphanSweepResponse { affected }))
}

/// `flushAll()` (§6): forces every open segment to finalize by cycling
/// ingest for every currently-recording camera. The actor only finalizes a
/// segment when its process exits (on a stop request or a crash, §4.5), so
/// a clean stop-then-restart is the only way to flush on demand without a
/// second, duplicate finalize path.
pub async fn flush_all(State(state): State<AppState>) -> Result<Json<OrphanSweepResponse>, ApiError> {
    let cameras = state.store.camera_list(Some(true)).await?;
    let mut affected = 0u32;
    for cam in cameras {
        if state.ingest.recording_status(&cam.id).await == metastore::RecordingState::Recording {
            state.ingest.stop_recording(&cam.id).await?;
            state.ingest.start_recording(&cam.id).await?;
            affected += 1;
        }
    }
    Ok(Json(OrphanSweepResponse { affected }))
}
