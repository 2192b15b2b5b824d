// SPDX-License-Identifier: GPL-2.0-or-later

use axum::routing::{get, post};
use axum::Router;

use crate::{cameras, maintenance, recordings, state::AppState};

/// Assembles the full §6 operation surface as an axum router. The caller
/// (the `vms` binary) supplies a ready `AppState` and layers whatever
/// authentication middleware the external gateway requires on top — this
/// crate assumes every request that reaches it is already authorized.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/cameras", get(cameras::list_cameras).put(cameras::upsert_camera))
        .route("/api/cameras/{id}", get(cameras::get_camera))
        .route("/api/cameras/{id}/recording/start", post(cameras::start_recording))
        .route("/api/cameras/{id}/recording/stop", post(cameras::stop_recording))
        .route("/api/cameras/{id}/recording/status", get(cameras::recording_status))
        .route("/api/cameras/{id}/live/start", post(cameras::start_live))
        .route("/api/cameras/{id}/live/stop", post(cameras::stop_live))
        .route("/api/cameras/{id}/live/status", get(cameras::live_status))
        .route("/api/cameras/{id}/live/playlist", get(cameras::playlist))
        .route("/api/cameras/{id}/stream", get(recordings::stream_by_time))
        .route("/api/cameras/{id}/export", get(recordings::export_clip))
        .route("/api/recordings", get(recordings::list_recordings))
        .route("/api/recordings/{id}", get(recordings::get_recording).delete(recordings::delete))
        .route("/api/recordings/{id}/stream", get(recordings::stream_recording))
        .route("/api/recordings/{id}/protect", post(recordings::protect))
        .route("/api/storage/stats", get(maintenance::storage_stats))
        .route("/api/storage/cleanup/preview", get(maintenance::cleanup_preview))
        .route("/api/storage/cleanup/run", post(maintenance::run_cleanup))
        .route("/api/storage/integrity-check", post(maintenance::integrity_check))
        .route("/api/storage/orphans/import", post(maintenance::import_orphans))
        .route("/api/storage/orphans/remove", post(maintenance::remove_orphans))
        .route("/api/storage/flush", post(maintenance::flush_all))
        .with_state(state)
}
