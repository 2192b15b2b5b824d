// SPDX-License-Identifier: GPL-2.0-or-later

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use common::{CameraId, DummyLogger, EncryptionKey};
use ingest::IngestSupervisor;
use live::LivePublisher;
use metastore::MetaStore;
use pretty_assertions::assert_eq;
use retention::RetentionEngine;
use storage::Disk;
use tower::ServiceExt;

use crate::{router, AppState};

fn test_state(dir: &std::path::Path) -> AppState {
    let store = MetaStore::open_in_memory_for_test();
    let encryption_key = EncryptionKey::try_from("00".repeat(32).as_str()).unwrap();
    let logger = DummyLogger::new();
    let recordings_dir = dir.join("recordings");
    let export_dir = dir.join("export");
    std::fs::create_dir_all(&recordings_dir).unwrap();
    std::fs::create_dir_all(&export_dir).unwrap();

    let ingest = IngestSupervisor::new(store.clone(), recordings_dir.clone(), encryption_key.clone(), logger.clone());
    let live = LivePublisher::new(store.clone(), dir.join("live"), encryption_key.clone(), logger.clone());
    let disk = Arc::new(Disk::new(recordings_dir.clone(), bytesize::ByteSize::gb(100)));
    let retention = RetentionEngine::new(store.clone(), recordings_dir.clone(), disk.clone(), logger.clone());

    AppState {
        store,
        ingest,
        live,
        retention,
        disk,
        recordings_dir,
        export_dir,
        encryption_key,
        logger,
    }
}

fn upsert_body() -> String {
    serde_json::json!({
        "id": "ABCD1234",
        "display_name": "Front door",
        "host": "192.0.2.1",
        "port": 554,
        "username": "admin",
        "password": "hunter2",
        "codec": "h264",
        "width": 1920,
        "height": 1080,
        "fps": 30,
        "bitrate": 2000,
        "profile_name": "main",
        "compression_hint_enabled": false,
        "recording_mode": "continuous",
        "retention_days": 30,
        "active": true
    })
    .to_string()
}

#[tokio::test]
async fn list_cameras_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(test_state(dir.path()));

    let response = app
        .oneshot(Request::builder().uri("/api/cameras").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let cameras: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
    assert!(cameras.is_empty());
}

#[tokio::test]
async fn upsert_then_get_camera_roundtrips() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(test_state(dir.path()));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/cameras")
                .header("content-type", "application/json")
                .body(Body::from(upsert_body()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::builder().uri("/api/cameras/ABCD1234").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let got: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(got["id"], "ABCD1234");
    assert_eq!(got["display_name"], "Front door");
}

#[tokio::test]
async fn get_unknown_camera_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(test_state(dir.path()));

    let response = app
        .oneshot(Request::builder().uri("/api/cameras/ZZZZ0000").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn storage_stats_reports_zero_usage_on_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(test_state(dir.path()));

    let response = app
        .oneshot(Request::builder().uri("/api/storage/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let stats: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(stats["active_recordings_bytes"], 0);
}

#[tokio::test]
async fn delete_protected_recording_is_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());
    let cam = CameraId::try_from("ABCD1234".to_owned()).unwrap();
    state
        .store
        .camera_upsert(metastore::Camera {
            id: cam.clone(),
            display_name: "cam".to_owned(),
            host: "h".to_owned(),
            port: 554,
            username: "u".to_owned(),
            encrypted_password: vec![],
            codec: "h264".to_owned(),
            width: 1920,
            height: 1080,
            fps: 30,
            bitrate: 2000,
            profile_name: "main".to_owned(),
            compression_hint_enabled: false,
            recording_mode: metastore::RecordingMode::Continuous,
            retention_days: Some(30),
            active: true,
            connection_state: metastore::ConnectionState::Offline,
            recording_state: metastore::RecordingState::Stopped,
            last_seen: common::time::UnixNano::from(0),
            last_error: None,
        })
        .await
        .unwrap();
    let id = state
        .store
        .recording_insert(metastore::NewRecording {
            camera_id: cam,
            file_path: dir.path().join("seg.mp4").to_string_lossy().into_owned(),
            start_time: common::time::UnixNano::from(0),
            end_time: common::time::UnixNano::from(60),
            duration_sec: 60,
            size_bytes: 10,
            protected: true,
            retention_instant: common::time::UnixNano::from(30 * 86400),
            codec: "h264".to_owned(),
            width: 1920,
            height: 1080,
            bitrate: 2000,
            fps: 30,
            recovered_from_disk: false,
        })
        .await
        .unwrap();

    let app = router(state);
    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/recordings/{}", id.0))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}
