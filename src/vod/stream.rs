// SPDX-License-Identifier: GPL-2.0-or-later

//! Single-segment streaming (§4.8, first two operations).

use std::path::Path;

use axum::response::Response;
use common::{
    time::{Duration, UnixNano},
    CameraId,
};
use http::HeaderMap;
use metastore::{MetaStore, Recording, RecordingId, RecordingStatus};

use crate::{error::StreamError, serve::serve_file};

/// `streamRecording(id)`. If the segment file is gone, marks the record
/// deleted — the same side effect the forward sweep (§4.6) would eventually
/// apply — and reports `FileMissing`.
pub async fn stream_recording(store: &MetaStore, headers: &HeaderMap, id: RecordingId) -> Result<Response, StreamError> {
    let recording = store.recording_get(id).await?.ok_or(StreamError::NotFound)?;
    serve_recording(store, headers, &recording).await
}

/// `streamByTime(cameraId, t)`: the unique `completed` recording whose
/// `[startTime, endTime]` contains `t`.
pub async fn stream_by_time(
    store: &MetaStore,
    headers: &HeaderMap,
    camera_id: &CameraId,
    t: UnixNano,
) -> Result<Response, StreamError> {
    let one_ns = Duration::from_nanos(1);
    let from = t.sub_duration(one_ns).unwrap_or(UnixNano::ZERO);
    let to = t.add_duration(one_ns).unwrap_or(UnixNano::MAX);
    let overlapping = store.recording_find_overlapping(camera_id, from, to).await?;
    let recording = overlapping
        .into_iter()
        .find(|r| r.status == RecordingStatus::Completed)
        .ok_or(StreamError::NotFound)?;
    serve_recording(store, headers, &recording).await
}

async fn serve_recording(store: &MetaStore, headers: &HeaderMap, recording: &Recording) -> Result<Response, StreamError> {
    let path = Path::new(&recording.file_path);
    match serve_file(headers, path).await {
        Ok(resp) => Ok(resp),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            store.recording_mark_deleted(recording.id).await?;
            Err(StreamError::FileMissing)
        }
        Err(e) => Err(StreamError::Io(e)),
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use metastore::{Camera, ConnectionState, NewRecording, RecordingMode, RecordingState};
    use pretty_assertions::assert_eq;

    async fn store_with_camera() -> (MetaStore, CameraId) {
        let store = MetaStore::open_in_memory_for_test();
        let id = CameraId::try_from("ABCD1234".to_owned()).unwrap();
        store
            .camera_upsert(Camera {
                id: id.clone(),
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
                recording_mode: RecordingMode::Continuous,
                retention_days: Some(30),
                active: true,
                connection_state: ConnectionState::Offline,
                recording_state: RecordingState::Stopped,
                last_seen: UnixNano::from(0),
                last_error: None,
            })
            .await
            .unwrap();
        (store, id)
    }

    fn sample(camera_id: &CameraId, start: i64, path: &str) -> NewRecording {
        NewRecording {
            camera_id: camera_id.clone(),
            file_path: path.to_owned(),
            start_time: UnixNano::from(start),
            end_time: UnixNano::from(start + 60),
            duration_sec: 60,
            size_bytes: 2048,
            protected: false,
            retention_instant: UnixNano::from(start + 30 * 86400),
            codec: "h264".to_owned(),
            width: 1920,
            height: 1080,
            bitrate: 2000,
            fps: 30,
            recovered_from_disk: false,
        }
    }

    #[tokio::test]
    async fn stream_recording_not_found() {
        let (store, _cam) = store_with_camera().await;
        let err = stream_recording(&store, &HeaderMap::new(), RecordingId(9999)).await.unwrap_err();
        assert!(matches!(err, StreamError::NotFound));
    }

    #[tokio::test]
    async fn stream_by_time_finds_containing_segment() {
        let (store, cam) = store_with_camera().await;
        store.recording_insert(sample(&cam, 0, "/tmp/does-not-exist-a")).await.unwrap();
        store.recording_insert(sample(&cam, 60, "/tmp/does-not-exist-b")).await.unwrap();

        let err = stream_by_time(&store, &HeaderMap::new(), &cam, UnixNano::from(65)).await.unwrap_err();
        // The matching recording was found (status moves past NotFound); the
        // file genuinely doesn't exist on disk so this becomes FileMissing.
        assert!(matches!(err, StreamError::FileMissing));
    }

    #[tokio::test]
    async fn stream_by_time_no_match_is_not_found() {
        let (store, cam) = store_with_camera().await;
        store.recording_insert(sample(&cam, 0, "/tmp/does-not-exist-a")).await.unwrap();

        let err = stream_by_time(&store, &HeaderMap::new(), &cam, UnixNano::from(1000)).await.unwrap_err();
        assert!(matches!(err, StreamError::NotFound));
    }

    #[tokio::test]
    async fn missing_file_marks_recording_deleted() {
        let (store, cam) = store_with_camera().await;
        let id = store.recording_insert(sample(&cam, 0, "/tmp/does-not-exist-c")).await.unwrap();

        let err = stream_recording(&store, &HeaderMap::new(), id).await.unwrap_err();
        assert!(matches!(err, StreamError::FileMissing));

        let got = store.recording_get(id).await.unwrap().unwrap();
        assert_eq!(got.status, RecordingStatus::Deleted);
    }
}
