// SPDX-License-Identifier: GPL-2.0-or-later

//! Clip export (§4.8, third operation). Concatenates the overlapping
//! segment(s) with the external transcoder's stream-copy mode, serves the
//! result with byte-range support, and removes the temporary file(s) once
//! the response body is dropped (normal completion or client cancellation
//! both run the same cleanup, since it lives in `Drop`).

use std::{
    path::{Path, PathBuf},
    pin::Pin,
    process::Stdio,
    task::{Context, Poll},
};

use axum::{
    body::Body,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use common::{time::UnixNano, CameraId};
use futures_lite::Stream;
use http::{header, HeaderMap, StatusCode};
use metastore::{MetaStore, Recording, RecordingStatus};
use pin_project::{pin_project, pinned_drop};
use tokio::{
    io::{AsyncReadExt, AsyncSeekExt},
    process::Command,
};
use tokio_util::io::ReaderStream;

use crate::{
    error::ExportError,
    range::{parse_range, ParseRangeError},
};

pub const DEFAULT_TRANSCODER_BIN: &str = "ffmpeg";
const MIN_DURATION_SECS: u32 = 1;
const MAX_DURATION_SECS: u32 = 3600;

/// `exportClip(cameraId, t0, durationSec)`.
pub async fn export_clip(
    store: &MetaStore,
    export_dir: &Path,
    transcoder_bin: &str,
    headers: &HeaderMap,
    camera_id: &CameraId,
    t0: UnixNano,
    duration_secs: u32,
) -> Result<Response, ExportError> {
    if !(MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&duration_secs) {
        return Err(ExportError::InvalidDuration);
    }

    let to = t0.add_duration(common::time::Duration::from_secs(i64::from(duration_secs))).unwrap_or(UnixNano::MAX);
    let segments: Vec<Recording> = store
        .recording_find_overlapping(camera_id, t0, to)
        .await?
        .into_iter()
        .filter(|r| r.status != RecordingStatus::Deleted)
        .collect();
    if segments.is_empty() {
        return Err(ExportError::NoRecordings);
    }
    for seg in &segments {
        if tokio::fs::metadata(&seg.file_path).await.is_err() {
            return Err(ExportError::FileMissing);
        }
    }

    fs::ensure_dir(export_dir).await.map_err(|e| ExportError::Io(std::io::Error::other(e.to_string())))?;

    let stamp = format!("{camera_id}_{t0}_{}", std::process::id());
    let out_path = export_dir.join(format!("export_{stamp}.mp4"));
    let seek_offset = t0.sub(segments[0].start_time).map(|d| d.as_secs()).unwrap_or(0);

    let list_path = if segments.len() == 1 {
        None
    } else {
        let list_path = export_dir.join(format!("concat_{stamp}.txt"));
        let contents = segments.iter().map(|s| format!("file '{}'\n", escape_concat_path(&s.file_path))).collect::<String>();
        tokio::fs::write(&list_path, contents).await?;
        Some(list_path)
    };

    let mut args: Vec<String> = Vec::new();
    if let Some(list_path) = &list_path {
        args.extend(["-f".to_owned(), "concat".to_owned(), "-safe".to_owned(), "0".to_owned()]);
        args.extend(["-i".to_owned(), list_path.to_string_lossy().into_owned()]);
    } else {
        args.extend(["-i".to_owned(), segments[0].file_path.clone()]);
    }
    args.extend(["-ss".to_owned(), seek_offset.to_string()]);
    args.extend(["-t".to_owned(), duration_secs.to_string()]);
    args.extend(["-c".to_owned(), "copy".to_owned(), "-y".to_owned(), out_path.to_string_lossy().into_owned()]);

    if let Err(e) = run_transcoder(transcoder_bin, &args, duration_secs).await {
        cleanup(&out_path, list_path.as_deref()).await;
        return Err(e);
    }

    match serve_with_cleanup(headers, &out_path, list_path).await {
        Ok(resp) => Ok(resp),
        Err(e) => {
            cleanup(&out_path, None).await;
            Err(ExportError::Io(e))
        }
    }
}

async fn run_transcoder(bin: &str, args: &[String], duration_secs: u32) -> Result<(), ExportError> {
    let mut child = Command::new(bin).args(args).stdout(Stdio::null()).stderr(Stdio::piped()).spawn().map_err(ExportError::Spawn)?;
    let mut stderr = child.stderr.take();

    let timeout = std::time::Duration::from_secs(u64::from(duration_secs) * 2 + 10);
    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(Ok(status)) => {
            let tail = read_tail(&mut stderr).await;
            Err(ExportError::TranscodeFailed(format!("{status}: {tail}")))
        }
        Ok(Err(e)) => Err(ExportError::Io(e)),
        Err(_elapsed) => {
            let _ = child.kill().await;
            Err(ExportError::Timeout)
        }
    }
}

async fn read_tail(stderr: &mut Option<tokio::process::ChildStderr>) -> String {
    let Some(stderr) = stderr else { return String::new() };
    let mut buf = String::new();
    let _ = stderr.read_to_string(&mut buf).await;
    buf
}

async fn cleanup(out_path: &Path, list_path: Option<&Path>) {
    let _ = tokio::fs::remove_file(out_path).await;
    if let Some(list_path) = list_path {
        let _ = tokio::fs::remove_file(list_path).await;
    }
}

fn escape_concat_path(path: &str) -> String {
    path.replace('\'', "'\\''")
}

/// Same byte-range logic as [`crate::serve::serve_file`], but the returned
/// body owns the temp file path(s) and deletes them once dropped.
async fn serve_with_cleanup(headers: &HeaderMap, path: &Path, list_path: Option<PathBuf>) -> std::io::Result<Response> {
    let content_type = mime_guess::from_path(path).first_or_octet_stream().to_string();
    let mut file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();

    let range_header = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    let range = match parse_range(range_header, size) {
        Ok(r) => r,
        Err(ParseRangeError::NoOverlap) => {
            cleanup(path, list_path.as_deref()).await;
            return Ok((StatusCode::RANGE_NOT_SATISFIABLE, "range not satisfiable").into_response());
        }
        Err(e) => {
            cleanup(path, list_path.as_deref()).await;
            return Ok((StatusCode::RANGE_NOT_SATISFIABLE, e.to_string()).into_response());
        }
    };

    file.seek(std::io::SeekFrom::Start(range.start)).await?;
    let is_partial = range_header.is_some();
    let status = if is_partial { StatusCode::PARTIAL_CONTENT } else { StatusCode::OK };

    let body = Body::from_stream(CleanupStream {
        inner: ReaderStream::new(file.take(range.length)),
        cleanup: vec![path.to_owned()].into_iter().chain(list_path).collect(),
    });

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type.as_str())
        .header(header::CONTENT_LENGTH, range.length)
        .header(header::ACCEPT_RANGES, "bytes");
    if is_partial {
        builder = builder.header(header::CONTENT_RANGE, range.content_range(size));
    }
    Ok(builder.body(body).expect("headers set above are all valid ASCII"))
}

#[pin_project(PinnedDrop)]
struct CleanupStream<T> {
    #[pin]
    inner: ReaderStream<T>,
    cleanup: Vec<PathBuf>,
}

#[pinned_drop]
impl<T> PinnedDrop for CleanupStream<T> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        for path in this.cleanup.drain(..) {
            tokio::spawn(async move {
                let _ = tokio::fs::remove_file(&path).await;
            });
        }
    }
}

impl<T: tokio::io::AsyncRead> Stream for CleanupStream<T> {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use metastore::{Camera, ConnectionState, NewRecording, RecordingMode, RecordingState};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

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
    async fn rejects_out_of_range_duration() {
        let (store, cam) = store_with_camera().await;
        let dir = tempdir().unwrap();
        let err = export_clip(&store, dir.path(), "ffmpeg", &HeaderMap::new(), &cam, UnixNano::from(0), 0).await.unwrap_err();
        assert!(matches!(err, ExportError::InvalidDuration));
        let err = export_clip(&store, dir.path(), "ffmpeg", &HeaderMap::new(), &cam, UnixNano::from(0), 3601).await.unwrap_err();
        assert!(matches!(err, ExportError::InvalidDuration));
    }

    #[tokio::test]
    async fn no_overlap_is_no_recordings() {
        let (store, cam) = store_with_camera().await;
        store.recording_insert(sample(&cam, 1000, "/tmp/x")).await.unwrap();
        let dir = tempdir().unwrap();
        let err = export_clip(&store, dir.path(), "ffmpeg", &HeaderMap::new(), &cam, UnixNano::from(0), 10).await.unwrap_err();
        assert!(matches!(err, ExportError::NoRecordings));
    }

    #[tokio::test]
    async fn missing_segment_file_is_file_missing() {
        let (store, cam) = store_with_camera().await;
        store.recording_insert(sample(&cam, 0, "/tmp/does-not-exist-export")).await.unwrap();
        let dir = tempdir().unwrap();
        let err = export_clip(&store, dir.path(), "ffmpeg", &HeaderMap::new(), &cam, UnixNano::from(5), 10).await.unwrap_err();
        assert!(matches!(err, ExportError::FileMissing));
    }
}
