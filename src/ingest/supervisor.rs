// SPDX-License-Identifier: GPL-2.0-or-later

//! Per-camera ingest actor (§4.3). One transcoder child process per
//! actively-recording camera; its stderr is watched for the segment muxer's
//! own "Opening '<path>' for writing" lines, which mark the boundary
//! between one closed segment and the next. A closed segment is handed to
//! [`finalize_segment`] as soon as its successor opens.

use crate::{
    error::StartRecordingError,
    finalizer::{finalize_segment, FinalizeInput},
    rtsp::rtsp_url,
};
use common::{
    time::{Monotonic, UnixNano},
    ArcLogger, CameraId, EncryptionKey, LogEntry, LogLevel,
};
use metastore::{Camera, CameraStateDelta, ConnectionState, MetaStore, RecordingState};
use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use std::{collections::HashMap, path::PathBuf, sync::Arc};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
    sync::{oneshot, Mutex},
};

const RESTART_COOLOFF: std::time::Duration = std::time::Duration::from_secs(10);
const STOP_GRACE: std::time::Duration = std::time::Duration::from_secs(5);
const MAX_ACTIVITY_AGE: std::time::Duration = std::time::Duration::from_secs(90);
const MAX_SEGMENT_OPEN_AGE: std::time::Duration = std::time::Duration::from_secs(120);
const SEGMENT_TIME_SECS: u32 = 60;
const DEFAULT_TRANSCODER_BIN: &str = "ffmpeg";

#[derive(Debug, Error)]
pub enum StopRecordingError {
    #[error("camera is not recording")]
    NotRecording,
}

/// State the health sweep and the watcher task both need to read; the
/// watcher task is the only writer.
struct HandleState {
    last_activity: Monotonic,
    last_segment_opened_at: Option<Monotonic>,
}

struct IngestHandle {
    pid: u32,
    state: Arc<Mutex<HandleState>>,
    stop_tx: Option<oneshot::Sender<()>>,
}

/// Owns one transcoder child per actively-recording camera. Transitions for
/// a given camera always happen while holding that camera's entry in
/// `handles`, so start/stop/restart never race each other for the same
/// camera; different cameras proceed fully in parallel.
pub struct IngestSupervisor {
    store: MetaStore,
    recordings_dir: PathBuf,
    encryption_key: EncryptionKey,
    logger: ArcLogger,
    transcoder_bin: String,
    handles: Mutex<HashMap<CameraId, IngestHandle>>,
}

impl IngestSupervisor {
    #[must_use]
    pub fn new(store: MetaStore, recordings_dir: PathBuf, encryption_key: EncryptionKey, logger: ArcLogger) -> Arc<Self> {
        Self::with_transcoder_bin(store, recordings_dir, encryption_key, logger, DEFAULT_TRANSCODER_BIN.to_owned())
    }

    #[must_use]
    pub fn with_transcoder_bin(
        store: MetaStore,
        recordings_dir: PathBuf,
        encryption_key: EncryptionKey,
        logger: ArcLogger,
        transcoder_bin: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            recordings_dir,
            encryption_key,
            logger,
            transcoder_bin,
            handles: Mutex::new(HashMap::new()),
        })
    }

    fn log(&self, level: LogLevel, camera_id: Option<CameraId>, message: impl Into<String>) {
        self.logger.log(LogEntry::new(level, "ingest", camera_id, message.into()));
    }

    /// `startRecording(camera)` (§4.3, §6). Idempotent: starting an
    /// already-recording camera succeeds without touching the running child.
    ///
    /// The map mutex is never held across the spawn (§5: "holders must not
    /// perform I/O under it") — it's checked, released, and re-checked
    /// after the child is up. If another call won the race in between, the
    /// child just spawned here is told to stop rather than being inserted
    /// twice.
    pub async fn start_recording(self: &Arc<Self>, camera_id: &CameraId) -> Result<(), StartRecordingError> {
        if self.handles.lock().await.contains_key(camera_id) {
            return Ok(());
        }

        let camera = self
            .store
            .camera_get(camera_id)
            .await?
            .ok_or_else(|| StartRecordingError::CameraNotFound(camera_id.clone()))?;

        let mut handle = self.spawn_locked(self, &camera).await?;

        let mut handles = self.handles.lock().await;
        if handles.contains_key(camera_id) {
            if let Some(stop_tx) = handle.stop_tx.take() {
                stop_tx.send(()).ok();
            }
            return Ok(());
        }
        handles.insert(camera_id.clone(), handle);
        Ok(())
    }

    /// `stopRecording(camera)` (§4.3, §6): sends a graceful termination
    /// signal, waits up to `STOP_GRACE`, then force-kills. The watcher task
    /// finalizes whatever segment was open when the child exits.
    pub async fn stop_recording(&self, camera_id: &CameraId) -> Result<(), StopRecordingError> {
        let mut handles = self.handles.lock().await;
        let Some(handle) = handles.get_mut(camera_id) else {
            return Err(StopRecordingError::NotRecording);
        };
        if let Some(stop_tx) = handle.stop_tx.take() {
            stop_tx.send(()).ok();
        }
        Ok(())
    }

    /// `recordingStatus(camera)` (§6): true liveness, not the persisted
    /// `camera.recordingState` field, which can briefly lag a crash.
    pub async fn recording_status(&self, camera_id: &CameraId) -> RecordingState {
        if self.handles.lock().await.contains_key(camera_id) {
            RecordingState::Recording
        } else {
            RecordingState::Stopped
        }
    }

    /// Health sweep (§4.3, §4.10): force-kills and restarts any camera whose
    /// child has gone silent for longer than `MAX_ACTIVITY_AGE`, or that has
    /// held the same segment file open for longer than
    /// `MAX_SEGMENT_OPEN_AGE`. Called by the health component roughly every
    /// 30s; safe to call concurrently with itself and with start/stop.
    pub async fn sweep_hung(self: &Arc<Self>) {
        let hung: Vec<CameraId> = {
            let handles = self.handles.lock().await;
            let mut hung = Vec::new();
            for (id, handle) in handles.iter() {
                let state = handle.state.lock().await;
                let no_activity = state.last_activity.elapsed() > MAX_ACTIVITY_AGE;
                let stuck_segment = state
                    .last_segment_opened_at
                    .is_some_and(|t| t.elapsed() > MAX_SEGMENT_OPEN_AGE);
                if no_activity || stuck_segment {
                    hung.push(id.clone());
                }
            }
            hung
        };

        // Force-killing leaves the handle in place; the watcher task's own
        // unexpected-exit path (stderr EOF after the kill) removes the
        // handle and schedules the restart, so this doesn't race it.
        for id in hung {
            self.log(LogLevel::Warning, Some(id.clone()), "ingest child hung, force-killing");
            self.force_kill(&id).await;
        }
    }

    async fn force_kill(&self, camera_id: &CameraId) {
        let handles = self.handles.lock().await;
        if let Some(handle) = handles.get(camera_id) {
            kill(Pid::from_raw(i32_or_zero(handle.pid)), Signal::SIGKILL).ok();
        }
    }

    async fn spawn_locked(&self, supervisor: &Arc<Self>, camera: &Camera) -> Result<IngestHandle, StartRecordingError> {
        let password = crypto::decrypt(&self.encryption_key, &camera.encrypted_password)?;
        let url = rtsp_url(camera, &password)?;

        let camera_dir = self.recordings_dir.join(camera.id.as_ref());
        fs::ensure_dir(&camera_dir).await?;

        let pattern = camera_dir.join(format!("%Y/%m/%d/%H/{}_segment_%Y%m%d_%H%M%S.mp4", camera.id));

        let mut command = Command::new(&self.transcoder_bin);
        command
            .arg("-rtsp_transport")
            .arg("tcp")
            .arg("-i")
            .arg(url.as_str())
            .arg("-c")
            .arg("copy")
            .arg("-f")
            .arg("segment")
            .arg("-strftime")
            .arg("1")
            .arg("-segment_time")
            .arg(SEGMENT_TIME_SECS.to_string())
            .arg(pattern.to_string_lossy().into_owned())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped());

        let mut child = command.spawn().map_err(StartRecordingError::Spawn)?;
        let pid = child.id().unwrap_or(0);
        let stderr = child.stderr.take().expect("stderr was piped");

        let state = Arc::new(Mutex::new(HandleState {
            last_activity: Monotonic::now(),
            last_segment_opened_at: None,
        }));
        let (stop_tx, stop_rx) = oneshot::channel();

        let camera = camera.clone();
        let store = self.store.clone();
        let logger = Arc::clone(&self.logger);
        let watcher_state = Arc::clone(&state);
        let supervisor = Arc::clone(supervisor);

        tokio::spawn(watch_child(
            supervisor,
            camera,
            store,
            logger,
            child,
            stderr,
            watcher_state,
            stop_rx,
        ));

        Ok(IngestHandle {
            pid,
            state,
            stop_tx: Some(stop_tx),
        })
    }

    /// Restart hook invoked from the watcher task after an unexpected exit.
    /// Only restarts if nobody has started (or re-started) this camera in
    /// the meantime and the camera is still meant to be recording.
    async fn restart_after_crash(self: Arc<Self>, camera_id: CameraId) {
        tokio::time::sleep(RESTART_COOLOFF).await;

        if self.handles.lock().await.contains_key(&camera_id) {
            return; // someone already restarted it
        }
        let Ok(Some(camera)) = self.store.camera_get(&camera_id).await else {
            return;
        };
        if !camera.active || camera.recording_mode == metastore::RecordingMode::Off {
            return;
        }
        if let Err(e) = self.start_recording(&camera_id).await {
            self.log(LogLevel::Error, Some(camera_id), format!("restart after crash failed: {e}"));
        }
    }
}

fn i32_or_zero(pid: u32) -> i32 {
    i32::try_from(pid).unwrap_or(0)
}

/// Watches one child's stderr for segment-open lines, finalizing the
/// previous segment each time a new one opens, until the child exits or a
/// stop is requested.
#[allow(clippy::too_many_arguments)]
async fn watch_child(
    supervisor: Arc<IngestSupervisor>,
    camera: Camera,
    store: MetaStore,
    logger: ArcLogger,
    mut child: tokio::process::Child,
    stderr: tokio::process::ChildStderr,
    state: Arc<Mutex<HandleState>>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let log = |level: LogLevel, message: String| {
        logger.log(LogEntry::new(level, "ingest", Some(camera.id.clone()), message));
    };

    let pid = child.id().unwrap_or(0);
    let mut lines = BufReader::new(stderr).lines();
    let mut open_segment: Option<(PathBuf, UnixNano)> = None;
    let mut stop_requested = false;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(text)) => {
                        state.lock().await.last_activity = Monotonic::now();
                        if text.to_ascii_lowercase().contains("error") {
                            log(LogLevel::Warning, text.clone());
                        }
                        if let Some(path) = parse_opening_line(&text) {
                            if let Some((prev_path, prev_start)) = open_segment.replace((path, UnixNano::now())) {
                                spawn_finalize(&store, &camera, prev_path, prev_start);
                            }
                            state.lock().await.last_segment_opened_at = Some(Monotonic::now());
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log(LogLevel::Error, format!("read transcoder stderr: {e}"));
                        break;
                    }
                }
            }
            _ = &mut stop_rx => {
                stop_requested = true;
                break;
            }
        }
    }

    if stop_requested {
        kill(Pid::from_raw(i32_or_zero(pid)), Signal::SIGTERM).ok();
        let waited = tokio::time::timeout(STOP_GRACE, child.wait()).await;
        if waited.is_err() {
            child.kill().await.ok();
            child.wait().await.ok();
        }
    } else {
        child.wait().await.ok();
    }

    if let Some((path, start)) = open_segment {
        spawn_finalize(&store, &camera, path, start);
    }

    let new_state = if stop_requested {
        ConnectionState::Offline
    } else {
        ConnectionState::Error
    };
    store
        .camera_patch_state(
            &camera.id,
            CameraStateDelta {
                recording_state: Some(RecordingState::Stopped),
                connection_state: Some(new_state),
                last_error: if stop_requested { None } else { Some(Some("transcoder exited unexpectedly".to_owned())) },
                ..Default::default()
            },
        )
        .await
        .ok();

    // Remove our own handle so a concurrent start/restart isn't rejected as
    // "already recording", whether this exit was requested or not. Gated on
    // pid so a discarded duplicate spawn (lost the race in `start_recording`)
    // can't evict the handle that actually won it.
    {
        let mut handles = supervisor.handles.lock().await;
        if handles.get(&camera.id).is_some_and(|h| h.pid == pid) {
            handles.remove(&camera.id);
        }
    }

    if !stop_requested {
        log(LogLevel::Error, "ingest child exited unexpectedly, scheduling restart".to_owned());
        tokio::spawn(supervisor.restart_after_crash(camera.id.clone()));
    }
}

fn spawn_finalize(store: &MetaStore, camera: &Camera, path: PathBuf, start: UnixNano) {
    let store = store.clone();
    let input = FinalizeInput {
        camera_id: camera.id.clone(),
        path,
        start,
        codec: camera.codec.clone(),
        width: camera.width,
        height: camera.height,
        bitrate: camera.bitrate,
        fps: camera.fps,
        retention_days: camera.retention_days.unwrap_or(30),
    };
    tokio::spawn(async move {
        finalize_segment(&store, input).await.ok();
    });
}

/// Matches the segment muxer's own `Opening '<path>' for writing` log line.
fn parse_opening_line(line: &str) -> Option<PathBuf> {
    let after = line.split_once("Opening '")?.1;
    let (path, _) = after.split_once('\'')?;
    Some(PathBuf::from(path))
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_opening_line() {
        let line = "[segment @ 0x55] Opening '/data/ABCD1234_segment_20240101_000000.mp4' for writing";
        let got = parse_opening_line(line).unwrap();
        assert_eq!(got, PathBuf::from("/data/ABCD1234_segment_20240101_000000.mp4"));
    }

    #[test]
    fn test_parse_opening_line_no_match() {
        assert!(parse_opening_line("frame=  120 fps=30").is_none());
    }

    #[tokio::test]
    async fn test_recording_status_stopped_when_no_handle() {
        let store = MetaStore::open_in_memory_for_test();
        let supervisor = IngestSupervisor::new(
            store,
            PathBuf::from("/tmp"),
            EncryptionKey::try_from("00".repeat(32).as_str()).unwrap(),
            common::DummyLogger::new(),
        );
        let id = CameraId::try_from("ABCD1234".to_owned()).unwrap();
        assert_eq!(supervisor.recording_status(&id).await, RecordingState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_recording_not_recording() {
        let store = MetaStore::open_in_memory_for_test();
        let supervisor = IngestSupervisor::new(
            store,
            PathBuf::from("/tmp"),
            EncryptionKey::try_from("00".repeat(32).as_str()).unwrap(),
            common::DummyLogger::new(),
        );
        let id = CameraId::try_from("ABCD1234".to_owned()).unwrap();
        assert!(matches!(
            supervisor.stop_recording(&id).await,
            Err(StopRecordingError::NotRecording)
        ));
    }

    #[tokio::test]
    async fn test_start_recording_camera_not_found() {
        let store = MetaStore::open_in_memory_for_test();
        let supervisor = IngestSupervisor::new(
            store,
            PathBuf::from("/tmp"),
            EncryptionKey::try_from("00".repeat(32).as_str()).unwrap(),
            common::DummyLogger::new(),
        );
        let id = CameraId::try_from("ABCD1234".to_owned()).unwrap();
        assert!(matches!(
            supervisor.start_recording(&id).await,
            Err(StartRecordingError::CameraNotFound(_))
        ));
    }
}
