// SPDX-License-Identifier: GPL-2.0-or-later

//! Per-camera live publisher actor (§4.7). On the first `startLive` for a
//! camera, spawns an on-demand transcoder child that writes a rolling
//! low-latency HLS playlist, init segment, and chunked media parts into
//! `<root>/live/<camera>/`. The publisher watches that playlist file for
//! rewrites and serves blocking `_HLS_msn`/`_HLS_part` reads straight out
//! of its parsed cache.

use crate::{
    cache::{parse_playlist, PlaylistCache, PlaylistQuery},
    error::{PlaylistError, StartLiveError, StopLiveError},
};
use common::{time::Monotonic, ArcLogger, CameraId, EncryptionKey, LogEntry, LogLevel};
use ingest::rtsp_url;
use metastore::MetaStore;
use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::{collections::HashMap, path::PathBuf, sync::Arc};
use tokio::{
    process::Command,
    sync::{mpsc, oneshot, Mutex, Notify},
};

const DEFAULT_TRANSCODER_BIN: &str = "ffmpeg";
const PLAYLIST_NAME: &str = "playlist.m3u8";
const INIT_SEGMENT_NAME: &str = "init.mp4";
const PLAYLIST_WAIT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
const IDLE_GRACE: std::time::Duration = std::time::Duration::from_secs(30);
const STOP_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

struct LiveHandle {
    pid: u32,
    cache: Arc<Mutex<PlaylistCache>>,
    updated: Arc<Notify>,
    last_access: Arc<Mutex<Monotonic>>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
}

/// Owns one transcoder child per camera with an active live playlist.
/// Mirrors `ingest::IngestSupervisor`'s per-camera handle table, but reads
/// (`playlist`) release the table lock before blocking, since a long-poll
/// wait on one camera must never stall `startLive`/`stopLive` on another.
pub struct LivePublisher {
    store: MetaStore,
    live_dir: PathBuf,
    encryption_key: EncryptionKey,
    logger: ArcLogger,
    transcoder_bin: String,
    handles: Mutex<HashMap<CameraId, Arc<LiveHandle>>>,
}

impl LivePublisher {
    #[must_use]
    pub fn new(store: MetaStore, live_dir: PathBuf, encryption_key: EncryptionKey, logger: ArcLogger) -> Arc<Self> {
        Self::with_transcoder_bin(store, live_dir, encryption_key, logger, DEFAULT_TRANSCODER_BIN.to_owned())
    }

    #[must_use]
    pub fn with_transcoder_bin(
        store: MetaStore,
        live_dir: PathBuf,
        encryption_key: EncryptionKey,
        logger: ArcLogger,
        transcoder_bin: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            live_dir,
            encryption_key,
            logger,
            transcoder_bin,
            handles: Mutex::new(HashMap::new()),
        })
    }

    fn log(&self, level: LogLevel, camera_id: Option<CameraId>, message: impl Into<String>) {
        self.logger.log(LogEntry::new(level, "live", camera_id, message.into()));
    }

    /// `startLive(camera)` (§4.7, §6). Idempotent: a camera already
    /// publishing just has its idle clock reset.
    ///
    /// The map mutex is never held across the store lookup, directory
    /// creation, or child spawn (§5: "holders must not perform I/O under
    /// it") — only the initial check, and the final insert, take the lock.
    pub async fn start_live(self: &Arc<Self>, camera_id: &CameraId) -> Result<(), StartLiveError> {
        {
            let handles = self.handles.lock().await;
            if let Some(handle) = handles.get(camera_id) {
                *handle.last_access.lock().await = Monotonic::now();
                return Ok(());
            }
        }

        let camera = self
            .store
            .camera_get(camera_id)
            .await?
            .ok_or_else(|| StartLiveError::CameraNotFound(camera_id.clone()))?;

        let password = crypto::decrypt(&self.encryption_key, &camera.encrypted_password)?;
        let url = rtsp_url(&camera, &password)?;

        let camera_dir = self.live_dir.join(camera_id.as_ref());
        fs::ensure_dir(&camera_dir).await?;

        let playlist_path = camera_dir.join(PLAYLIST_NAME);

        let mut command = Command::new(&self.transcoder_bin);
        command
            .arg("-rtsp_transport")
            .arg("tcp")
            .arg("-i")
            .arg(url.as_str())
            .arg("-c")
            .arg("copy")
            .arg("-f")
            .arg("hls")
            .arg("-hls_time")
            .arg("2")
            .arg("-hls_list_size")
            .arg("6")
            .arg("-hls_flags")
            .arg("independent_segments+delete_segments+append_list")
            .arg("-hls_segment_type")
            .arg("fmp4")
            .arg("-hls_fmp4_init_filename")
            .arg(INIT_SEGMENT_NAME)
            .arg("-hls_segment_filename")
            .arg(camera_dir.join("part_%d.m4s"))
            .arg(&playlist_path)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());

        let child = command.spawn().map_err(StartLiveError::Spawn)?;
        let pid = child.id().unwrap_or(0);

        let cache = Arc::new(Mutex::new(PlaylistCache::default()));
        let updated = Arc::new(Notify::new());
        let last_access = Arc::new(Mutex::new(Monotonic::now()));
        let (stop_tx, stop_rx) = oneshot::channel();

        tokio::spawn(watch_child(
            Arc::clone(self),
            camera_id.clone(),
            camera_dir,
            playlist_path,
            child,
            Arc::clone(&cache),
            Arc::clone(&updated),
            stop_rx,
        ));

        let mut handles = self.handles.lock().await;
        if handles.contains_key(camera_id) {
            // Lost the race: another start_live call already published a
            // handle for this camera while the child above was spawning.
            // Tell the just-spawned duplicate to stop instead of keeping
            // two children writing into the same live directory.
            stop_tx.send(()).ok();
            return Ok(());
        }
        handles.insert(
            camera_id.clone(),
            Arc::new(LiveHandle {
                pid,
                cache,
                updated,
                last_access,
                stop_tx: Mutex::new(Some(stop_tx)),
            }),
        );
        Ok(())
    }

    /// `stopLive(camera)` (§4.7, §6). Sends a graceful-stop signal; the
    /// watcher task tears down the child and directory and removes the
    /// handle once it exits.
    pub async fn stop_live(&self, camera_id: &CameraId) -> Result<(), StopLiveError> {
        let handles = self.handles.lock().await;
        let handle = handles.get(camera_id).ok_or(StopLiveError::NotLive)?;
        if let Some(stop_tx) = handle.stop_tx.lock().await.take() {
            stop_tx.send(()).ok();
        }
        Ok(())
    }

    /// `liveStatus(camera)` (§6).
    pub async fn live_status(&self, camera_id: &CameraId) -> bool {
        self.handles.lock().await.contains_key(camera_id)
    }

    /// `playlist(camera, msn?, part?)` (§4.7, §6). Blocks until the cache
    /// satisfies `query` or `PLAYLIST_WAIT_TIMEOUT` elapses.
    pub async fn playlist(&self, camera_id: &CameraId, query: &PlaylistQuery) -> Result<Vec<u8>, PlaylistError> {
        let handle = {
            let handles = self.handles.lock().await;
            Arc::clone(handles.get(camera_id).ok_or(PlaylistError::NotLive)?)
        };
        *handle.last_access.lock().await = Monotonic::now();

        let wait = async {
            loop {
                let notified = handle.updated.notified();
                if let Some(content) = {
                    let cache = handle.cache.lock().await;
                    cache.satisfies(query).then(|| cache.content.clone())
                } {
                    return content;
                }
                notified.await;
            }
        };

        tokio::time::timeout(PLAYLIST_WAIT_TIMEOUT, wait)
            .await
            .map_err(|_| PlaylistError::Timeout)
    }

    /// Health sweep (§4.7 idle teardown, §4.10): stops any publisher that
    /// has had no `playlist`/`startLive` call for longer than
    /// `IDLE_GRACE`. Called by the health component alongside
    /// `ingest::IngestSupervisor::sweep_hung`.
    pub async fn sweep_idle(&self) {
        let idle: Vec<CameraId> = {
            let handles = self.handles.lock().await;
            let mut out = Vec::new();
            for (id, handle) in handles.iter() {
                if handle.last_access.lock().await.elapsed() > IDLE_GRACE {
                    out.push(id.clone());
                }
            }
            out
        };
        for id in idle {
            self.log(LogLevel::Info, Some(id.clone()), "live publisher idle, tearing down");
            self.stop_live(&id).await.ok();
        }
    }
}

fn i32_or_zero(pid: u32) -> i32 {
    i32::try_from(pid).unwrap_or(0)
}

async fn watch_child(
    publisher: Arc<LivePublisher>,
    camera_id: CameraId,
    camera_dir: PathBuf,
    playlist_path: PathBuf,
    mut child: tokio::process::Child,
    cache: Arc<Mutex<PlaylistCache>>,
    updated: Arc<Notify>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let log = |level: LogLevel, message: String| {
        publisher.log(level, Some(camera_id.clone()), message);
    };

    let (fs_tx, mut fs_rx) = mpsc::channel::<()>(8);
    let watcher: Option<RecommendedWatcher> = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if res.is_ok() {
            fs_tx.blocking_send(()).ok();
        }
    }) {
        Ok(mut watcher) => match watcher.watch(&camera_dir, RecursiveMode::NonRecursive) {
            Ok(()) => Some(watcher),
            Err(e) => {
                log(LogLevel::Error, format!("watch live directory: {e}"));
                None
            }
        },
        Err(e) => {
            log(LogLevel::Error, format!("create file watcher: {e}"));
            None
        }
    };

    let pid = child.id().unwrap_or(0);
    let mut stop_requested = false;

    loop {
        tokio::select! {
            event = fs_rx.recv(), if watcher.is_some() => {
                if event.is_none() {
                    continue;
                }
                if let Ok(bytes) = tokio::fs::read(&playlist_path).await {
                    let (media_sequence, part_index) = parse_playlist(&bytes);
                    let mut cache = cache.lock().await;
                    if media_sequence != cache.media_sequence || part_index != cache.part_index {
                        cache.media_sequence = media_sequence;
                        cache.part_index = part_index;
                        cache.content = bytes;
                        drop(cache);
                        updated.notify_waiters();
                    }
                }
            }
            status = child.wait() => {
                if let Ok(status) = status {
                    log(LogLevel::Warning, format!("live transcoder exited unexpectedly: {status}"));
                }
                break;
            }
            _ = &mut stop_rx => {
                stop_requested = true;
                break;
            }
        }
    }
    drop(watcher);

    if stop_requested {
        kill(Pid::from_raw(i32_or_zero(pid)), Signal::SIGTERM).ok();
        let waited = tokio::time::timeout(STOP_GRACE, child.wait()).await;
        if waited.is_err() {
            child.kill().await.ok();
            child.wait().await.ok();
        }
    }

    tokio::fs::remove_dir_all(&camera_dir).await.ok();
    // Gated on pid so a discarded duplicate spawn (lost the race in
    // `start_live`) can't evict the handle that actually won it.
    {
        let mut handles = publisher.handles.lock().await;
        if handles.get(&camera_id).is_some_and(|h| h.pid == pid) {
            handles.remove(&camera_id);
        }
    }

    if !stop_requested {
        log(LogLevel::Error, "live publisher stopped after unexpected child exit".to_owned());
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use common::CameraId;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_live_status_false_when_absent() {
        let store = MetaStore::open_in_memory_for_test();
        let publisher = LivePublisher::new(
            store,
            PathBuf::from("/tmp"),
            EncryptionKey::try_from("00".repeat(32).as_str()).unwrap(),
            common::DummyLogger::new(),
        );
        let id = CameraId::try_from("ABCD1234".to_owned()).unwrap();
        assert!(!publisher.live_status(&id).await);
    }

    #[tokio::test]
    async fn test_stop_live_not_live() {
        let store = MetaStore::open_in_memory_for_test();
        let publisher = LivePublisher::new(
            store,
            PathBuf::from("/tmp"),
            EncryptionKey::try_from("00".repeat(32).as_str()).unwrap(),
            common::DummyLogger::new(),
        );
        let id = CameraId::try_from("ABCD1234".to_owned()).unwrap();
        assert!(matches!(publisher.stop_live(&id).await, Err(StopLiveError::NotLive)));
    }

    #[tokio::test]
    async fn test_playlist_not_live() {
        let store = MetaStore::open_in_memory_for_test();
        let publisher = LivePublisher::new(
            store,
            PathBuf::from("/tmp"),
            EncryptionKey::try_from("00".repeat(32).as_str()).unwrap(),
            common::DummyLogger::new(),
        );
        let id = CameraId::try_from("ABCD1234".to_owned()).unwrap();
        let err = publisher.playlist(&id, &PlaylistQuery::default()).await.unwrap_err();
        assert!(matches!(err, PlaylistError::NotLive));
    }

    #[tokio::test]
    async fn test_start_live_camera_not_found() {
        let store = MetaStore::open_in_memory_for_test();
        let publisher = LivePublisher::new(
            store,
            PathBuf::from("/tmp"),
            EncryptionKey::try_from("00".repeat(32).as_str()).unwrap(),
            common::DummyLogger::new(),
        );
        let id = CameraId::try_from("ABCD1234".to_owned()).unwrap();
        assert!(matches!(publisher.start_live(&id).await, Err(StartLiveError::CameraNotFound(_))));
    }
}
