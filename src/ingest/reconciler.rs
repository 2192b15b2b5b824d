// SPDX-License-Identifier: GPL-2.0-or-later

use crate::error::ReconcileError;
use common::{
    time::{Duration, UnixNano},
    CameraId,
};
use metastore::{InsertRecordingError, MetaStore, NewRecording};
use std::{
    io,
    path::{Path, PathBuf},
    time::SystemTime,
};
use storage::SegmentFilename;

/// Fallback `retentionDays` for a recovered segment whose camera row no
/// longer exists (§4.6) — there is nobody left to ask, so the recovered
/// recording gets a conservative default rather than living forever.
const FALLBACK_RETENTION_DAYS: u16 = 30;

/// Forward sweep (§4.6 DB->FS): marks a non-deleted `Recording` deleted if
/// its file is gone. `mark_if_missing=false` only counts what it would
/// have deleted, for the read-only variant of the integrity check.
pub async fn reconcile_forward(store: &MetaStore, mark_if_missing: bool) -> Result<u32, ReconcileError> {
    let mut marked = 0;
    for rec in store.recording_list_non_deleted().await? {
        if tokio::fs::metadata(&rec.file_path).await.is_err() {
            if mark_if_missing {
                store.recording_mark_deleted(rec.id).await?;
            }
            marked += 1;
        }
    }
    Ok(marked)
}

/// Reverse sweep (§4.6 FS->DB): walks `recordings_dir`, inserting a
/// `recoveredFromDisk` recording for every file the index doesn't know
/// about and that is older than `orphan_age`. `recordings_dir` must be the
/// `<root>/recordings` directory itself, one level above the per-camera
/// trees, so that a legacy-named file's camera id can be read off its
/// containing directory.
pub async fn reconcile_reverse(
    store: &MetaStore,
    recordings_dir: &Path,
    orphan_age: Duration,
) -> Result<u32, ReconcileError> {
    let dir = recordings_dir.to_owned();
    let files = tokio::task::spawn_blocking(move || walk_files(&dir))
        .await
        .expect("blocking task should not panic")?;

    let now = SystemTime::now();
    let min_age = orphan_age.as_std().unwrap_or_default();
    let mut recovered = 0;
    for (path, mtime, len) in files {
        if now.duration_since(mtime).unwrap_or_default() < min_age {
            continue; // assumed to belong to a live writer
        }

        let path_str = path.to_string_lossy().into_owned();
        if store.recording_get_by_path(&path_str).await?.is_some() {
            continue;
        }

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Ok(parsed) = SegmentFilename::parse(name) else {
            continue; // not a segment file
        };
        let camera_id = match parsed.camera_id {
            Some(id) => id,
            None => {
                let Some(id) = camera_id_from_path(recordings_dir, &path) else {
                    continue;
                };
                id
            }
        };

        recover_one(store, camera_id, path_str, UnixNano::from_chrono(parsed.timestamp), len).await?;
        recovered += 1;
    }
    Ok(recovered)
}

async fn recover_one(
    store: &MetaStore,
    camera_id: CameraId,
    file_path: String,
    start: UnixNano,
    size_bytes: u64,
) -> Result<(), ReconcileError> {
    let retention_days = store
        .camera_get(&camera_id)
        .await?
        .and_then(|cam| cam.retention_days)
        .unwrap_or(FALLBACK_RETENTION_DAYS);

    let end_time = start.add_duration(Duration::from_secs(60)).unwrap_or(start);
    let retention_instant = start
        .add_duration(Duration::from_days(i64::from(retention_days)))
        .unwrap_or(UnixNano::MAX);

    let rec = NewRecording {
        camera_id,
        file_path,
        start_time: start,
        end_time,
        duration_sec: 60,
        size_bytes,
        protected: false,
        retention_instant,
        codec: "unknown".to_owned(),
        width: 0,
        height: 0,
        bitrate: 0,
        fps: 0,
        recovered_from_disk: true,
    };
    match store.recording_insert(rec).await {
        Ok(_) | Err(InsertRecordingError::DuplicateFilePath(_)) => Ok(()),
        Err(e @ InsertRecordingError::Meta(_)) => Err(e.into()),
    }
}

fn camera_id_from_path(recordings_dir: &Path, path: &Path) -> Option<CameraId> {
    let rel = path.strip_prefix(recordings_dir).ok()?;
    let first = rel.components().next()?;
    CameraId::try_from(first.as_os_str().to_str()?.to_owned()).ok()
}

fn walk_files(dir: &Path) -> io::Result<Vec<(PathBuf, SystemTime, u64)>> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_owned()];
    while let Some(d) = stack.pop() {
        for entry in std::fs::read_dir(&d)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if metadata.is_dir() {
                stack.push(entry.path());
            } else {
                out.push((entry.path(), metadata.modified()?, metadata.len()));
            }
        }
    }
    Ok(out)
}

/// Removes empty directories under `recordings_dir` bottom-up (§4.6),
/// never the directory itself.
pub async fn remove_empty_dirs(recordings_dir: &Path) -> Result<u32, std::io::Error> {
    let dir = recordings_dir.to_owned();
    tokio::task::spawn_blocking(move || -> io::Result<u32> {
        let mut removed = 0;
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let (_, count) = remove_if_empty(&entry.path())?;
                removed += count;
            }
        }
        Ok(removed)
    })
    .await
    .expect("blocking task should not panic")
}

fn remove_if_empty(dir: &Path) -> io::Result<(bool, u32)> {
    let mut empty = true;
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            let (child_empty, child_removed) = remove_if_empty(&entry.path())?;
            removed += child_removed;
            if !child_empty {
                empty = false;
            }
        } else {
            empty = false;
        }
    }
    if empty {
        std::fs::remove_dir(dir)?;
        removed += 1;
    }
    Ok((empty, removed))
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use metastore::{Camera, ConnectionState, RecordingMode, RecordingState};
    use tempfile::TempDir;

    fn cam_id() -> CameraId {
        CameraId::try_from("ABCD1234".to_owned()).unwrap()
    }

    async fn store_with_camera() -> MetaStore {
        let store = MetaStore::open_in_memory_for_test();
        store
            .camera_upsert(Camera {
                id: cam_id(),
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
                retention_days: Some(14),
                active: true,
                connection_state: ConnectionState::Offline,
                recording_state: RecordingState::Stopped,
                last_seen: UnixNano::from(0),
                last_error: None,
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_reconcile_forward_marks_missing_deleted() {
        let store = store_with_camera().await;
        let id = store
            .recording_insert(NewRecording {
                camera_id: cam_id(),
                file_path: "/does/not/exist.mp4".to_owned(),
                start_time: UnixNano::from(0),
                end_time: UnixNano::from(60),
                duration_sec: 60,
                size_bytes: 2048,
                protected: false,
                retention_instant: UnixNano::from(1_000_000),
                codec: "h264".to_owned(),
                width: 1920,
                height: 1080,
                bitrate: 2000,
                fps: 30,
                recovered_from_disk: false,
            })
            .await
            .unwrap();

        let marked = reconcile_forward(&store, true).await.unwrap();
        assert_eq!(marked, 1);
        let rec = store.recording_get(id).await.unwrap().unwrap();
        assert_eq!(rec.status, metastore::RecordingStatus::Deleted);
    }

    #[tokio::test]
    async fn test_reconcile_forward_dry_run_does_not_mutate() {
        let store = store_with_camera().await;
        let id = store
            .recording_insert(NewRecording {
                camera_id: cam_id(),
                file_path: "/does/not/exist.mp4".to_owned(),
                start_time: UnixNano::from(0),
                end_time: UnixNano::from(60),
                duration_sec: 60,
                size_bytes: 2048,
                protected: false,
                retention_instant: UnixNano::from(1_000_000),
                codec: "h264".to_owned(),
                width: 1920,
                height: 1080,
                bitrate: 2000,
                fps: 30,
                recovered_from_disk: false,
            })
            .await
            .unwrap();

        let marked = reconcile_forward(&store, false).await.unwrap();
        assert_eq!(marked, 1);
        let rec = store.recording_get(id).await.unwrap().unwrap();
        assert_eq!(rec.status, metastore::RecordingStatus::Completed);
    }

    #[tokio::test]
    async fn test_reconcile_reverse_recovers_old_orphan() {
        let store = store_with_camera().await;
        let dir = TempDir::new().unwrap();
        let cam_dir = dir.path().join("ABCD1234").join("2024").join("01").join("02").join("03");
        tokio::fs::create_dir_all(&cam_dir).await.unwrap();
        let file = cam_dir.join("ABCD1234_segment_20240102_030405.mp4");
        tokio::fs::write(&file, vec![0u8; 4096]).await.unwrap();

        // Backdate the file so it clears the orphan-age threshold.
        let old = std::time::SystemTime::now() - std::time::Duration::from_secs(3 * 86400);
        filetime::set_file_mtime(&file, filetime::FileTime::from_system_time(old)).ok();

        let recovered = reconcile_reverse(&store, dir.path(), Duration::from_hours(24))
            .await
            .unwrap();
        assert_eq!(recovered, 1);

        let rec = store
            .recording_get_by_path(&file.to_string_lossy())
            .await
            .unwrap()
            .unwrap();
        assert!(rec.recovered_from_disk);
    }

    #[tokio::test]
    async fn test_reconcile_reverse_skips_young_files() {
        let store = store_with_camera().await;
        let dir = TempDir::new().unwrap();
        let cam_dir = dir.path().join("ABCD1234").join("2024").join("01").join("02").join("03");
        tokio::fs::create_dir_all(&cam_dir).await.unwrap();
        let file = cam_dir.join("ABCD1234_segment_20240102_030405.mp4");
        tokio::fs::write(&file, vec![0u8; 4096]).await.unwrap();

        let recovered = reconcile_reverse(&store, dir.path(), Duration::from_hours(24))
            .await
            .unwrap();
        assert_eq!(recovered, 0);
    }

    #[tokio::test]
    async fn test_remove_empty_dirs() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("ABCD1234").join("2024").join("01");
        tokio::fs::create_dir_all(&empty).await.unwrap();
        let non_empty = dir.path().join("EFGH5678");
        tokio::fs::create_dir_all(&non_empty).await.unwrap();
        tokio::fs::write(non_empty.join("keep.mp4"), b"x").await.unwrap();

        remove_empty_dirs(dir.path()).await.unwrap();

        assert!(!dir.path().join("ABCD1234").exists());
        assert!(non_empty.exists());
    }
}
