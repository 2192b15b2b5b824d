// SPDX-License-Identifier: GPL-2.0-or-later

use crate::{error::InsertRecordingError, MetaError, MetaStore};
use common::{time::UnixNano, CameraId};
use rusqlite::{params, OptionalExtension};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordingId(pub i64);

impl std::fmt::Display for RecordingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One closed segment (§3). `deleted` is terminal: once a row reaches it,
/// [`MetaStore::recording_mark_deleted`] is the only write it will ever see
/// again, and that call is a no-op.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordingStatus {
    Recording,
    Completed,
    Deleted,
}

impl RecordingStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Recording => "recording",
            Self::Completed => "completed",
            Self::Deleted => "deleted",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "recording" => Self::Recording,
            "deleted" => Self::Deleted,
            _ => Self::Completed,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Recording {
    pub id: RecordingId,
    pub camera_id: CameraId,
    pub file_path: String,
    pub start_time: UnixNano,
    pub end_time: UnixNano,
    pub duration_sec: i64,
    pub size_bytes: u64,
    pub status: RecordingStatus,
    pub protected: bool,
    pub retention_instant: UnixNano,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    pub fps: u32,
    pub recovered_from_disk: bool,
}

/// Fields supplied by the finalizer (§4.5) when inserting a new row; `id`,
/// and `status` (always `completed`) are assigned by the store.
#[derive(Clone, Debug)]
pub struct NewRecording {
    pub camera_id: CameraId,
    pub file_path: String,
    pub start_time: UnixNano,
    pub end_time: UnixNano,
    pub duration_sec: i64,
    pub size_bytes: u64,
    pub protected: bool,
    pub retention_instant: UnixNano,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    pub fps: u32,
    pub recovered_from_disk: bool,
}

fn row_to_recording(row: &rusqlite::Row) -> rusqlite::Result<Recording> {
    let id: i64 = row.get("id")?;
    let camera_id: String = row.get("camera_id")?;
    let status: String = row.get("status")?;
    let start_time: i64 = row.get("start_time")?;
    let end_time: i64 = row.get("end_time")?;
    let retention_instant: i64 = row.get("retention_instant")?;
    let size_bytes: i64 = row.get("size_bytes")?;
    Ok(Recording {
        id: RecordingId(id),
        camera_id: CameraId::try_from(camera_id).expect("stored camera id should be valid"),
        file_path: row.get("file_path")?,
        start_time: UnixNano::from(start_time),
        end_time: UnixNano::from(end_time),
        duration_sec: row.get("duration_sec")?,
        size_bytes: u64::try_from(size_bytes).unwrap_or(0),
        status: RecordingStatus::parse(&status),
        protected: row.get("protected")?,
        retention_instant: UnixNano::from(retention_instant),
        codec: row.get("codec")?,
        width: row.get("width")?,
        height: row.get("height")?,
        bitrate: row.get("bitrate")?,
        fps: row.get("fps")?,
        recovered_from_disk: row.get("recovered_from_disk")?,
    })
}

impl MetaStore {
    /// `recording.insert(rec)` (§4.2). On a `filePath` unique-key conflict,
    /// returns `DuplicateFilePath(existing_id)` rather than erroring the
    /// whole call — the finalizer and orphan reconciler both treat that as
    /// a successful (idempotent) insert.
    pub async fn recording_insert(&self, rec: NewRecording) -> Result<RecordingId, InsertRecordingError> {
        let file_path = rec.file_path.clone();
        let result = self
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO recording (
                        camera_id, file_path, start_time, end_time, duration_sec,
                        size_bytes, status, protected, retention_instant,
                        codec, width, height, bitrate, fps, recovered_from_disk
                    ) VALUES (?1,?2,?3,?4,?5,?6,'completed',?7,?8,?9,?10,?11,?12,?13,?14)",
                    params![
                        rec.camera_id.to_string(),
                        rec.file_path,
                        *rec.start_time,
                        *rec.end_time,
                        rec.duration_sec,
                        i64::try_from(rec.size_bytes).unwrap_or(i64::MAX),
                        rec.protected,
                        *rec.retention_instant,
                        rec.codec,
                        rec.width,
                        rec.height,
                        rec.bitrate,
                        rec.fps,
                        rec.recovered_from_disk,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await;

        match result {
            Ok(id) => Ok(RecordingId(id)),
            Err(MetaError::Sqlite(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error {
                    code: rusqlite::ErrorCode::ConstraintViolation,
                    ..
                },
                _,
            ))) => {
                let existing_id: i64 = self
                    .call(move |conn| {
                        conn.query_row(
                            "SELECT id FROM recording WHERE file_path = ?1",
                            params![file_path],
                            |r| r.get(0),
                        )
                    })
                    .await?;
                Err(InsertRecordingError::DuplicateFilePath(existing_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `recording.findOverlapping(cameraId, [from, to])`, ascending by
    /// `startTime` (§4.2).
    pub async fn recording_find_overlapping(
        &self,
        camera_id: &CameraId,
        from: UnixNano,
        to: UnixNano,
    ) -> Result<Vec<Recording>, MetaError> {
        let camera_id = camera_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM recording
                 WHERE camera_id = ?1 AND start_time < ?2 AND end_time > ?3
                 ORDER BY start_time ASC",
            )?;
            stmt.query_map(params![camera_id, *to, *from], row_to_recording)?
                .collect()
        })
        .await
    }

    /// `recording.findExpired(now, limit)`: non-deleted, non-protected,
    /// `retentionInstant <= now` (§4.2, §4.9 Phase A).
    pub async fn recording_find_expired(&self, now: UnixNano, limit: u32) -> Result<Vec<Recording>, MetaError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM recording
                 WHERE status != 'deleted' AND protected = 0 AND retention_instant <= ?1
                 ORDER BY start_time ASC
                 LIMIT ?2",
            )?;
            stmt.query_map(params![*now, limit], row_to_recording)?.collect()
        })
        .await
    }

    /// `recording.findOldestEligible(limit)`: non-deleted, non-protected,
    /// ascending by `startTime` (§4.2, §4.9 Phases B/C).
    pub async fn recording_find_oldest_eligible(&self, limit: u32) -> Result<Vec<Recording>, MetaError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM recording
                 WHERE status != 'deleted' AND protected = 0
                 ORDER BY start_time ASC
                 LIMIT ?1",
            )?;
            stmt.query_map(params![limit], row_to_recording)?.collect()
        })
        .await
    }

    /// `recording.markDeleted(id)`. Idempotent: a row already `deleted`
    /// stays `deleted`, never resurrected.
    pub async fn recording_mark_deleted(&self, id: RecordingId) -> Result<(), MetaError> {
        self.call(move |conn| {
            conn.execute(
                "UPDATE recording SET status = 'deleted' WHERE id = ?1 AND status != 'deleted'",
                params![id.0],
            )?;
            Ok(())
        })
        .await
    }

    /// `protect(id, bool)` (§6): toggles the flag that excludes a recording
    /// from every automatic deletion path. Never touches `status`.
    pub async fn recording_set_protected(&self, id: RecordingId, protected: bool) -> Result<(), MetaError> {
        self.call(move |conn| {
            conn.execute(
                "UPDATE recording SET protected = ?1 WHERE id = ?2",
                params![protected, id.0],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn recording_get(&self, id: RecordingId) -> Result<Option<Recording>, MetaError> {
        self.call(move |conn| {
            conn.query_row("SELECT * FROM recording WHERE id = ?1", params![id.0], row_to_recording)
                .optional()
        })
        .await
    }

    /// Lets the finalizer short-circuit step 1 of §4.5 ("if the index
    /// already contains `path`, return success") without first touching
    /// the filesystem.
    pub async fn recording_get_by_path(&self, file_path: &str) -> Result<Option<Recording>, MetaError> {
        let file_path = file_path.to_owned();
        self.call(move |conn| {
            conn.query_row(
                "SELECT * FROM recording WHERE file_path = ?1",
                params![file_path],
                row_to_recording,
            )
            .optional()
        })
        .await
    }

    /// All non-deleted recordings, protected or not — the forward sweep of
    /// the orphan reconciler (§4.6) needs to check every live row against
    /// the filesystem regardless of protection.
    pub async fn recording_list_non_deleted(&self) -> Result<Vec<Recording>, MetaError> {
        self.call(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM recording WHERE status != 'deleted' ORDER BY id")?;
            stmt.query_map([], row_to_recording)?.collect()
        })
        .await
    }

    /// `recording.totalActiveSize()`: sum of `sizeBytes` where `status !=
    /// deleted` (§4.2).
    pub async fn recording_total_active_size(&self) -> Result<u64, MetaError> {
        self.call(|conn| {
            let total: i64 =
                conn.query_row("SELECT COALESCE(SUM(size_bytes), 0) FROM recording WHERE status != 'deleted'", [], |r| {
                    r.get(0)
                })?;
            Ok(u64::try_from(total).unwrap_or(0))
        })
        .await
    }

    /// `listRecordings(filter, page)` (§6): non-deleted recordings matching
    /// `filter`, newest-first, plus the total match count so the caller can
    /// render pagination without a second round trip.
    pub async fn recording_list_filtered(&self, filter: RecordingFilter, page: Page) -> Result<RecordingPage, MetaError> {
        self.call(move |conn| {
            let mut clauses = vec!["status != 'deleted'".to_owned()];
            let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(camera_id) = &filter.camera_id {
                clauses.push(format!("camera_id = ?{}", args.len() + 1));
                args.push(Box::new(camera_id.to_string()));
            }
            if let Some(from) = filter.from {
                clauses.push(format!("end_time >= ?{}", args.len() + 1));
                args.push(Box::new(*from));
            }
            if let Some(to) = filter.to {
                clauses.push(format!("start_time <= ?{}", args.len() + 1));
                args.push(Box::new(*to));
            }
            if let Some(protected) = filter.protected {
                clauses.push(format!("protected = ?{}", args.len() + 1));
                args.push(Box::new(protected));
            }

            let where_clause = clauses.join(" AND ");
            let params: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM recording WHERE {where_clause}"),
                params.as_slice(),
                |r| r.get(0),
            )?;

            let mut select_params = params;
            let limit_idx = select_params.len() + 1;
            let offset_idx = select_params.len() + 2;
            select_params.push(&page.limit);
            select_params.push(&page.offset);

            let mut stmt = conn.prepare(&format!(
                "SELECT * FROM recording WHERE {where_clause} ORDER BY start_time DESC LIMIT ?{limit_idx} OFFSET ?{offset_idx}"
            ))?;
            let items = stmt.query_map(select_params.as_slice(), row_to_recording)?.collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(RecordingPage {
                items,
                total: u32::try_from(total).unwrap_or(u32::MAX),
            })
        })
        .await
    }
}

/// `listRecordings` filter (§6): every field is an optional narrowing
/// criterion, combined with `AND`.
#[derive(Clone, Debug, Default)]
pub struct RecordingFilter {
    pub camera_id: Option<CameraId>,
    pub from: Option<UnixNano>,
    pub to: Option<UnixNano>,
    pub protected: Option<bool>,
}

/// `listRecordings` pagination (§6).
#[derive(Clone, Copy, Debug)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

#[derive(Clone, Debug)]
pub struct RecordingPage {
    pub items: Vec<Recording>,
    pub total: u32,
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Camera, ConnectionState, RecordingMode, RecordingState};
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
    async fn test_insert_duplicate_file_path_is_idempotent() {
        let (store, cam) = store_with_camera().await;
        let id1 = store.recording_insert(sample(&cam, 0, "/a")).await.unwrap();
        let result = store.recording_insert(sample(&cam, 0, "/a")).await;
        match result {
            Err(InsertRecordingError::DuplicateFilePath(id)) => assert_eq!(id, id1.0),
            other => panic!("expected DuplicateFilePath, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_find_overlapping_sorted_ascending() {
        let (store, cam) = store_with_camera().await;
        store.recording_insert(sample(&cam, 120, "/c")).await.unwrap();
        store.recording_insert(sample(&cam, 0, "/a")).await.unwrap();
        store.recording_insert(sample(&cam, 60, "/b")).await.unwrap();

        let got = store
            .recording_find_overlapping(&cam, UnixNano::from(0), UnixNano::from(200))
            .await
            .unwrap();
        assert_eq!(
            got.iter().map(|r| r.file_path.clone()).collect::<Vec<_>>(),
            vec!["/a", "/b", "/c"]
        );
    }

    #[tokio::test]
    async fn test_mark_deleted_is_monotonic() {
        let (store, cam) = store_with_camera().await;
        let id = store.recording_insert(sample(&cam, 0, "/a")).await.unwrap();

        store.recording_mark_deleted(id).await.unwrap();
        let got = store.recording_get(id).await.unwrap().unwrap();
        assert_eq!(got.status, RecordingStatus::Deleted);

        // Calling again must stay a no-op, never resurrect the row.
        store.recording_mark_deleted(id).await.unwrap();
        let got = store.recording_get(id).await.unwrap().unwrap();
        assert_eq!(got.status, RecordingStatus::Deleted);
    }

    #[tokio::test]
    async fn test_total_active_size_excludes_deleted() {
        let (store, cam) = store_with_camera().await;
        let id_a = store.recording_insert(sample(&cam, 0, "/a")).await.unwrap();
        store.recording_insert(sample(&cam, 60, "/b")).await.unwrap();
        store.recording_mark_deleted(id_a).await.unwrap();

        let total = store.recording_total_active_size().await.unwrap();
        assert_eq!(total, 2048);
    }

    #[tokio::test]
    async fn test_set_protected_excludes_from_expired() {
        let (store, cam) = store_with_camera().await;
        let mut rec = sample(&cam, 0, "/a");
        rec.retention_instant = UnixNano::from(-1);
        let id = store.recording_insert(rec).await.unwrap();

        store.recording_set_protected(id, true).await.unwrap();
        let expired = store.recording_find_expired(UnixNano::from(0), 10).await.unwrap();
        assert!(expired.is_empty());

        store.recording_set_protected(id, false).await.unwrap();
        let expired = store.recording_find_expired(UnixNano::from(0), 10).await.unwrap();
        assert_eq!(expired.len(), 1);
    }

    #[tokio::test]
    async fn test_find_expired_excludes_protected() {
        let (store, cam) = store_with_camera().await;
        let mut protected = sample(&cam, 0, "/a");
        protected.protected = true;
        protected.retention_instant = UnixNano::from(-1);
        store.recording_insert(protected).await.unwrap();

        let mut expired = sample(&cam, 60, "/b");
        expired.retention_instant = UnixNano::from(-1);
        store.recording_insert(expired).await.unwrap();

        let got = store.recording_find_expired(UnixNano::from(0), 10).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].file_path, "/b");
    }
}
