// SPDX-License-Identifier: GPL-2.0-or-later

//! Three-tier retention engine (§4.9). Each [`RetentionEngine::run_cleanup`]
//! call walks phases A (time-based expiry), B (storage-quota) and C
//! (disk-safety) in that order, each bounded to [`BATCH_LIMIT`] deletions so
//! a single run never holds up the scheduler that drives it, then hands off
//! to the orphan reconciler's reverse sweep and empty-directory removal
//! (§4.6) to keep the filesystem and the index consistent after the purge.
//! Deletions within a phase are ordered oldest-first.

use std::{path::PathBuf, sync::Arc};

use common::{
    time::{Duration, UnixNano},
    ArcLogger, LogEntry, LogLevel,
};
use env::{SystemConfigKey, DEFAULT_MAX_STORAGE_PERCENT};
use fs::remove_if_exists;
use metastore::{MetaStore, Recording};
use storage::Disk;
use tokio::sync::Mutex;

use crate::error::RetentionError;

/// Per-phase delete batch size; keeps a single phase iteration's sqlite
/// transaction and directory churn bounded (§4.9).
pub const BATCH_LIMIT: u32 = 1000;

/// Orphan age threshold the post-phase reverse sweep uses when invoked from
/// a scheduled retention run, distinct from the shorter threshold
/// `integrityCheck` uses (§4.6 Open Question, resolved in DESIGN.md).
const REVERSE_SWEEP_ORPHAN_AGE: Duration = Duration::from_hours(24);

/// Counts of what one [`RetentionEngine::run_cleanup`] call actually did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired_deleted: u32,
    pub expired_freed_bytes: u64,
    pub quota_deleted: u32,
    pub quota_freed_bytes: u64,
    pub disk_safety_deleted: u32,
    pub disk_safety_freed_bytes: u64,
    pub orphans_imported: u32,
    pub empty_dirs_removed: u32,
}

/// What a run would do without doing it (§C.2): the same oldest-first
/// selection each phase would act on, summed, never touching the store or
/// the filesystem.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupPreview {
    pub would_expire: u32,
    pub would_expire_bytes: u64,
    pub would_free_for_quota: u32,
    pub would_free_for_quota_bytes: u64,
    pub would_free_for_disk_safety: u32,
    pub would_free_for_disk_safety_bytes: u64,
}

/// Drives the three retention phases against one camera tree. One instance
/// per process; `running` enforces the single-flight guard (§5).
pub struct RetentionEngine {
    store: MetaStore,
    recordings_dir: PathBuf,
    disk: Arc<Disk>,
    logger: ArcLogger,
    running: Mutex<()>,
}

impl RetentionEngine {
    #[must_use]
    pub fn new(store: MetaStore, recordings_dir: PathBuf, disk: Arc<Disk>, logger: ArcLogger) -> Arc<Self> {
        Arc::new(Self {
            store,
            recordings_dir,
            disk,
            logger,
            running: Mutex::new(()),
        })
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.logger.log(LogEntry::new(level, "retention", None, message.into()));
    }

    /// `runCleanup()` (§4.9, §6). Runs phases A, B, C in order and then the
    /// post-phase reconciliation step. Returns `AlreadyRunning` instead of
    /// queuing behind a concurrent run.
    pub async fn run_cleanup(&self) -> Result<CleanupReport, RetentionError> {
        let _guard = self.running.try_lock().map_err(|_| RetentionError::AlreadyRunning)?;

        let mut report = CleanupReport::default();
        self.phase_expired(&mut report).await?;
        self.phase_quota(&mut report).await?;
        self.phase_disk_safety(&mut report).await?;

        report.orphans_imported = ingest::reconcile_reverse(&self.store, &self.recordings_dir, REVERSE_SWEEP_ORPHAN_AGE).await?;
        report.empty_dirs_removed = ingest::remove_empty_dirs(&self.recordings_dir).await?;

        self.log(
            LogLevel::Info,
            format!(
                "cleanup done: expired={} quota={} disk_safety={} orphans_imported={} empty_dirs_removed={}",
                report.expired_deleted, report.quota_deleted, report.disk_safety_deleted, report.orphans_imported, report.empty_dirs_removed
            ),
        );

        Ok(report)
    }

    /// `cleanupPreview()` (§C.2): same selection logic as the real phases,
    /// no deletions, no single-flight guard (reads don't conflict with a
    /// concurrent run).
    pub async fn cleanup_preview(&self) -> Result<CleanupPreview, RetentionError> {
        let mut preview = CleanupPreview::default();

        let expired = self.store.recording_find_expired(UnixNano::now(), BATCH_LIMIT).await?;
        preview.would_expire = u32::try_from(expired.len()).unwrap_or(u32::MAX);
        preview.would_expire_bytes = expired.iter().map(|r| r.size_bytes).sum();

        if let Some(limit_bytes) = self.max_storage_bytes().await? {
            let active = self.store.recording_total_active_size().await?;
            if active > limit_bytes {
                let over = active - limit_bytes;
                let (count, bytes) = self.project_oldest_until_freed(over).await?;
                preview.would_free_for_quota = count;
                preview.would_free_for_quota_bytes = bytes;
            }
        }

        let percent_limit = self.max_storage_percent().await?;
        let usage = self.disk.usage(Duration::from_secs(30)).await?;
        if usage.percent > f32::from(percent_limit) {
            let (count, bytes) = self.project_oldest_eligible(BATCH_LIMIT).await?;
            preview.would_free_for_disk_safety = count;
            preview.would_free_for_disk_safety_bytes = bytes;
        }

        Ok(preview)
    }

    /// Phase A: `retentionInstant <= now`, non-protected, capped at
    /// [`BATCH_LIMIT`] deletions for this run (§4.9 Phase A).
    async fn phase_expired(&self, report: &mut CleanupReport) -> Result<(), RetentionError> {
        let batch = self.store.recording_find_expired(UnixNano::now(), BATCH_LIMIT).await?;
        for rec in &batch {
            self.delete_one(rec).await?;
            report.expired_deleted += 1;
            report.expired_freed_bytes += rec.size_bytes;
        }
        Ok(())
    }

    /// Phase B: delete oldest-first until total active size is back under
    /// the configured `maxStorageGB`, or the batch of at most
    /// [`BATCH_LIMIT`] oldest-eligible candidates is exhausted, whichever
    /// comes first (§4.9 Phase B, S5).
    async fn phase_quota(&self, report: &mut CleanupReport) -> Result<(), RetentionError> {
        let Some(limit_bytes) = self.max_storage_bytes().await? else {
            return Ok(());
        };

        let mut active = self.store.recording_total_active_size().await?;
        if active <= limit_bytes {
            return Ok(());
        }

        let batch = self.store.recording_find_oldest_eligible(BATCH_LIMIT).await?;
        if batch.is_empty() {
            self.log(LogLevel::Warning, "storage over quota but no eligible recordings remain to delete");
            return Ok(());
        }

        for rec in &batch {
            if active <= limit_bytes {
                break;
            }
            self.delete_one(rec).await?;
            active = active.saturating_sub(rec.size_bytes);
            report.quota_deleted += 1;
            report.quota_freed_bytes += rec.size_bytes;
        }
        Ok(())
    }

    /// Phase C: delete oldest-first until the configured disk-usage
    /// percentage is back under `maxStoragePercent`, or the batch of at
    /// most [`BATCH_LIMIT`] oldest-eligible candidates is exhausted,
    /// whichever comes first (§4.9 Phase C, S5).
    async fn phase_disk_safety(&self, report: &mut CleanupReport) -> Result<(), RetentionError> {
        let limit_percent = self.max_storage_percent().await?;

        let usage = self.disk.usage(Duration::from_secs(0)).await?;
        if usage.percent <= f32::from(limit_percent) {
            return Ok(());
        }

        let batch = self.store.recording_find_oldest_eligible(BATCH_LIMIT).await?;
        if batch.is_empty() {
            self.log(LogLevel::Warning, "disk usage over threshold but no eligible recordings remain to delete");
            return Ok(());
        }

        for rec in &batch {
            let usage = self.disk.usage(Duration::from_secs(0)).await?;
            if usage.percent <= f32::from(limit_percent) {
                break;
            }
            self.delete_one(rec).await?;
            report.disk_safety_deleted += 1;
            report.disk_safety_freed_bytes += rec.size_bytes;
        }
        Ok(())
    }

    /// Removes the segment file (best-effort) and marks the row deleted.
    /// A removal failure is logged but doesn't stop the row from being
    /// marked deleted — retaining an undeletable file is preferable to
    /// retrying it forever on every future run.
    async fn delete_one(&self, rec: &Recording) -> Result<(), RetentionError> {
        if let Err(e) = remove_if_exists(std::path::Path::new(&rec.file_path)).await {
            self.log(LogLevel::Warning, format!("remove segment file for recording {}: {e}", rec.id));
        }
        self.store.recording_mark_deleted(rec.id).await?;
        Ok(())
    }

    async fn max_storage_bytes(&self) -> Result<Option<u64>, RetentionError> {
        let entry = self.store.config_get(SystemConfigKey::MaxStorageGb).await?;
        Ok(match entry.map(|e| e.value) {
            Some(env::SystemConfigValue::MaxStorageGb(Some(gb))) => Some(gb * bytesize::GB),
            _ => None,
        })
    }

    async fn max_storage_percent(&self) -> Result<u8, RetentionError> {
        let entry = self.store.config_get(SystemConfigKey::MaxStoragePercent).await?;
        Ok(match entry.map(|e| e.value) {
            Some(env::SystemConfigValue::MaxStoragePercent(p)) => p,
            _ => DEFAULT_MAX_STORAGE_PERCENT,
        })
    }

    async fn project_oldest_until_freed(&self, need_to_free: u64) -> Result<(u32, u64), RetentionError> {
        let candidates = self.store.recording_find_oldest_eligible(BATCH_LIMIT).await?;
        let mut freed = 0u64;
        let mut count = 0u32;
        for rec in &candidates {
            if freed >= need_to_free {
                break;
            }
            freed += rec.size_bytes;
            count += 1;
        }
        Ok((count, freed))
    }

    async fn project_oldest_eligible(&self, limit: u32) -> Result<(u32, u64), RetentionError> {
        let candidates = self.store.recording_find_oldest_eligible(limit).await?;
        let count = u32::try_from(candidates.len()).unwrap_or(u32::MAX);
        let bytes = candidates.iter().map(|r| r.size_bytes).sum();
        Ok((count, bytes))
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use bytesize::ByteSize;
    use common::{CameraId, DummyLogger};
    use metastore::{Camera, ConnectionState, NewRecording, RecordingMode, RecordingState, RecordingStatus};

    async fn store_with_camera(retention_days: Option<u16>) -> (MetaStore, CameraId) {
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
                retention_days,
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

    fn sample(camera_id: &CameraId, start: i64, retention_instant: i64, size: u64, path: &str) -> NewRecording {
        NewRecording {
            camera_id: camera_id.clone(),
            file_path: path.to_owned(),
            start_time: UnixNano::from(start),
            end_time: UnixNano::from(start + 60),
            duration_sec: 60,
            size_bytes: size,
            protected: false,
            retention_instant: UnixNano::from(retention_instant),
            codec: "h264".to_owned(),
            width: 1920,
            height: 1080,
            bitrate: 2000,
            fps: 30,
            recovered_from_disk: false,
        }
    }

    fn test_engine(store: MetaStore, dir: std::path::PathBuf) -> Arc<RetentionEngine> {
        let disk = Arc::new(Disk::new(dir.clone(), ByteSize::gb(1)));
        RetentionEngine::new(store, dir, disk, DummyLogger::new())
    }

    #[tokio::test]
    async fn phase_a_deletes_expired_non_protected() {
        let (store, cam) = store_with_camera(Some(30)).await;
        let dir = tempfile::tempdir().unwrap();
        let now = *UnixNano::now();

        let expired_id = store.recording_insert(sample(&cam, 0, now, 10, "/tmp/does-not-exist-expired")).await.unwrap();
        let not_expired_id = store
            .recording_insert(sample(&cam, 10, now + 1_000_000_000_000, 10, "/tmp/does-not-exist-future"))
            .await
            .unwrap();

        let eng = test_engine(store.clone(), dir.path().to_owned());
        let report = eng.run_cleanup().await.unwrap();
        assert_eq!(report.expired_deleted, 1);

        assert_eq!(store.recording_get(expired_id).await.unwrap().unwrap().status, RecordingStatus::Deleted);
        assert_eq!(store.recording_get(not_expired_id).await.unwrap().unwrap().status, RecordingStatus::Completed);
    }

    #[tokio::test]
    async fn protected_recording_survives_expiry() {
        let (store, cam) = store_with_camera(Some(30)).await;
        let dir = tempfile::tempdir().unwrap();
        let now = *UnixNano::now();

        let id = store.recording_insert(sample(&cam, 0, now, 10, "/tmp/does-not-exist-protected")).await.unwrap();
        store.recording_set_protected(id, true).await.unwrap();

        let eng = test_engine(store.clone(), dir.path().to_owned());
        let report = eng.run_cleanup().await.unwrap();
        assert_eq!(report.expired_deleted, 0);
        assert_eq!(store.recording_get(id).await.unwrap().unwrap().status, RecordingStatus::Completed);
    }

    #[tokio::test]
    async fn quota_phase_deletes_oldest_first_until_under_limit() {
        let (store, cam) = store_with_camera(Some(3650)).await;
        let dir = tempfile::tempdir().unwrap();
        let far_future = *UnixNano::now() + 1_000_000_000_000;

        for i in 0..3 {
            store
                .recording_insert(sample(&cam, i * 10, far_future, 500, &format!("/tmp/does-not-exist-q{i}")))
                .await
                .unwrap();
        }
        store
            .config_set(env::SystemConfigValue::MaxStorageGb(Some(0)), "test".to_owned(), UnixNano::now())
            .await
            .unwrap();

        let eng = test_engine(store.clone(), dir.path().to_owned());
        let report = eng.run_cleanup().await.unwrap();
        assert_eq!(report.quota_deleted, 3);
        assert_eq!(store.recording_total_active_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn quota_phase_stops_as_soon_as_under_limit_without_exhausting_batch() {
        let (store, cam) = store_with_camera(Some(3650)).await;
        let dir = tempfile::tempdir().unwrap();
        let far_future = *UnixNano::now() + 1_000_000_000_000;

        for i in 0..5 {
            store
                .recording_insert(sample(&cam, i * 10, far_future, bytesize::GB, &format!("/tmp/does-not-exist-qb{i}")))
                .await
                .unwrap();
        }
        store
            .config_set(env::SystemConfigValue::MaxStorageGb(Some(2)), "test".to_owned(), UnixNano::now())
            .await
            .unwrap();

        let eng = test_engine(store.clone(), dir.path().to_owned());
        let report = eng.run_cleanup().await.unwrap();
        assert_eq!(report.quota_deleted, 3);
        assert_eq!(store.recording_total_active_size().await.unwrap(), 2 * bytesize::GB);
    }

    #[tokio::test]
    async fn concurrent_run_is_already_running() {
        let (store, _cam) = store_with_camera(Some(30)).await;
        let dir = tempfile::tempdir().unwrap();
        let eng = test_engine(store, dir.path().to_owned());

        let (a, b) = tokio::join!(eng.run_cleanup(), eng.run_cleanup());
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(r, Err(RetentionError::AlreadyRunning))));
    }

    #[tokio::test]
    async fn preview_reports_without_deleting() {
        let (store, cam) = store_with_camera(Some(30)).await;
        let dir = tempfile::tempdir().unwrap();
        let now = *UnixNano::now();

        let id = store.recording_insert(sample(&cam, 0, now, 10, "/tmp/does-not-exist-preview")).await.unwrap();

        let eng = test_engine(store.clone(), dir.path().to_owned());
        let preview = eng.cleanup_preview().await.unwrap();
        assert_eq!(preview.would_expire, 1);
        assert_eq!(preview.would_expire_bytes, 10);

        assert_eq!(store.recording_get(id).await.unwrap().unwrap().status, RecordingStatus::Completed);
    }
}
