// SPDX-License-Identifier: GPL-2.0-or-later

use async_trait::async_trait;
use bytesize::{ByteSize, GB};
use chrono::NaiveDateTime;
use common::{
    time::{Duration, UnixNano},
    CameraId,
};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;

/// Segment filename, either `<CameraId>_segment_YYYYMMDD_HHMMSS.<ext>` or
/// the legacy `segment_YYYYMMDD_HHMMSS.<ext>` (§4.1, §6). Both round-trip
/// through the parser; only the current form is ever written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentFilename {
    pub camera_id: Option<CameraId>,
    pub timestamp: NaiveDateTime,
    pub ext: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("bad path: '{0}'")]
pub struct BadPath(String);

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

impl SegmentFilename {
    /// Formats the current (non-legacy) filename convention.
    #[must_use]
    pub fn format(camera_id: &CameraId, timestamp: NaiveDateTime, ext: &str) -> String {
        format!(
            "{camera_id}_segment_{}.{ext}",
            timestamp.format(TIMESTAMP_FORMAT)
        )
    }

    /// Parses either filename form. Fails with [`BadPath`] on anything else.
    pub fn parse(name: &str) -> Result<Self, BadPath> {
        let stem_ext = name.rsplit_once('.');
        let (stem, ext) = stem_ext.ok_or_else(|| BadPath(name.to_owned()))?;

        let (camera_id, ts_part) = if let Some(rest) = stem.strip_prefix("segment_") {
            (None, rest)
        } else if let Some((id_part, rest)) = stem.split_once("_segment_") {
            let camera_id = CameraId::try_from(id_part.to_owned()).map_err(|_| BadPath(name.to_owned()))?;
            (Some(camera_id), rest)
        } else {
            return Err(BadPath(name.to_owned()));
        };

        let timestamp =
            NaiveDateTime::parse_from_str(ts_part, TIMESTAMP_FORMAT).map_err(|_| BadPath(name.to_owned()))?;

        Ok(Self {
            camera_id,
            timestamp,
            ext: ext.to_owned(),
        })
    }
}

/// `<root>/recordings/<CameraId>/<YYYY>/<MM>/<DD>/<HH>` (§3). Directory
/// creation along this path is idempotent: callers use `create_dir_all`.
#[must_use]
pub fn segment_dir(recordings_dir: &Path, camera_id: &CameraId, timestamp: NaiveDateTime) -> PathBuf {
    recordings_dir
        .join(camera_id.as_ref())
        .join(format!("{:04}", timestamp.format("%Y")))
        .join(format!("{:02}", timestamp.format("%m")))
        .join(format!("{:02}", timestamp.format("%d")))
        .join(format!("{:02}", timestamp.format("%H")))
}

#[must_use]
pub fn segment_path(recordings_dir: &Path, camera_id: &CameraId, timestamp: NaiveDateTime, ext: &str) -> PathBuf {
    segment_dir(recordings_dir, camera_id, timestamp).join(SegmentFilename::format(camera_id, timestamp, ext))
}

#[async_trait]
trait DiskUsager {
    async fn bytes(&self, path: PathBuf) -> Result<u64, UsageBytesError>;
}

/// Caches disk usage under `recordings_dir`; recomputing a full directory
/// walk on every call would make the retention loop (§4.9) and the
/// disk-safety phase pathologically slow on large trees.
pub struct Disk {
    recordings_dir: PathBuf,
    max_disk_usage: ByteSize,
    disk_usage: Box<dyn DiskUsager + Sync + Send>,
    cache: Mutex<Option<DiskCache>>,
    update_lock: Mutex<()>,
}

#[derive(Clone, Copy)]
struct DiskCache {
    usage: DiskUsage,
    last_update: UnixNano,
}

#[derive(Debug, Error)]
pub enum UsageError {
    #[error("sub")]
    Sub,

    #[error("calculate disk usage: {0}")]
    CalculateDiskUsage(#[from] UsageBytesError),
}

impl Disk {
    #[must_use]
    pub fn new(recordings_dir: PathBuf, max_disk_usage: ByteSize) -> Self {
        Self {
            recordings_dir,
            max_disk_usage,
            cache: Mutex::new(None),
            disk_usage: Box::new(DiskUsageBytes),
            update_lock: Mutex::new(()),
        }
    }

    /// Returns the cached value and its age, if any value has been computed.
    pub async fn usage_cached(&self) -> Option<(DiskUsage, Duration)> {
        let cache = *self.cache.lock().await;
        let cache = cache?;
        let age = UnixNano::now().sub(cache.last_update)?;
        Some((cache.usage, age))
    }

    /// Returns the cached value if within `max_age`, otherwise recomputes.
    pub async fn usage(&self, max_age: Duration) -> Result<DiskUsage, UsageError> {
        use UsageError::Sub;
        let max_time = UnixNano::now().sub_duration(max_age).ok_or(Sub)?;

        if let Some(cache) = &*self.cache.lock().await {
            if cache.last_update.after(max_time) {
                return Ok(cache.usage);
            }
        }

        let _update_guard = self.update_lock.lock().await;

        if let Some(cache) = &*self.cache.lock().await {
            if cache.last_update.after(max_time) {
                return Ok(cache.usage);
            }
        }

        let updated_usage = self.calculate_disk_usage().await?;

        *self.cache.lock().await = Some(DiskCache {
            usage: updated_usage,
            last_update: UnixNano::now(),
        });

        Ok(updated_usage)
    }

    async fn calculate_disk_usage(&self) -> Result<DiskUsage, UsageBytesError> {
        let used = self.disk_usage.bytes(self.recordings_dir.clone()).await?;
        #[allow(clippy::cast_precision_loss)]
        let percent = ((used * 100) as f64 / self.max_disk_usage.as_u64() as f64) as f32;
        let max = self.max_disk_usage.as_u64() / GB;
        Ok(DiskUsage { used, percent, max })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DiskUsage {
    pub used: u64,
    pub percent: f32,
    pub max: u64,
}

struct DiskUsageBytes;

#[derive(Debug, Error)]
pub enum UsageBytesError {
    #[error("read dir: {0} {1:?}")]
    ReadDir(std::io::Error, PathBuf),

    #[error("dir entry: {0}")]
    DirEntry(std::io::Error),

    #[error("metadata: {0}")]
    Metadata(std::io::Error),
}

#[async_trait]
impl DiskUsager for DiskUsageBytes {
    async fn bytes(&self, path: PathBuf) -> Result<u64, UsageBytesError> {
        tokio::task::spawn_blocking(move || -> Result<u64, UsageBytesError> {
            use UsageBytesError::{DirEntry, Metadata, ReadDir};
            let mut total = 0;

            let mut dirs = vec![path];
            while let Some(dir) = dirs.pop() {
                for entry in std::fs::read_dir(&dir).map_err(|e| ReadDir(e, dir.clone()))? {
                    let entry = entry.map_err(DirEntry)?;
                    let metadata = entry.metadata().map_err(Metadata)?;

                    total += metadata.len();

                    if metadata.is_dir() {
                        dirs.push(dir.join(entry.file_name()));
                    }
                }
            }
            Ok(total)
        })
        .await
        .expect("blocking task should not panic")
    }
}

/// Used by the retention disk-safety phase to walk recordings oldest-day
/// first without materializing the whole tree (§4.9 Phase C).
pub async fn oldest_day_dir(recordings_dir: &Path) -> Result<Option<PathBuf>, std::io::Error> {
    const DAY_DEPTH: u8 = 4;

    let mut path = recordings_dir.to_owned();
    let mut depth = 0;
    while depth < DAY_DEPTH {
        let dir = path.clone();
        let mut entries: Vec<_> = tokio::task::spawn_blocking(move || -> Result<Vec<_>, std::io::Error> {
            std::fs::read_dir(&dir)?.collect()
        })
        .await
        .expect("blocking task should not panic")?;

        entries.sort_by_key(std::fs::DirEntry::path);
        let Some(first) = entries.first() else {
            return Ok(None);
        };
        path = path.join(first.file_name());
        depth += 1;
    }
    Ok(Some(path))
}
