// SPDX-License-Identifier: GPL-2.0-or-later

use crate::{duration_probe::probe_duration_secs, error::FinalizeError};
use common::{time::Duration, time::UnixNano, CameraId};
use metastore::{CameraStateDelta, ConnectionState, InsertRecordingError, MetaStore, NewRecording};
use std::path::PathBuf;

/// Nominal segment length the transcoder is configured to write (§6).
const SEGMENT_DURATION_SECS: i64 = 60;

/// Minimum size for a segment to be considered complete (§4.5 step 3). A
/// file smaller than this was abandoned mid-write, most often by a child
/// that was killed the instant it opened the next segment.
const MIN_SEGMENT_BYTES: u64 = 1024;

const STAT_RETRIES: u32 = 3;
const STAT_RETRY_DELAY_SECS: i64 = 2;

/// Everything the finalizer needs about one closed segment; a snapshot of
/// the camera's streaming parameters at the moment it was recorded, not a
/// live reference to the camera row.
pub struct FinalizeInput {
    pub camera_id: CameraId,
    pub path: PathBuf,
    pub start: UnixNano,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    pub fps: u32,
    pub retention_days: u16,
}

/// `(camera, path, startInstant)` -> index entry (§4.5). Safe to run many
/// of these concurrently for the same camera; they only ever race on the
/// `filePath` unique key, which the store resolves for us.
pub async fn finalize_segment(store: &MetaStore, input: FinalizeInput) -> Result<(), FinalizeError> {
    let file_path = input.path.to_string_lossy().into_owned();

    // Step 1: already indexed, nothing to do.
    if store.recording_get_by_path(&file_path).await?.is_some() {
        return Ok(());
    }

    // Step 2: stat with retry — the child may still be renaming the file
    // into place when the watcher hands it over.
    let mut metadata = None;
    for attempt in 0..STAT_RETRIES {
        match tokio::fs::metadata(&input.path).await {
            Ok(m) => {
                metadata = Some(m);
                break;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && attempt + 1 < STAT_RETRIES => {
                tokio::time::sleep(
                    Duration::from_secs(STAT_RETRY_DELAY_SECS)
                        .as_std()
                        .unwrap_or(std::time::Duration::from_secs(2)),
                )
                .await;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
            Err(e) => return Err(FinalizeError::Stat(e)),
        }
    }
    let Some(metadata) = metadata else {
        // Never appeared on disk; nothing to index.
        return Ok(());
    };

    // Step 3: discard incomplete segments.
    if metadata.len() < MIN_SEGMENT_BYTES {
        return Ok(());
    }

    // Steps 4-5. Probing the segment's own `mvhd` box gives the true
    // duration when the transcoder ran re-encode mode (segment length can
    // drift slightly from the nominal value); falls back to nominal on any
    // probe failure, which is the common case for a healthy stream-copy run.
    let duration_secs = probe_duration_secs(&input.path).await.unwrap_or(SEGMENT_DURATION_SECS);
    let end_time = input
        .start
        .add_duration(Duration::from_secs(duration_secs))
        .unwrap_or(input.start);
    let retention_instant = input
        .start
        .add_duration(Duration::from_days(i64::from(input.retention_days)))
        .unwrap_or(UnixNano::MAX);

    // Step 6.
    let rec = NewRecording {
        camera_id: input.camera_id.clone(),
        file_path,
        start_time: input.start,
        end_time,
        duration_sec: duration_secs,
        size_bytes: metadata.len(),
        protected: false,
        retention_instant,
        codec: input.codec,
        width: input.width,
        height: input.height,
        bitrate: input.bitrate,
        fps: input.fps,
        recovered_from_disk: false,
    };
    match store.recording_insert(rec).await {
        Ok(_) | Err(InsertRecordingError::DuplicateFilePath(_)) => {}
        Err(InsertRecordingError::Meta(e)) => return Err(e.into()),
    }

    // Step 7.
    store
        .camera_patch_state(
            &input.camera_id,
            CameraStateDelta {
                connection_state: Some(ConnectionState::Online),
                last_seen: Some(UnixNano::now()),
                ..Default::default()
            },
        )
        .await?;

    Ok(())
}
