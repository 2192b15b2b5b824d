// SPDX-License-Identifier: GPL-2.0-or-later

//! Metadata Store Gateway (§4.2) and Segment Index (§2 component 3). Both
//! are CRUD-with-retry layers over the same sqlite file; the Segment Index
//! is simply the `Recording`-shaped half of this module (see `recording.rs`)
//! rather than a separately-wired crate, since splitting it would only add
//! ceremony around a second connection to the same database.

pub mod audit;
pub mod camera;
mod error;
pub mod recording;
pub mod system_config;

pub use audit::AuditEntry;
pub use camera::{Camera, CameraStateDelta, ConnectionState, RecordingMode, RecordingState};
pub use error::{InsertRecordingError, MetaError};
pub use recording::{NewRecording, Page, Recording, RecordingFilter, RecordingId, RecordingPage, RecordingStatus};
pub use system_config::{ConfigEntry, ConfigSetError};

use common::time::Duration;
use std::{
    path::Path,
    sync::{Arc, Mutex},
};

const RETRY_ATTEMPTS: u32 = 5;
const RETRY_BASE_SECS: i64 = 5;
const RETRY_MAX_SECS: i64 = 30;

/// A retry-wrapped handle to the sqlite-backed metadata store. Cheaply
/// cloneable; every clone shares the same connection and mutex.
#[derive(Clone)]
pub struct MetaStore {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl MetaStore {
    /// Opens (creating if absent) the sqlite file at `path` and ensures the
    /// schema exists.
    pub fn open(path: &Path) -> Result<Self, MetaError> {
        let conn = rusqlite::Connection::open(path).map_err(MetaError::Open)?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(MetaError::Open)?;
        conn.pragma_update(None, "busy_timeout", 5000).map_err(MetaError::Open)?;
        conn.execute_batch(SCHEMA).map_err(MetaError::Migrate)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[must_use]
    pub fn open_in_memory_for_test() -> Self {
        let conn = rusqlite::Connection::open_in_memory().expect("open in-memory sqlite");
        conn.execute_batch(SCHEMA).expect("apply schema");
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// §4.10 store ping: the health sweep's liveness check, a trivial query
    /// that still goes through the same retry-wrapped connection path every
    /// other operation does.
    pub async fn ping(&self) -> Result<(), MetaError> {
        self.call(|conn| conn.query_row("SELECT 1", [], |_| Ok(()))).await
    }

    /// Runs `f` against the connection, retrying transient failures (sqlite
    /// busy/locked) up to `RETRY_ATTEMPTS` times with exponential backoff.
    /// The core never holds this across an actual I/O boundary other than
    /// the backoff sleep itself — `f` runs to completion on a blocking
    /// thread before the retry loop ever awaits anything else.
    pub(crate) async fn call<T, F>(&self, f: F) -> Result<T, MetaError>
    where
        T: Send + 'static,
        F: Fn(&rusqlite::Connection) -> rusqlite::Result<T> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let mut backoff_secs = RETRY_BASE_SECS;
        for attempt in 0..RETRY_ATTEMPTS {
            let conn = Arc::clone(&self.conn);
            let f = Arc::clone(&f);
            let result = tokio::task::spawn_blocking(move || {
                let conn = conn.lock().expect("metastore connection mutex poisoned");
                f(&conn)
            })
            .await
            .expect("blocking task should not panic");

            match result {
                Ok(v) => return Ok(v),
                Err(e) if attempt + 1 < RETRY_ATTEMPTS && is_transient(&e) => {
                    let sleep = Duration::from_secs(backoff_secs)
                        .as_std()
                        .unwrap_or(std::time::Duration::from_secs(5));
                    tokio::time::sleep(sleep).await;
                    backoff_secs = (backoff_secs * 2).min(RETRY_MAX_SECS);
                }
                Err(e) if attempt + 1 == RETRY_ATTEMPTS && is_transient(&e) => {
                    return Err(MetaError::StoreUnavailable(e));
                }
                Err(e) => return Err(MetaError::Sqlite(e)),
            }
        }
        unreachable!("loop always returns within RETRY_ATTEMPTS iterations")
    }
}

fn is_transient(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS camera (
    id                        TEXT PRIMARY KEY,
    display_name              TEXT NOT NULL,
    host                      TEXT NOT NULL,
    port                      INTEGER NOT NULL,
    username                  TEXT NOT NULL,
    encrypted_password        BLOB NOT NULL,
    codec                     TEXT NOT NULL,
    width                     INTEGER NOT NULL,
    height                    INTEGER NOT NULL,
    fps                       INTEGER NOT NULL,
    bitrate                   INTEGER NOT NULL,
    profile_name              TEXT NOT NULL,
    compression_hint_enabled  INTEGER NOT NULL,
    recording_mode            TEXT NOT NULL,
    retention_days            INTEGER,
    active                    INTEGER NOT NULL,
    connection_state          TEXT NOT NULL,
    recording_state           TEXT NOT NULL,
    last_seen                 INTEGER NOT NULL,
    last_error                TEXT
);

CREATE TABLE IF NOT EXISTS recording (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    camera_id            TEXT NOT NULL REFERENCES camera(id),
    file_path            TEXT NOT NULL UNIQUE,
    start_time           INTEGER NOT NULL,
    end_time             INTEGER NOT NULL,
    duration_sec         INTEGER NOT NULL,
    size_bytes           INTEGER NOT NULL,
    status               TEXT NOT NULL,
    protected            INTEGER NOT NULL,
    retention_instant    INTEGER NOT NULL,
    codec                TEXT NOT NULL,
    width                INTEGER NOT NULL,
    height               INTEGER NOT NULL,
    bitrate              INTEGER NOT NULL,
    fps                  INTEGER NOT NULL,
    recovered_from_disk  INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS recording_camera_time ON recording(camera_id, start_time);
CREATE INDEX IF NOT EXISTS recording_retention ON recording(status, protected, retention_instant);

CREATE TABLE IF NOT EXISTS system_config (
    key         TEXT PRIMARY KEY,
    value       TEXT NOT NULL,
    updated_by  TEXT NOT NULL,
    updated_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    at          INTEGER NOT NULL,
    level       TEXT NOT NULL,
    source      TEXT NOT NULL,
    camera_id   TEXT,
    principal   TEXT NOT NULL,
    message     TEXT NOT NULL
);
";
