// SPDX-License-Identifier: GPL-2.0-or-later

//! Structured application logging (SPEC_FULL §B). `Logger` is the live feed
//! (teacher's broadcast-channel shape, `MonitorId` swapped for
//! `CameraId`); [`log_db`] persists the same entries to rotating
//! text files under `<root>/logs/`, doubling as the `AuditLog` entity from
//! spec §2 when the caller supplies a principal.

pub mod log_db;

use common::{time::UnixNano, CameraId, ILogger, LogEntry, LogLevel, LogSource};
use std::fmt;
use tokio::sync::broadcast;

/// A [`LogEntry`] with the timestamp applied at the moment it was logged.
#[derive(Clone, Debug)]
pub struct LogEntryWithTime {
    pub at: UnixNano,
    pub level: LogLevel,
    pub source: LogSource,
    pub camera_id: Option<CameraId>,
    pub message: String,
}

impl fmt::Display for LogEntryWithTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            LogLevel::Error => "ERR",
            LogLevel::Warning => "WRN",
            LogLevel::Info => "INF",
            LogLevel::Debug => "DBG",
        };
        match &self.camera_id {
            Some(id) => write!(f, "[{level}] {} {id}: {}", self.source, self.message),
            None => write!(f, "[{level}] {}: {}", self.source, self.message),
        }
    }
}

/// Live application log feed used everywhere across the core. Every
/// `ILogger::log` call is broadcast to subscribers and printed to stdout;
/// nothing here touches disk — that is [`log_db::LogDb`]'s job.
pub struct Logger {
    feed: broadcast::Sender<LogEntryWithTime>,
}

impl Logger {
    #[must_use]
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(256);
        Self { feed }
    }

    /// Subscribes to the log feed and returns a channel that receives every
    /// entry logged from this point on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntryWithTime> {
        self.feed.subscribe()
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl ILogger for Logger {
    fn log(&self, entry: LogEntry) {
        let entry = LogEntryWithTime {
            at: UnixNano::now(),
            level: entry.level,
            source: entry.source,
            camera_id: entry.camera_id,
            message: entry.message.to_string(),
        };
        println!("{entry}");
        // Only errors if nobody is currently subscribed; not our problem.
        self.feed.send(entry).ok();
    }
}
