// SPDX-License-Identifier: GPL-2.0-or-later

//! Persisted log storage. Entries are appended as one line per file under
//! `<root>/logs/`, rotated daily by wall-clock date, and queried back by
//! scanning files newest-first. There is no end-user log viewer in scope
//! here, so a plain append-only text format is enough and is trivial to
//! inspect with standard tools.
//!
//! Line format: `at_nanos\tlevel\tsource\tcamera_id\tmessage`, with `\t`,
//! `\n` and `\r` in `message` escaped so every record stays one line.

use common::{time::UnixNano, CameraId, LogLevel, LogSource};
use fs::FsError;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::{
    fs::OpenOptions,
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
};

#[derive(Debug, Error)]
pub enum LogDbError {
    #[error("open log file {0:?}: {1}")]
    Open(PathBuf, std::io::Error),

    #[error("write log file {0:?}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("read log file {0:?}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error("list log directory {0:?}: {1}")]
    ListDir(PathBuf, std::io::Error),
}

/// Filter for [`LogDb::query`]. `None` fields mean "don't filter on this".
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub camera_id: Option<CameraId>,
    pub level: Option<LogLevel>,
    pub since: Option<UnixNano>,
    pub limit: usize,
}

/// Persisted, queryable record of every [`crate::LogEntryWithTime`] the
/// application has emitted. Doubles as the audit trail (SPEC_FULL §C.1)
/// when the source is `"audit"` and the message embeds the acting
/// principal — callers decide that convention, this type just stores lines.
pub struct LogDb {
    dir: PathBuf,
}

impl LogDb {
    /// `dir` is `<root>/logs/`; created lazily on first write.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Appends one entry to today's log file (UTC date of `at`).
    pub async fn append(
        &self,
        at: UnixNano,
        level: LogLevel,
        source: &LogSource,
        camera_id: Option<&CameraId>,
        message: &str,
    ) -> Result<(), LogDbError> {
        fs::ensure_dir(&self.dir).await?;
        let path = self.file_for(at);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| LogDbError::Open(path.clone(), e))?;

        let line = format!(
            "{}\t{}\t{}\t{}\t{}\n",
            *at,
            level_tag(level),
            source,
            camera_id.map(CameraId::to_string).unwrap_or_default(),
            escape(message),
        );
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| LogDbError::Write(path, e))
    }

    /// Returns matching entries newest-first, up to `query.limit` (0 means
    /// unlimited). Scans day-files from today backwards, stopping once a
    /// whole file's entries are older than `query.since`.
    pub async fn query(&self, query: &LogQuery) -> Result<Vec<PersistedLogEntry>, LogDbError> {
        let mut files = self.day_files().await?;
        files.sort_unstable_by(|a, b| b.cmp(a));

        let mut out = Vec::new();
        for path in files {
            let mut lines = Vec::new();
            let file = match tokio::fs::File::open(&path).await {
                Ok(f) => f,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(LogDbError::Read(path.clone(), e)),
            };
            let mut reader = BufReader::new(file).lines();
            while let Some(line) = reader
                .next_line()
                .await
                .map_err(|e| LogDbError::Read(path.clone(), e))?
            {
                lines.push(line);
            }

            for line in lines.into_iter().rev() {
                let Some(entry) = parse_line(&line) else {
                    continue;
                };
                if let Some(since) = query.since {
                    if entry.at.before(since) {
                        continue;
                    }
                }
                if let Some(level) = query.level {
                    if entry.level != level {
                        continue;
                    }
                }
                if let Some(id) = &query.camera_id {
                    if entry.camera_id.as_ref() != Some(id) {
                        continue;
                    }
                }
                out.push(entry);
                if query.limit != 0 && out.len() >= query.limit {
                    return Ok(out);
                }
            }
        }
        Ok(out)
    }

    fn file_for(&self, at: UnixNano) -> PathBuf {
        let date = at.as_chrono().map_or_else(|| "unknown".to_owned(), |dt| dt.format("%Y-%m-%d").to_string());
        self.dir.join(format!("{date}.log"))
    }

    async fn day_files(&self) -> Result<Vec<PathBuf>, LogDbError> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(LogDbError::ListDir(self.dir.clone(), e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| LogDbError::ListDir(self.dir.clone(), e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("log") {
                out.push(path);
            }
        }
        Ok(out)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistedLogEntry {
    pub at: UnixNano,
    pub level: LogLevel,
    pub source: String,
    pub camera_id: Option<CameraId>,
    pub message: String,
}

fn level_tag(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warning => "warning",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
    }
}

fn parse_level(s: &str) -> Option<LogLevel> {
    match s {
        "error" => Some(LogLevel::Error),
        "warning" => Some(LogLevel::Warning),
        "info" => Some(LogLevel::Info),
        "debug" => Some(LogLevel::Debug),
        _ => None,
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\t', "\\t").replace('\n', "\\n").replace('\r', "\\r")
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('t') => out.push('\t'),
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('\\') => out.push('\\'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn parse_line(line: &str) -> Option<PersistedLogEntry> {
    let mut parts = line.splitn(5, '\t');
    let at = parts.next()?.parse::<i64>().ok()?;
    let level = parse_level(parts.next()?)?;
    let source = parts.next()?.to_owned();
    let camera_id_raw = parts.next()?;
    let message = unescape(parts.next()?);
    let camera_id = if camera_id_raw.is_empty() {
        None
    } else {
        CameraId::try_from(camera_id_raw.to_owned()).ok()
    };
    Some(PersistedLogEntry {
        at: UnixNano::from(at),
        level,
        source,
        camera_id,
        message,
    })
}

/// Not a real filesystem path type, just documents intent at the call site
/// in [`LogDb::file_for`].
pub fn logs_dir(root: &Path) -> PathBuf {
    root.join("logs")
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn source() -> LogSource {
        "ingest".try_into().unwrap()
    }

    #[tokio::test]
    async fn test_append_and_query_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let db = LogDb::new(tmp.path().join("logs"));
        let id = CameraId::try_from("ABCD1234".to_owned()).unwrap();

        db.append(UnixNano::from(1), LogLevel::Info, &source(), Some(&id), "hello\tworld")
            .await
            .unwrap();
        db.append(UnixNano::from(2), LogLevel::Error, &source(), None, "oops")
            .await
            .unwrap();

        let got = db.query(&LogQuery::default()).await.unwrap();
        assert_eq!(got.len(), 2);
        // newest first
        assert_eq!(got[0].message, "oops");
        assert_eq!(got[1].message, "hello\tworld");
        assert_eq!(got[1].camera_id, Some(id));
    }

    #[tokio::test]
    async fn test_query_filters_by_camera_and_level() {
        let tmp = tempfile::tempdir().unwrap();
        let db = LogDb::new(tmp.path().join("logs"));
        let a = CameraId::try_from("AAAA1111".to_owned()).unwrap();
        let b = CameraId::try_from("BBBB2222".to_owned()).unwrap();

        db.append(UnixNano::from(1), LogLevel::Info, &source(), Some(&a), "a-info").await.unwrap();
        db.append(UnixNano::from(2), LogLevel::Error, &source(), Some(&a), "a-error").await.unwrap();
        db.append(UnixNano::from(3), LogLevel::Info, &source(), Some(&b), "b-info").await.unwrap();

        let got = db
            .query(&LogQuery {
                camera_id: Some(a.clone()),
                level: Some(LogLevel::Error),
                since: None,
                limit: 0,
            })
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].message, "a-error");
    }

    #[tokio::test]
    async fn test_query_respects_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let db = LogDb::new(tmp.path().join("logs"));
        for i in 1..=5i64 {
            db.append(UnixNano::from(i), LogLevel::Debug, &source(), None, &i.to_string())
                .await
                .unwrap();
        }
        let got = db.query(&LogQuery { limit: 2, ..Default::default() }).await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].message, "5");
        assert_eq!(got[1].message, "4");
    }

    #[tokio::test]
    async fn test_query_empty_dir_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let db = LogDb::new(tmp.path().join("logs"));
        let got = db.query(&LogQuery::default()).await.unwrap();
        assert!(got.is_empty());
    }
}
