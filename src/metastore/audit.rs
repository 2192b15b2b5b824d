// SPDX-License-Identifier: GPL-2.0-or-later

use crate::{MetaError, MetaStore};
use common::{time::UnixNano, CameraId, LogLevel, LogMessage, LogSource};
use rusqlite::params;

/// One append-only `audit_log` row (§4.2, §C.1). Unlike [`common::LogEntry`]
/// this always carries the acting principal, since every write the audit
/// trail cares about was made by someone.
#[derive(Clone, Debug, PartialEq)]
pub struct AuditEntry {
    pub at: UnixNano,
    pub level: LogLevel,
    pub source: LogSource,
    pub camera_id: Option<CameraId>,
    pub principal: String,
    pub message: LogMessage,
}

fn level_as_str(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warning => "warning",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
    }
}

fn level_parse(s: &str) -> LogLevel {
    match s {
        "error" => LogLevel::Error,
        "warning" => LogLevel::Warning,
        "debug" => LogLevel::Debug,
        _ => LogLevel::Info,
    }
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<AuditEntry> {
    let at: i64 = row.get("at")?;
    let level: String = row.get("level")?;
    let source: String = row.get("source")?;
    let camera_id: Option<String> = row.get("camera_id")?;
    let message: String = row.get("message")?;
    Ok(AuditEntry {
        at: UnixNano::from(at),
        level: level_parse(&level),
        source: LogSource::try_from(source).expect("stored log source should be valid"),
        camera_id: camera_id.map(|id| CameraId::try_from(id).expect("stored camera id should be valid")),
        principal: row.get("principal")?,
        message: LogMessage::try_from(message).expect("stored log message should be valid"),
    })
}

impl MetaStore {
    /// `audit.append(entry)` (§4.2). The audit log is write-once: there is
    /// deliberately no update or delete path.
    pub async fn audit_append(&self, entry: AuditEntry) -> Result<(), MetaError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO audit_log (at, level, source, camera_id, principal, message)
                 VALUES (?1,?2,?3,?4,?5,?6)",
                params![
                    *entry.at,
                    level_as_str(entry.level),
                    entry.source.to_string(),
                    entry.camera_id.as_ref().map(ToString::to_string),
                    entry.principal,
                    entry.message.to_string(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// `audit.list({cameraId?, since?, limit})` (§4.2), newest first.
    pub async fn audit_list(
        &self,
        camera_id: Option<&CameraId>,
        since: Option<UnixNano>,
        limit: u32,
    ) -> Result<Vec<AuditEntry>, MetaError> {
        let camera_id = camera_id.map(ToString::to_string);
        let since = since.map(|t| *t);
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM audit_log
                 WHERE (?1 IS NULL OR camera_id = ?1)
                   AND (?2 IS NULL OR at >= ?2)
                 ORDER BY at DESC, id DESC
                 LIMIT ?3",
            )?;
            stmt.query_map(params![camera_id, since, limit], row_to_entry)?.collect()
        })
        .await
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(at: i64, camera_id: Option<&str>) -> AuditEntry {
        AuditEntry {
            at: UnixNano::from(at),
            level: LogLevel::Info,
            source: LogSource::try_from("api".to_owned()).unwrap(),
            camera_id: camera_id.map(|id| CameraId::try_from(id.to_owned()).unwrap()),
            principal: "admin".to_owned(),
            message: LogMessage::try_from("camera updated".to_owned()).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_append_list_roundtrip() {
        let store = MetaStore::open_in_memory_for_test();
        store.audit_append(entry(1, Some("ABCD1234"))).await.unwrap();
        store.audit_append(entry(2, None)).await.unwrap();

        let all = store.audit_list(None, None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        // newest first
        assert_eq!(all[0].at, UnixNano::from(2));
        assert_eq!(all[1].at, UnixNano::from(1));
    }

    #[tokio::test]
    async fn test_list_filters_by_camera_and_since() {
        let store = MetaStore::open_in_memory_for_test();
        store.audit_append(entry(1, Some("ABCD1234"))).await.unwrap();
        store.audit_append(entry(2, Some("EFGH5678"))).await.unwrap();
        store.audit_append(entry(3, Some("ABCD1234"))).await.unwrap();

        let cam = CameraId::try_from("ABCD1234".to_owned()).unwrap();
        let filtered = store.audit_list(Some(&cam), None, 10).await.unwrap();
        assert_eq!(filtered.len(), 2);

        let since = store.audit_list(None, Some(UnixNano::from(2)), 10).await.unwrap();
        assert_eq!(since.len(), 2);
    }
}
