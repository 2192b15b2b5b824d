// SPDX-License-Identifier: GPL-2.0-or-later

use crate::{MetaError, MetaStore};
use common::{time::UnixNano, CameraId};
use rusqlite::{params, OptionalExtension};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordingMode {
    Continuous,
    Off,
}

impl RecordingMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Continuous => "continuous",
            Self::Off => "off",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "off" => Self::Off,
            _ => Self::Continuous,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Online,
    Offline,
    Error,
}

impl ConnectionState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Error => "error",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "online" => Self::Online,
            "error" => Self::Error,
            _ => Self::Offline,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordingState {
    Recording,
    Stopped,
    Error,
}

impl RecordingState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Recording => "recording",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "recording" => Self::Recording,
            "error" => Self::Error,
            _ => Self::Stopped,
        }
    }
}

/// A camera row (§3). `encrypted_password` is the output of
/// `crypto::encrypt`; the store never decrypts it.
#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    pub id: CameraId,
    pub display_name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub encrypted_password: Vec<u8>,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate: u32,
    pub profile_name: String,
    pub compression_hint_enabled: bool,
    pub recording_mode: RecordingMode,
    pub retention_days: Option<u16>,
    pub active: bool,
    pub connection_state: ConnectionState,
    pub recording_state: RecordingState,
    pub last_seen: UnixNano,
    pub last_error: Option<String>,
}

/// Partial update applied by the supervisor after every connection attempt
/// (§4.3). Only the fields the supervisor actually observed are `Some`.
#[derive(Clone, Debug, Default)]
pub struct CameraStateDelta {
    pub connection_state: Option<ConnectionState>,
    pub recording_state: Option<RecordingState>,
    pub last_seen: Option<UnixNano>,
    pub last_error: Option<Option<String>>,
}

fn row_to_camera(row: &rusqlite::Row) -> rusqlite::Result<Camera> {
    let id: String = row.get("id")?;
    let recording_mode: String = row.get("recording_mode")?;
    let connection_state: String = row.get("connection_state")?;
    let recording_state: String = row.get("recording_state")?;
    let last_seen: i64 = row.get("last_seen")?;
    let port: i64 = row.get("port")?;
    Ok(Camera {
        id: CameraId::try_from(id).expect("stored camera id should be valid"),
        display_name: row.get("display_name")?,
        host: row.get("host")?,
        port: u16::try_from(port).unwrap_or(0),
        username: row.get("username")?,
        encrypted_password: row.get("encrypted_password")?,
        codec: row.get("codec")?,
        width: row.get("width")?,
        height: row.get("height")?,
        fps: row.get("fps")?,
        bitrate: row.get("bitrate")?,
        profile_name: row.get("profile_name")?,
        compression_hint_enabled: row.get("compression_hint_enabled")?,
        recording_mode: RecordingMode::parse(&recording_mode),
        retention_days: row
            .get::<_, Option<i64>>("retention_days")?
            .map(|v| u16::try_from(v).unwrap_or(u16::MAX)),
        active: row.get("active")?,
        connection_state: ConnectionState::parse(&connection_state),
        recording_state: RecordingState::parse(&recording_state),
        last_seen: UnixNano::from(last_seen),
        last_error: row.get("last_error")?,
    })
}

impl MetaStore {
    /// `camera.list({active?})` (§4.2). `hasTag` from the distilled spec has
    /// no backing field in the §3 data model, so it is not a filter here.
    pub async fn camera_list(&self, active: Option<bool>) -> Result<Vec<Camera>, MetaError> {
        self.call(move |conn| {
            let mut stmt = match active {
                Some(_) => conn.prepare("SELECT * FROM camera WHERE active = ?1 ORDER BY id")?,
                None => conn.prepare("SELECT * FROM camera ORDER BY id")?,
            };
            let rows = match active {
                Some(a) => stmt.query_map(params![a], row_to_camera)?.collect::<Result<Vec<_>, _>>(),
                None => stmt.query_map([], row_to_camera)?.collect::<Result<Vec<_>, _>>(),
            };
            rows
        })
        .await
    }

    pub async fn camera_get(&self, id: &CameraId) -> Result<Option<Camera>, MetaError> {
        let id = id.to_string();
        self.call(move |conn| {
            conn.query_row("SELECT * FROM camera WHERE id = ?1", params![id], row_to_camera)
                .optional()
        })
        .await
    }

    /// `camera.upsert(camera)` (§4.2): admin-authored fields and all
    /// supervisor-owned state fields in one write.
    pub async fn camera_upsert(&self, camera: Camera) -> Result<(), MetaError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO camera (
                    id, display_name, host, port, username, encrypted_password,
                    codec, width, height, fps, bitrate, profile_name,
                    compression_hint_enabled, recording_mode, retention_days,
                    active, connection_state, recording_state, last_seen, last_error
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20)
                ON CONFLICT(id) DO UPDATE SET
                    display_name = excluded.display_name,
                    host = excluded.host,
                    port = excluded.port,
                    username = excluded.username,
                    encrypted_password = excluded.encrypted_password,
                    codec = excluded.codec,
                    width = excluded.width,
                    height = excluded.height,
                    fps = excluded.fps,
                    bitrate = excluded.bitrate,
                    profile_name = excluded.profile_name,
                    compression_hint_enabled = excluded.compression_hint_enabled,
                    recording_mode = excluded.recording_mode,
                    retention_days = excluded.retention_days,
                    active = excluded.active",
                params![
                    camera.id.to_string(),
                    camera.display_name,
                    camera.host,
                    i64::from(camera.port),
                    camera.username,
                    camera.encrypted_password,
                    camera.codec,
                    camera.width,
                    camera.height,
                    camera.fps,
                    camera.bitrate,
                    camera.profile_name,
                    camera.compression_hint_enabled,
                    camera.recording_mode.as_str(),
                    camera.retention_days.map(i64::from),
                    camera.active,
                    camera.connection_state.as_str(),
                    camera.recording_state.as_str(),
                    *camera.last_seen,
                    camera.last_error,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// `camera.patchState(id, stateDelta)` (§4.2): supervisor-only write
    /// path, never touches admin-authored fields.
    pub async fn camera_patch_state(&self, id: &CameraId, delta: CameraStateDelta) -> Result<(), MetaError> {
        let id = id.to_string();
        self.call(move |conn| {
            if let Some(s) = delta.connection_state {
                conn.execute(
                    "UPDATE camera SET connection_state = ?1 WHERE id = ?2",
                    params![s.as_str(), id],
                )?;
            }
            if let Some(s) = delta.recording_state {
                conn.execute(
                    "UPDATE camera SET recording_state = ?1 WHERE id = ?2",
                    params![s.as_str(), id],
                )?;
            }
            if let Some(t) = delta.last_seen {
                conn.execute("UPDATE camera SET last_seen = ?1 WHERE id = ?2", params![*t, id])?;
            }
            if let Some(ref e) = delta.last_error {
                conn.execute("UPDATE camera SET last_error = ?1 WHERE id = ?2", params![e, id])?;
            }
            Ok(())
        })
        .await
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::MetaStore;
    use pretty_assertions::assert_eq;

    fn sample_camera() -> Camera {
        Camera {
            id: CameraId::try_from("ABCD1234".to_owned()).unwrap(),
            display_name: "Front door".to_owned(),
            host: "192.0.2.1".to_owned(),
            port: 554,
            username: "admin".to_owned(),
            encrypted_password: vec![1, 2, 3],
            codec: "h264".to_owned(),
            width: 1920,
            height: 1080,
            fps: 30,
            bitrate: 4000,
            profile_name: "main".to_owned(),
            compression_hint_enabled: true,
            recording_mode: RecordingMode::Continuous,
            retention_days: Some(30),
            active: true,
            connection_state: ConnectionState::Offline,
            recording_state: RecordingState::Stopped,
            last_seen: UnixNano::from(0),
            last_error: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_get_roundtrip() {
        let store = MetaStore::open_in_memory_for_test();
        let cam = sample_camera();
        store.camera_upsert(cam.clone()).await.unwrap();
        let got = store.camera_get(&cam.id).await.unwrap().unwrap();
        assert_eq!(got, cam);
    }

    #[tokio::test]
    async fn test_upsert_is_update_on_conflict() {
        let store = MetaStore::open_in_memory_for_test();
        let mut cam = sample_camera();
        store.camera_upsert(cam.clone()).await.unwrap();
        cam.display_name = "Back door".to_owned();
        store.camera_upsert(cam.clone()).await.unwrap();

        let all = store.camera_list(None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].display_name, "Back door");
    }

    #[tokio::test]
    async fn test_patch_state_leaves_admin_fields_untouched() {
        let store = MetaStore::open_in_memory_for_test();
        let cam = sample_camera();
        store.camera_upsert(cam.clone()).await.unwrap();

        store
            .camera_patch_state(
                &cam.id,
                CameraStateDelta {
                    connection_state: Some(ConnectionState::Online),
                    recording_state: Some(RecordingState::Recording),
                    last_seen: Some(UnixNano::from(42)),
                    last_error: None,
                },
            )
            .await
            .unwrap();

        let got = store.camera_get(&cam.id).await.unwrap().unwrap();
        assert_eq!(got.connection_state, ConnectionState::Online);
        assert_eq!(got.recording_state, RecordingState::Recording);
        assert_eq!(got.last_seen, UnixNano::from(42));
        assert_eq!(got.display_name, cam.display_name);
    }

    #[tokio::test]
    async fn test_list_filters_active() {
        let store = MetaStore::open_in_memory_for_test();
        let mut cam = sample_camera();
        store.camera_upsert(cam.clone()).await.unwrap();
        cam.id = CameraId::try_from("EFGH5678".to_owned()).unwrap();
        cam.active = false;
        store.camera_upsert(cam).await.unwrap();

        let active = store.camera_list(Some(true)).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id.to_string(), "ABCD1234");
    }
}
