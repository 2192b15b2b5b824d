// SPDX-License-Identifier: GPL-2.0-or-later

pub mod time;

pub use time::Duration;

use bytesize::{ByteSize, MB};
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, fmt, ops::Deref, str::FromStr, sync::Arc};
use thiserror::Error;

#[macro_export]
macro_rules! impl_deserialize_try_from_and_display {
    ($type:ident) => {
        impl<'de> serde::Deserialize<'de> for $type {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                String::deserialize(deserializer)?
                    .try_into()
                    .map_err(serde::de::Error::custom)
            }
        }

        impl std::fmt::Display for $type {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

pub const CAMERA_ID_MAX_LENGTH: usize = 24;

/// Immutable, hardware-derived serial of a camera (§3). Short, uppercase,
/// alphanumeric. Used as both the DB primary key and as a path component,
/// so it is validated strictly enough to be safe in either role.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct CameraId(String);
impl_deserialize_try_from_and_display!(CameraId);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseCameraIdError {
    #[error("empty string")]
    Empty,

    #[error("invalid characters: '{0}'")]
    InvalidChars(String),

    #[error("too long")]
    TooLong,

    #[error("not uppercase: '{0}'")]
    NotUppercase(String),
}

impl TryFrom<String> for CameraId {
    type Error = ParseCameraIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        use ParseCameraIdError::{Empty, InvalidChars, NotUppercase, TooLong};
        if s.is_empty() {
            return Err(Empty);
        }
        if s.len() > CAMERA_ID_MAX_LENGTH {
            return Err(TooLong);
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(InvalidChars(s));
        }
        if s.chars().any(char::is_lowercase) {
            return Err(NotUppercase(s));
        }
        Ok(Self(s))
    }
}

impl FromStr for CameraId {
    type Err = ParseCameraIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl Deref for CameraId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for CameraId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub const LOG_SOURCE_MAX_LENGTH: usize = 16;

#[repr(transparent)]
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct LogSource(Cow<'static, str>);
impl_deserialize_try_from_and_display!(LogSource);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseLogSourceError {
    #[error("empty string")]
    Empty,

    #[error("too long")]
    TooLong,
}

impl TryFrom<String> for LogSource {
    type Error = ParseLogSourceError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s.is_empty() {
            return Err(ParseLogSourceError::Empty);
        }
        if s.len() > LOG_SOURCE_MAX_LENGTH {
            return Err(ParseLogSourceError::TooLong);
        }
        Ok(Self(Cow::Owned(s)))
    }
}

impl TryFrom<&'static str> for LogSource {
    type Error = ParseLogSourceError;

    fn try_from(s: &'static str) -> Result<Self, Self::Error> {
        if s.is_empty() {
            return Err(ParseLogSourceError::Empty);
        }
        if s.len() > LOG_SOURCE_MAX_LENGTH {
            return Err(ParseLogSourceError::TooLong);
        }
        Ok(Self(Cow::Borrowed(s)))
    }
}

impl Deref for LogSource {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[repr(transparent)]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LogMessage(String);
impl_deserialize_try_from_and_display!(LogMessage);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseLogMessageError {
    #[error("empty string")]
    Empty,

    #[error("too long")]
    TooLong,
}

const LOG_MESSAGE_MAX_LENGTH: usize = 1024 * 4;

impl TryFrom<String> for LogMessage {
    type Error = ParseLogMessageError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s.is_empty() {
            return Err(ParseLogMessageError::Empty);
        }
        if s.len() > LOG_MESSAGE_MAX_LENGTH {
            return Err(ParseLogMessageError::TooLong);
        }
        Ok(Self(s))
    }
}

impl Deref for LogMessage {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Severity of a log/audit entry.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    #[must_use]
    pub fn as_u8(&self) -> u8 {
        match self {
            LogLevel::Error => 16,
            LogLevel::Warning => 24,
            LogLevel::Info => 32,
            LogLevel::Debug => 48,
        }
    }
}

#[derive(Debug, Error)]
pub enum ParseLogLevelError {
    #[error("unknown log level: '{0}'")]
    UnknownLevel(String),
}

impl FromStr for LogLevel {
    type Err = ParseLogLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error" => Ok(LogLevel::Error),
            "warning" => Ok(LogLevel::Warning),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            _ => Err(ParseLogLevelError::UnknownLevel(s.to_owned())),
        }
    }
}

/// The principal that performed a mutating action, recorded on every audit
/// entry (SPEC_FULL §C.1). The gateway supplies this; the core never
/// authenticates it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal(String);

impl Principal {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn system() -> Self {
        Self("system".to_owned())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One structured log/audit entry.
#[derive(Clone, Debug)]
pub struct LogEntry {
    pub level: LogLevel,
    pub source: LogSource,
    pub camera_id: Option<CameraId>,
    pub message: LogMessage,
}

impl LogEntry {
    #[must_use]
    pub fn new(level: LogLevel, source: &'static str, camera_id: Option<CameraId>, message: String) -> Self {
        let source: LogSource = source.try_into().expect("source should be valid");
        let message = match LogMessage::try_from(message) {
            Ok(v) => v,
            Err(e) => LogMessage::try_from(format!("bad message: {e}"))
                .expect("error message should be a valid log message"),
        };
        Self {
            level,
            source,
            camera_id,
            message,
        }
    }
}

pub type ArcLogger = Arc<dyn ILogger + Send + Sync>;

pub trait ILogger {
    fn log(&self, entry: LogEntry);
}

pub struct DummyLogger;

impl DummyLogger {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(DummyLogger {})
    }
}

impl ILogger for DummyLogger {
    fn log(&self, _: LogEntry) {}
}

/// A `ByteSize` that rejects zero, e.g. a disk-usage ceiling that would
/// otherwise make the whole store immediately over quota (§3 `maxStorageGB`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NonZeroGb(ByteSize);

impl NonZeroGb {
    #[must_use]
    pub fn new(size: ByteSize) -> Option<Self> {
        if size.0 == 0 {
            None
        } else {
            Some(Self(size))
        }
    }
}

impl Deref for NonZeroGb {
    type Target = ByteSize;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de> Deserialize<'de> for NonZeroGb {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Temp(f32);

        let temp = Temp::deserialize(deserializer)?;
        if temp.0 == 0.0 {
            return Err(serde::de::Error::custom("cannot be zero"));
        }
        #[allow(
            clippy::cast_sign_loss,
            clippy::cast_possible_truncation,
            clippy::as_conversions
        )]
        Ok(Self(ByteSize((temp.0 * 1000.0) as u64 * MB)))
    }
}

pub const ENCRYPTION_KEY_LEN: usize = 32;

/// Symmetric key used by `crypto::encrypt`/`decrypt` to store camera
/// passwords at rest. Parsed once from the env config's hex string.
#[derive(Clone)]
pub struct EncryptionKey([u8; ENCRYPTION_KEY_LEN]);

#[derive(Debug, Error)]
pub enum ParseEncryptionKeyError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("expected {ENCRYPTION_KEY_LEN} bytes, got {0}")]
    WrongLength(usize),
}

impl TryFrom<&str> for EncryptionKey {
    type Error = ParseEncryptionKeyError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let bytes = hex::decode(s)?;
        let len = bytes.len();
        let arr: [u8; ENCRYPTION_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| ParseEncryptionKeyError::WrongLength(len))?;
        Ok(Self(arr))
    }
}

impl AsRef<[u8]> for EncryptionKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey(..)")
    }
}

/// The error taxonomy from spec §7, surfaced to the external gateway.
/// Every crate-local error type eventually normalizes into one of these
/// kinds at the boundary where it is reported to a caller.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("store unavailable")]
    StoreUnavailable,

    #[error("spawn failed: {0}")]
    SpawnFailed(String),

    #[error("transcode failed: {0}")]
    TranscodeFailed(String),

    #[error("playlist wait timed out")]
    PlaylistTimeout,

    #[error("file missing on disk")]
    FileMissing,

    #[error("recording is protected")]
    ProtectedRecording,

    #[error("range not satisfiable")]
    RangeNotSatisfiable,
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("ABCD1234", true; "valid")]
    #[test_case("", false; "empty")]
    #[test_case("abcd1234", false; "lowercase")]
    #[test_case("AB-CD", false; "hyphen")]
    #[test_case("AAAAAAAAAAAAAAAAAAAAAAAAA", false; "too long")]
    fn test_camera_id(input: &str, valid: bool) {
        assert_eq!(CameraId::try_from(input.to_owned()).is_ok(), valid);
    }

    #[test]
    fn test_camera_id_display_roundtrip() {
        let id = CameraId::try_from("ABCD1234".to_owned()).unwrap();
        assert_eq!(id.to_string(), "ABCD1234");
    }

    #[test]
    fn test_non_zero_gb_rejects_zero() {
        assert!(NonZeroGb::new(ByteSize(0)).is_none());
        assert!(NonZeroGb::new(ByteSize(1)).is_some());
    }

    #[test]
    fn test_encryption_key_roundtrip() {
        let hex = "00".repeat(ENCRYPTION_KEY_LEN);
        let key = EncryptionKey::try_from(hex.as_str()).unwrap();
        assert_eq!(key.as_ref().len(), ENCRYPTION_KEY_LEN);
    }

    #[test]
    fn test_encryption_key_wrong_length() {
        assert!(EncryptionKey::try_from("00").is_err());
    }

    #[test]
    fn test_log_level_as_u8_matches_severity_order() {
        assert!(LogLevel::Error.as_u8() < LogLevel::Warning.as_u8());
        assert!(LogLevel::Warning.as_u8() < LogLevel::Info.as_u8());
        assert!(LogLevel::Info.as_u8() < LogLevel::Debug.as_u8());
    }
}
