// SPDX-License-Identifier: GPL-2.0-or-later

use std::{path::PathBuf, str::FromStr};
use thiserror::Error;

/// Recognized `SystemConfig` keys (§3). The gateway refuses unknown keys;
/// this is the closed set the store's `config.set` validates against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SystemConfigKey {
    RetentionDays,
    MaxStorageGb,
    MaxStoragePercent,
    StoragePath,
}

impl SystemConfigKey {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetentionDays => "retentionDays",
            Self::MaxStorageGb => "maxStorageGB",
            Self::MaxStoragePercent => "maxStoragePercent",
            Self::StoragePath => "storagePath",
        }
    }
}

impl std::fmt::Display for SystemConfigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognized system config key: '{0}'")]
pub struct UnknownSystemConfigKey(String);

impl FromStr for SystemConfigKey {
    type Err = UnknownSystemConfigKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retentionDays" => Ok(Self::RetentionDays),
            "maxStorageGB" => Ok(Self::MaxStorageGb),
            "maxStoragePercent" => Ok(Self::MaxStoragePercent),
            "storagePath" => Ok(Self::StoragePath),
            _ => Err(UnknownSystemConfigKey(s.to_owned())),
        }
    }
}

/// Default `maxStoragePercent` absent an explicit operator override (§3).
pub const DEFAULT_MAX_STORAGE_PERCENT: u8 = 90;

/// A validated `SystemConfig` value, domain-checked per §3's table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SystemConfigValue {
    RetentionDays(u16),
    MaxStorageGb(Option<u64>),
    MaxStoragePercent(u8),
    StoragePath(PathBuf),
}

impl SystemConfigValue {
    #[must_use]
    pub fn key(&self) -> SystemConfigKey {
        match self {
            Self::RetentionDays(_) => SystemConfigKey::RetentionDays,
            Self::MaxStorageGb(_) => SystemConfigKey::MaxStorageGb,
            Self::MaxStoragePercent(_) => SystemConfigKey::MaxStoragePercent,
            Self::StoragePath(_) => SystemConfigKey::StoragePath,
        }
    }

    /// Parses and range-validates `raw` for `key`, matching the domains in
    /// spec §3's `SystemConfig` table.
    pub fn parse(key: SystemConfigKey, raw: &str) -> Result<Self, ParseSystemConfigError> {
        use ParseSystemConfigError::{NotAnInteger, OutOfRange};
        match key {
            SystemConfigKey::RetentionDays => {
                let days: u16 = raw.parse().map_err(|_| NotAnInteger(raw.to_owned()))?;
                if !(1..=3650).contains(&days) {
                    return Err(OutOfRange(key, raw.to_owned()));
                }
                Ok(Self::RetentionDays(days))
            }
            SystemConfigKey::MaxStorageGb => {
                if raw.is_empty() || raw.eq_ignore_ascii_case("null") {
                    return Ok(Self::MaxStorageGb(None));
                }
                let gb: u64 = raw.parse().map_err(|_| NotAnInteger(raw.to_owned()))?;
                Ok(Self::MaxStorageGb(Some(gb)))
            }
            SystemConfigKey::MaxStoragePercent => {
                let percent: u8 = raw.parse().map_err(|_| NotAnInteger(raw.to_owned()))?;
                if !(50..=99).contains(&percent) {
                    return Err(OutOfRange(key, raw.to_owned()));
                }
                Ok(Self::MaxStoragePercent(percent))
            }
            SystemConfigKey::StoragePath => Ok(Self::StoragePath(PathBuf::from(raw))),
        }
    }

    #[must_use]
    pub fn to_raw(&self) -> String {
        match self {
            Self::RetentionDays(v) => v.to_string(),
            Self::MaxStorageGb(Some(v)) => v.to_string(),
            Self::MaxStorageGb(None) => String::new(),
            Self::MaxStoragePercent(v) => v.to_string(),
            Self::StoragePath(p) => p.to_string_lossy().into_owned(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseSystemConfigError {
    #[error("'{0}' is not an integer")]
    NotAnInteger(String),

    #[error("'{1}' is out of range for {0}")]
    OutOfRange(SystemConfigKey, String),
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("retentionDays", "30", true; "retention ok")]
    #[test_case("retentionDays", "0", false; "retention too low")]
    #[test_case("retentionDays", "3651", false; "retention too high")]
    #[test_case("maxStoragePercent", "90", true; "percent ok")]
    #[test_case("maxStoragePercent", "49", false; "percent too low")]
    #[test_case("maxStoragePercent", "100", false; "percent too high")]
    #[test_case("maxStorageGB", "", true; "storage gb null")]
    #[test_case("maxStorageGB", "500", true; "storage gb set")]
    fn test_parse(key: &str, raw: &str, ok: bool) {
        let key: SystemConfigKey = key.parse().unwrap();
        assert_eq!(SystemConfigValue::parse(key, raw).is_ok(), ok);
    }

    #[test]
    fn test_unknown_key() {
        assert!("bogusKey".parse::<SystemConfigKey>().is_err());
    }
}
