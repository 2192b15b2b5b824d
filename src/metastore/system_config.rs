// SPDX-License-Identifier: GPL-2.0-or-later

use crate::{MetaError, MetaStore};
use common::time::UnixNano;
use env::{ParseSystemConfigError, SystemConfigKey, SystemConfigValue};
use rusqlite::{params, OptionalExtension};

/// A persisted `system_config` row (§3): the validated value plus who set
/// it and when, for the audit trail.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigEntry {
    pub value: SystemConfigValue,
    pub updated_by: String,
    pub updated_at: UnixNano,
}

impl MetaStore {
    /// `config.get(key)` (§4.2). Returns `None` if the key was never set —
    /// callers fall back to their own documented defaults.
    pub async fn config_get(&self, key: SystemConfigKey) -> Result<Option<ConfigEntry>, MetaError> {
        self.call(move |conn| {
            conn.query_row(
                "SELECT value, updated_by, updated_at FROM system_config WHERE key = ?1",
                params![key.as_str()],
                |row| {
                    let value: String = row.get(0)?;
                    let updated_by: String = row.get(1)?;
                    let updated_at: i64 = row.get(2)?;
                    Ok((value, updated_by, updated_at))
                },
            )
            .optional()
        })
        .await
        .map(|row| {
            row.map(|(value, updated_by, updated_at)| ConfigEntry {
                value: SystemConfigValue::parse(key, &value).unwrap_or_else(|_| {
                    // A value that fails re-validation on read means it was
                    // written by an older, looser version of this store.
                    // Surface it verbatim rather than losing the row.
                    SystemConfigValue::StoragePath(value.into())
                }),
                updated_by,
                updated_at: UnixNano::from(updated_at),
            })
        })
    }

    /// `config.set(key, value, principal)` (§4.2): validates via
    /// [`SystemConfigValue::parse`] before the caller ever reaches here —
    /// this just persists the already-validated value.
    pub async fn config_set(&self, value: SystemConfigValue, updated_by: String, now: UnixNano) -> Result<(), MetaError> {
        let key = value.key();
        let raw = value.to_raw();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO system_config (key, value, updated_by, updated_at)
                 VALUES (?1,?2,?3,?4)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_by = excluded.updated_by,
                    updated_at = excluded.updated_at",
                params![key.as_str(), raw, updated_by, *now],
            )?;
            Ok(())
        })
        .await
    }

    /// Parses and validates `raw` for `key`, then persists it. Convenience
    /// wrapper over [`SystemConfigValue::parse`] + [`MetaStore::config_set`]
    /// for callers that only have the wire-format string (§4.2).
    pub async fn config_set_raw(
        &self,
        key: SystemConfigKey,
        raw: &str,
        updated_by: String,
        now: UnixNano,
    ) -> Result<(), ConfigSetError> {
        let value = SystemConfigValue::parse(key, raw)?;
        self.config_set(value, updated_by, now).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigSetError {
    #[error(transparent)]
    Validation(#[from] ParseSystemConfigError),

    #[error(transparent)]
    Store(#[from] MetaError),
}
