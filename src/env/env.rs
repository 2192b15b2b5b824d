// SPDX-License-Identifier: GPL-2.0-or-later

mod system_config;

pub use system_config::{ParseSystemConfigError, SystemConfigKey, SystemConfigValue};

use bytesize::ByteSize;
use common::{EncryptionKey, NonZeroGb};
use serde::Deserialize;
use std::{
    collections::HashMap,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Process boot-time configuration: everything needed before the metadata
/// store can be opened (§3 on-disk layout, §4.1). Distinct from
/// `SystemConfig`, which is runtime-mutable and lives in the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvConf {
    port: u16,
    storage_dir: PathBuf,
    recordings_dir: PathBuf,
    live_dir: PathBuf,
    export_dir: PathBuf,
    config_dir: PathBuf,
    encryption_key_hex: String,
    max_disk_usage: NonZeroGb,
    raw: String,
}

#[derive(Debug, Deserialize)]
struct RawEnvConf {
    port: u16,
    storage_dir: PathBuf,
    config_dir: PathBuf,
    encryption_key: String,
    max_disk_usage: NonZeroGb,
}

impl EnvConf {
    pub fn new(config_path: &PathBuf) -> Result<EnvConf, EnvConfigNewError> {
        use EnvConfigNewError::{GetCwd, ReadFile};
        let file_exist = config_path.exists();
        if !file_exist {
            print!(
                "\n\nGenerating '{}' and exiting..\n\n\n",
                config_path.to_string_lossy()
            );

            let cwd = std::env::current_dir().map_err(GetCwd)?;
            generate_config(config_path, &cwd)?;
            std::process::exit(0);
        }

        let env_toml = fs::read_to_string(config_path).map_err(ReadFile)?;
        let env = parse_config(env_toml)?;

        Ok(env)
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    #[must_use]
    pub fn recordings_dir(&self) -> &Path {
        &self.recordings_dir
    }

    #[must_use]
    pub fn live_dir(&self) -> &Path {
        &self.live_dir
    }

    #[must_use]
    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    #[must_use]
    pub fn max_disk_usage(&self) -> ByteSize {
        *self.max_disk_usage
    }

    pub fn encryption_key(&self) -> Result<EncryptionKey, common::ParseEncryptionKeyError> {
        EncryptionKey::try_from(self.encryption_key_hex.as_str())
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

#[derive(Debug, Error)]
pub enum EnvConfigNewError {
    #[error("read env config file: {0}")]
    ReadFile(std::io::Error),

    #[error("generate env config: {0}")]
    Generate(#[from] GenerateEnvConfigError),

    #[error("parse env config: {0}")]
    Parse(#[from] ParseEnvConfigError),

    #[error("get current working directory: {0}")]
    GetCwd(std::io::Error),
}

#[derive(Debug, Error)]
pub enum GenerateEnvConfigError {
    #[error("create file: {0}")]
    CreateFile(std::io::Error),

    #[error("templater error: {0}")]
    AddTemplate(upon::Error),

    #[error("render template: {0}")]
    RenderTemplate(upon::Error),

    #[error("get parent directory")]
    GetParentDir(),

    #[error("create directory: {0}")]
    CreateDir(std::io::Error),

    #[error("write file: {0}")]
    WriteFile(std::io::Error),
}

fn generate_config(path: &Path, cwd: &Path) -> Result<(), GenerateEnvConfigError> {
    use GenerateEnvConfigError::{AddTemplate, CreateDir, CreateFile, GetParentDir, RenderTemplate, WriteFile};

    let data = HashMap::from([("cwd", cwd.to_string_lossy().into_owned())]);

    let mut engine = upon::Engine::new();
    engine
        .add_template("config", CONFIG_TEMPLATE)
        .map_err(AddTemplate)?;

    let config = engine
        .get_template("config")
        .expect("template should just have been added")
        .render(data)
        .to_string()
        .map_err(RenderTemplate)?;

    let config_dir = path.parent().ok_or(GetParentDir())?;
    fs::create_dir_all(config_dir).map_err(CreateDir)?;

    let mut file = File::create(path).map_err(CreateFile)?;
    write!(file, "{config}").map_err(WriteFile)?;

    Ok(())
}

const CONFIG_TEMPLATE: &str = include_str!("./default_config.tpl");

#[derive(Debug, Error)]
pub enum ParseEnvConfigError {
    #[error("{0}")]
    DeserializeToml(#[from] toml::de::Error),

    #[error("{0} path is not absolute '{1}'")]
    PathNotAbsolute(String, PathBuf),

    #[error("create storage dir: {0} {1}")]
    CreateStorageDir(PathBuf, std::io::Error),

    #[error("create recordings dir: {0} {1}")]
    CreateRecDir(PathBuf, std::io::Error),

    #[error("create live dir: {0} {1}")]
    CreateLiveDir(PathBuf, std::io::Error),

    #[error("create export dir: {0} {1}")]
    CreateExportDir(PathBuf, std::io::Error),

    #[error("canonicalize path: {0:?} {1}")]
    Canonicalize(PathBuf, std::io::Error),
}

/// Idempotently creates `<storage_dir>/recordings`, `<storage_dir>/live`,
/// `<storage_dir>/export` (§3 on-disk layout) and validates the config.
fn parse_config(env_toml: String) -> Result<EnvConf, ParseEnvConfigError> {
    use ParseEnvConfigError::{
        Canonicalize, CreateExportDir, CreateLiveDir, CreateRecDir, CreateStorageDir, PathNotAbsolute,
    };
    let mut raw: RawEnvConf = toml::from_str(&env_toml)?;

    // §6: STORAGE_PATH/ENCRYPTION_KEY in the environment win over the file,
    // so an operator can rotate either without editing the config on disk.
    if let Ok(storage_path) = std::env::var("STORAGE_PATH") {
        raw.storage_dir = PathBuf::from(storage_path);
    }
    if let Ok(encryption_key) = std::env::var("ENCRYPTION_KEY") {
        raw.encryption_key = encryption_key;
    }

    if !raw.storage_dir.is_absolute() {
        return Err(PathNotAbsolute("storage_dir".to_owned(), raw.storage_dir));
    }
    if !raw.config_dir.is_absolute() {
        return Err(PathNotAbsolute("config_dir".to_owned(), raw.config_dir));
    }

    std::fs::create_dir_all(&raw.storage_dir)
        .map_err(|e| CreateStorageDir(raw.storage_dir.clone(), e))?;
    let storage_dir = raw
        .storage_dir
        .canonicalize()
        .map_err(|e| Canonicalize(raw.storage_dir, e))?;

    let recordings_dir = storage_dir.join("recordings");
    std::fs::create_dir_all(&recordings_dir).map_err(|e| CreateRecDir(recordings_dir.clone(), e))?;
    let recordings_dir = recordings_dir
        .clone()
        .canonicalize()
        .map_err(|e| Canonicalize(recordings_dir, e))?;

    let live_dir = storage_dir.join("live");
    std::fs::create_dir_all(&live_dir).map_err(|e| CreateLiveDir(live_dir.clone(), e))?;
    let live_dir = live_dir.clone().canonicalize().map_err(|e| Canonicalize(live_dir, e))?;

    let export_dir = storage_dir.join("export");
    std::fs::create_dir_all(&export_dir).map_err(|e| CreateExportDir(export_dir.clone(), e))?;
    let export_dir = export_dir
        .clone()
        .canonicalize()
        .map_err(|e| Canonicalize(export_dir, e))?;

    std::fs::create_dir_all(&raw.config_dir).map_err(|e| CreateStorageDir(raw.config_dir.clone(), e))?;
    let config_dir = raw
        .config_dir
        .canonicalize()
        .map_err(|e| Canonicalize(raw.config_dir, e))?;

    Ok(EnvConf {
        port: raw.port,
        storage_dir,
        recordings_dir,
        live_dir,
        export_dir,
        config_dir,
        encryption_key_hex: raw.encryption_key,
        max_disk_usage: raw.max_disk_usage,
        raw: env_toml,
    })
}
