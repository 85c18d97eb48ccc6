// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Read and deserialize a config file without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let config: RawConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Load a config file and validate it into a typed [`ConfigFile`].
///
/// A missing file at the default location is not an error: every setting
/// has a default, so the engine runs on defaults alone.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    if !path.exists() && path == default_config_path() {
        debug!(path = %path.display(), "no config file found; using defaults");
        return ConfigFile::try_from(RawConfigFile::default());
    }
    let raw_config = load_from_path(path)?;
    ConfigFile::try_from(raw_config)
}

/// Config file looked up when `--config` is not given.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("jobrecon.toml")
}
