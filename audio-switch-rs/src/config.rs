//! Application configuration.
//!
//! Resolves where the save file lives. `AUDIO_SWITCH_SAVE_DIR` overrides the
//! per-user config directory.

use crate::platform::SaveFile;
use directories::ProjectDirs;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable overriding the save directory.
pub const SAVE_DIR_ENV: &str = "AUDIO_SWITCH_SAVE_DIR";

/// Log filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "audio_switch=info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("Failed to create {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    save_dir: PathBuf,
}

impl AppConfig {
    /// Resolve the configuration from the environment.
    pub fn resolve() -> Result<Self, ConfigError> {
        Self::from_override(std::env::var_os(SAVE_DIR_ENV))
    }

    /// Configuration saving into `dir`.
    pub fn with_save_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            save_dir: dir.into(),
        }
    }

    fn from_override(save_dir: Option<OsString>) -> Result<Self, ConfigError> {
        if let Some(dir) = save_dir.filter(|d| !d.is_empty()) {
            return Ok(Self::with_save_dir(dir));
        }

        let project_dirs =
            ProjectDirs::from("", "Nixpare", "AudioSwitch").ok_or(ConfigError::NoConfigDir)?;
        Ok(Self::with_save_dir(project_dirs.config_dir()))
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    pub fn save_file(&self) -> SaveFile {
        SaveFile::in_dir(&self.save_dir)
    }

    /// Create the save directory if needed.
    pub fn ensure_dirs(&self) -> Result<(), ConfigError> {
        fs::create_dir_all(&self.save_dir).map_err(|source| ConfigError::Io {
            path: self.save_dir.clone(),
            source,
        })
    }
}
