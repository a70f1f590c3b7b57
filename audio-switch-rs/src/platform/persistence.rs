//! Save file for the selection state.
//!
//! The state is stored as pretty-printed JSON. A missing or empty file is a
//! fresh state, not an error.

use crate::audio::{AudioError, SaveState};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the save file inside the save directory.
pub const SAVE_FILE_NAME: &str = "audio_save.json";

/// JSON save file holding a [`SaveState`].
#[derive(Debug, Clone)]
pub struct SaveFile {
    path: PathBuf,
}

impl SaveFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Save file inside `dir`, named [`SAVE_FILE_NAME`].
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(SAVE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state.
    pub fn load(&self) -> Result<SaveState, AudioError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no save file, starting fresh");
                return Ok(SaveState::default());
            }
            Err(err) => return Err(self.io_error(err)),
        };

        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(SaveState::default());
        }

        serde_json::from_slice(&data).map_err(AudioError::SaveLoad)
    }

    /// Write `state`, replacing the previous contents.
    pub fn store(&self, state: &SaveState) -> Result<(), AudioError> {
        let data = serde_json::to_string_pretty(state).map_err(AudioError::SaveStore)?;

        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|err| self.io_error(err))?;
        }
        fs::write(&self.path, data).map_err(|err| self.io_error(err))?;

        debug!(path = %self.path.display(), "save file written");
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> AudioError {
        AudioError::PersistenceIo {
            path: self.path.clone(),
            source,
        }
    }
}
