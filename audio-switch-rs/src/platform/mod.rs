//! Platform integration: backend selection and the save file.

pub mod persistence;

pub use persistence::{SaveFile, SAVE_FILE_NAME};

use crate::audio::{AudioBackend, AudioError};

/// The native audio backend of this platform.
#[cfg(windows)]
pub fn default_backend() -> Result<Box<dyn AudioBackend>, AudioError> {
    Ok(Box::new(crate::audio::wasapi::WasapiBackend::new()))
}

/// The native audio backend of this platform.
#[cfg(not(windows))]
pub fn default_backend() -> Result<Box<dyn AudioBackend>, AudioError> {
    Err(AudioError::BackendInit(crate::audio::BackendError::new(
        crate::audio::BackendError::E_FAIL,
        "no audio backend for this platform",
    )))
}
