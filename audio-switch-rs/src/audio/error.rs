//! Audio service error types.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A failure reported by the platform audio backend.
///
/// `code` carries the native status (an HRESULT on Windows).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub code: i32,
    pub message: String,
}

impl BackendError {
    /// Generic failure status, `E_FAIL` on Windows.
    pub const E_FAIL: i32 = 0x8000_4005_u32 as i32;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.code as u32)?;
        if !self.message.is_empty() {
            write!(f, " ({})", self.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for BackendError {}

#[cfg(windows)]
impl From<windows::core::Error> for BackendError {
    fn from(err: windows::core::Error) -> Self {
        Self {
            code: err.code().0,
            message: err.message().to_string(),
        }
    }
}

/// Audio service error types.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Audio service not running")]
    NotRunning,

    #[error("Device not found: {device_id}")]
    DeviceNotFound { device_id: String },

    #[error("Audio backend init failed: {0}")]
    BackendInit(#[source] BackendError),

    #[error("Audio backend call '{call}' failed: {source}")]
    BackendCall {
        call: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("Device {device_id}: {step} failed: {source}")]
    Activation {
        device_id: String,
        step: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("Save data decode failed: {0}")]
    SaveLoad(#[source] serde_json::Error),

    #[error("Save data encode failed: {0}")]
    SaveStore(#[source] serde_json::Error),

    #[error("Save file {}: {source}", .path.display())]
    PersistenceIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}", join_errors(.0))]
    Teardown(Vec<AudioError>),
}

fn join_errors(errors: &[AudioError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl AudioError {
    /// Folds teardown errors into a single result.
    pub(crate) fn from_teardown(mut errors: Vec<AudioError>) -> Result<(), AudioError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(AudioError::Teardown(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_display_includes_status() {
        let err = BackendError::new(BackendError::E_FAIL, "Unspecified error");
        assert_eq!(err.to_string(), "0x80004005 (Unspecified error)");
    }

    #[test]
    fn teardown_keeps_single_error_unwrapped() {
        let result = AudioError::from_teardown(vec![AudioError::NotRunning]);
        assert!(matches!(result, Err(AudioError::NotRunning)));
        assert!(AudioError::from_teardown(Vec::new()).is_ok());
    }

    #[test]
    fn teardown_joins_multiple_errors() {
        let err = AudioError::from_teardown(vec![
            AudioError::NotRunning,
            AudioError::DeviceNotFound {
                device_id: "A".to_string(),
            },
        ])
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Audio service not running; Device not found: A"
        );
    }
}
