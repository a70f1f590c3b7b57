//! Application context and command handling.
//!
//! Wires configuration, backend and state sink into an [`AudioService`] and
//! maps text commands onto service operations.

use crate::audio::{AudioBackend, AudioError, AudioService, AudioState, StateSink};
use crate::config::{AppConfig, ConfigError};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// A user command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    State,
    Select(String),
    Pref(String),
    Mute,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("'{0}' needs a device id")]
    MissingDevice(&'static str),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let device = |name: &'static str| {
            if rest.is_empty() {
                Err(CommandError::MissingDevice(name))
            } else {
                Ok(rest.to_string())
            }
        };

        match word {
            "" => Err(CommandError::Empty),
            "state" => Ok(Command::State),
            "select" => device("select").map(Command::Select),
            "pref" => device("pref").map(Command::Pref),
            "mute" => Ok(Command::Mute),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

/// What a command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    State(AudioState),
    Done,
    Quit,
}

/// Everything the application needs, passed explicitly.
pub struct AppContext {
    config: AppConfig,
    service: AudioService,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        backend: Box<dyn AudioBackend>,
        sink: Arc<dyn StateSink>,
    ) -> Result<Self, ConfigError> {
        config.ensure_dirs()?;
        let service = AudioService::new(backend, config.save_file(), sink);
        Ok(Self { config, service })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn service(&self) -> &AudioService {
        &self.service
    }

    pub fn execute(&self, command: &Command) -> Result<Outcome, AudioError> {
        match command {
            Command::State => self.service.get_state().map(Outcome::State),
            Command::Select(id) => self.service.set_device(id).map(|()| Outcome::Done),
            Command::Pref(id) => self.service.toggle_preference(id).map(|()| Outcome::Done),
            Command::Mute => self.service.toggle_mute().map(|()| Outcome::Done),
            Command::Quit => Ok(Outcome::Quit),
        }
    }
}
