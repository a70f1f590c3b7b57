//! Audio Switch - Library
//!
//! Preferred audio output selection and mute toggle.
//!
//! ## Features
//!
//! - Tracks the render endpoints currently plugged in
//! - Pinned devices survive being unplugged and restarts
//! - Mute control follows the selected device only
//! - Reacts to hot-plug and external mute changes

pub mod app;
pub mod audio;
pub mod config;
pub mod platform;

pub use app::{AppContext, Command, CommandError, Outcome};
pub use audio::{
    create_update_channel, AudioError, AudioService, AudioState, ChannelSink, DeviceInfo,
    NullSink, SaveState, StateSink, StateUpdate, AUDIO_DEVICE_UPDATE,
};
pub use config::{AppConfig, ConfigError};
pub use platform::{default_backend, SaveFile};

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over [`config::DEFAULT_LOG_FILTER`]. Does nothing if a
/// subscriber is already installed.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config::DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
