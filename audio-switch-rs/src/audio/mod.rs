//! Audio output selection and mute control.
//!
//! The [`AudioService`] tracks the render endpoints reported by an
//! [`AudioBackend`], keeps the user's pinned devices and selection, and
//! holds mute control of the selected device only.

pub mod backend;
pub mod device;
pub mod error;
pub mod notifications;
pub mod service;
pub mod state;

#[cfg(test)]
pub(crate) mod fake;

#[cfg(windows)]
pub mod wasapi;

pub use backend::{AudioBackend, Endpoint, EndpointHandle, MuteControl, MuteSubscription};
pub use device::Device;
pub use error::{AudioError, BackendError};
pub use notifications::{CallbackStatus, NotificationBridge};
pub use service::AudioService;
pub use state::{
    create_update_channel, AudioState, ChannelSink, DeviceInfo, NullSink, SaveState, StateSink,
    StateUpdate, AUDIO_DEVICE_UPDATE,
};
