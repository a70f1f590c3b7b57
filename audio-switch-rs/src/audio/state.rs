//! Audio state data models.
//!
//! Defines the persisted selection state, the snapshot handed to the
//! presentation layer, and the sinks that receive state updates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::mpsc::{Receiver, Sender};

/// Event name of every state notification sent to the presentation layer.
pub const AUDIO_DEVICE_UPDATE: &str = "audio-device-update";

/// Identity of an endpoint as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Backend endpoint ID (opaque string from IMMDevice::GetId)
    pub id: String,

    /// Friendly name at the time it was last seen
    pub name: String,
}

impl DeviceInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// The persisted subset of the service state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveState {
    /// Pinned devices, kept regardless of whether they are plugged in
    pub prefs: BTreeMap<String, DeviceInfo>,

    /// The chosen device. May name a device that is not present.
    pub selected: String,

    /// Last known mute flag of the selected device
    pub muted: bool,
}

impl SaveState {
    /// Pin a device under its current name.
    pub fn pin(&mut self, device: DeviceInfo) {
        self.prefs.insert(device.id.clone(), device);
    }
}

/// Full snapshot of the service state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioState {
    /// Devices present at the last enumeration
    pub devices: BTreeMap<String, DeviceInfo>,

    pub prefs: BTreeMap<String, DeviceInfo>,

    pub selected: String,

    pub muted: bool,
}

impl AudioState {
    /// The selected device if it is currently present.
    pub fn selected_device(&self) -> Option<&DeviceInfo> {
        self.devices.get(&self.selected)
    }

    /// Display name of the selection, falling back to the pinned name.
    pub fn selected_name(&self) -> Option<&str> {
        self.selected_device()
            .or_else(|| self.prefs.get(&self.selected))
            .map(|d| d.name.as_str())
    }
}

/// Receiver of state notifications.
///
/// Called with the service lock held; implementations must not call back
/// into the service.
pub trait StateSink: Send + Sync {
    fn emit(&self, event: &str, state: &AudioState);
}

/// Sink that drops every notification.
#[derive(Debug, Default)]
pub struct NullSink;

impl StateSink for NullSink {
    fn emit(&self, _event: &str, _state: &AudioState) {}
}

/// A state notification as delivered over a channel.
#[derive(Debug, Clone)]
pub struct StateUpdate {
    pub event: String,
    pub state: AudioState,
}

/// Sink that forwards notifications to an mpsc channel.
pub struct ChannelSink {
    sender: Sender<StateUpdate>,
}

impl ChannelSink {
    pub fn new(sender: Sender<StateUpdate>) -> Self {
        Self { sender }
    }
}

impl StateSink for ChannelSink {
    fn emit(&self, event: &str, state: &AudioState) {
        // A closed channel means the presentation layer is gone
        let _ = self.sender.send(StateUpdate {
            event: event.to_string(),
            state: state.clone(),
        });
    }
}

/// Creates a channel sink and the receiving end.
pub fn create_update_channel() -> (ChannelSink, Receiver<StateUpdate>) {
    let (sender, receiver) = std::sync::mpsc::channel();
    (ChannelSink::new(sender), receiver)
}
