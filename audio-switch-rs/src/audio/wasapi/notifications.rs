//! Core Audio notification plumbing.
//!
//! COM callbacks only queue a [`BackendEvent`]; a dispatcher thread delivers
//! it to the [`NotificationBridge`]. Callback threads therefore never wait on
//! the service lock, and unregistering a callback never waits on a callback
//! that does.

use crate::audio::notifications::NotificationBridge;
use std::sync::mpsc::{self, Sender};
use std::thread;
use tracing::{trace, warn};
use windows::core::{implement, PCWSTR};
use windows::Win32::Media::Audio::{
    eRender, EDataFlow, ERole, IMMNotificationClient, IMMNotificationClient_Impl, DEVICE_STATE,
};
use windows::Win32::UI::Shell::PropertiesSystem::PROPERTYKEY;
// The implement macro expands to paths under windows_core
#[allow(unused_imports)]
use windows_core;

/// A notification as reported by Core Audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum BackendEvent {
    DeviceAdded(String),
    DeviceRemoved(String),
    DeviceStateChanged { device_id: String, new_state: u32 },
    DefaultDeviceChanged(Option<String>),
    PropertyValueChanged(String),
    MuteChanged { device_id: String, muted: bool },
}

impl BackendEvent {
    fn deliver(self, bridge: &NotificationBridge) {
        let status = match &self {
            BackendEvent::DeviceAdded(id) => bridge.on_device_added(id),
            BackendEvent::DeviceRemoved(id) => bridge.on_device_removed(id),
            BackendEvent::DeviceStateChanged {
                device_id,
                new_state,
            } => bridge.on_device_state_changed(device_id, *new_state),
            BackendEvent::DefaultDeviceChanged(id) => bridge.on_default_device_changed(id.as_deref()),
            BackendEvent::PropertyValueChanged(id) => bridge.on_property_value_changed(id),
            BackendEvent::MuteChanged { device_id, muted } => {
                bridge.on_endpoint_mute_changed(device_id, *muted)
            }
        };
        if !status.is_ok() {
            warn!(event = ?self, "notification not handled");
        }
    }
}

/// Owns the sending side of a dispatcher thread.
///
/// Dropping it ends the thread once the queued events are delivered. The
/// thread is never joined, since the drop may happen while the thread waits
/// for the service lock.
pub(super) struct Dispatcher {
    sender: Sender<BackendEvent>,
}

impl Dispatcher {
    pub fn spawn(bridge: NotificationBridge) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<BackendEvent>();
        thread::Builder::new()
            .name("audio-notify".to_string())
            .spawn(move || {
                for event in receiver {
                    event.deliver(&bridge);
                }
                trace!("notification dispatcher finished");
            })?;
        Ok(Self { sender })
    }

    pub fn sender(&self) -> Sender<BackendEvent> {
        self.sender.clone()
    }
}

/// `IMMNotificationClient` that queues endpoint events for render devices.
#[implement(IMMNotificationClient)]
pub(super) struct DeviceNotificationClient {
    sender: Sender<BackendEvent>,
}

impl DeviceNotificationClient {
    pub fn new(sender: Sender<BackendEvent>) -> Self {
        Self { sender }
    }

    fn queue(&self, event: BackendEvent) {
        // A closed channel means the backend already unregistered
        let _ = self.sender.send(event);
    }
}

/// Copies a callback-provided device id.
fn device_id(raw: &PCWSTR) -> Option<String> {
    if raw.is_null() {
        return None;
    }
    // SAFETY: Core Audio passes a valid NUL terminated string for the
    // duration of the callback.
    unsafe { raw.to_string().ok() }
}

impl IMMNotificationClient_Impl for DeviceNotificationClient_Impl {
    fn OnDeviceStateChanged(
        &self,
        pwstrdeviceid: &PCWSTR,
        dwnewstate: DEVICE_STATE,
    ) -> windows::core::Result<()> {
        if let Some(device_id) = device_id(pwstrdeviceid) {
            self.queue(BackendEvent::DeviceStateChanged {
                device_id,
                new_state: dwnewstate.0,
            });
        }
        Ok(())
    }

    fn OnDeviceAdded(&self, pwstrdeviceid: &PCWSTR) -> windows::core::Result<()> {
        if let Some(id) = device_id(pwstrdeviceid) {
            self.queue(BackendEvent::DeviceAdded(id));
        }
        Ok(())
    }

    fn OnDeviceRemoved(&self, pwstrdeviceid: &PCWSTR) -> windows::core::Result<()> {
        if let Some(id) = device_id(pwstrdeviceid) {
            self.queue(BackendEvent::DeviceRemoved(id));
        }
        Ok(())
    }

    fn OnDefaultDeviceChanged(
        &self,
        flow: EDataFlow,
        _role: ERole,
        pwstrdefaultdeviceid: &PCWSTR,
    ) -> windows::core::Result<()> {
        if flow == eRender {
            self.queue(BackendEvent::DefaultDeviceChanged(device_id(
                pwstrdefaultdeviceid,
            )));
        }
        Ok(())
    }

    fn OnPropertyValueChanged(
        &self,
        pwstrdeviceid: &PCWSTR,
        _key: &PROPERTYKEY,
    ) -> windows::core::Result<()> {
        if let Some(id) = device_id(pwstrdeviceid) {
            self.queue(BackendEvent::PropertyValueChanged(id));
        }
        Ok(())
    }
}
