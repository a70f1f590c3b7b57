//! Per-endpoint resource wrapper.
//!
//! A [`Device`] owns the backend handle of one endpoint and, while active,
//! its mute control and mute-change subscription.

use super::backend::{Endpoint, EndpointHandle, MuteControl, MuteSubscription};
use super::error::{AudioError, BackendError};
use super::notifications::NotificationBridge;
use super::state::DeviceInfo;
use std::thread;
use tracing::{debug, trace, warn};

/// Activation state of a device.
///
/// The subscription only exists inside `Active`, next to the control it was
/// registered on, so a subscription can never outlive its control.
enum Activation {
    Inactive,
    Active {
        control: Box<dyn MuteControl>,
        subscription: Box<dyn MuteSubscription>,
    },
}

/// One audio endpoint known to the service.
pub struct Device {
    id: String,
    name: String,
    handle: Box<dyn EndpointHandle>,
    activation: Activation,
}

impl Device {
    /// Wrap a freshly enumerated endpoint. Devices start inactive.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            id: endpoint.id,
            name: endpoint.name,
            handle: endpoint.handle,
            activation: Activation::Inactive,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        matches!(self.activation, Activation::Active { .. })
    }

    pub fn info(&self) -> DeviceInfo {
        DeviceInfo::new(self.id.clone(), self.name.clone())
    }

    /// Take over the mutable fields of a newer enumeration of this endpoint.
    ///
    /// Returns true if anything changed. The handle and activation are kept.
    pub fn refresh_from(&mut self, endpoint: &Endpoint) -> bool {
        if self.name == endpoint.name {
            return false;
        }
        debug!(device_id = %self.id, old = %self.name, new = %endpoint.name, "device renamed");
        self.name = endpoint.name.clone();
        true
    }

    /// Acquire mute control and subscribe to mute changes.
    ///
    /// Returns the hardware mute flag. Already active devices only re-read it.
    pub fn activate(&mut self, bridge: &NotificationBridge) -> Result<bool, AudioError> {
        if let Activation::Active { control, .. } = &self.activation {
            return control
                .get_mute()
                .map_err(|source| self.activation_error("get mute", source));
        }

        let control = self
            .handle
            .activate_mute_control()
            .map_err(|source| self.activation_error("activate mute control", source))?;

        let muted = match control.get_mute() {
            Ok(muted) => muted,
            Err(source) => {
                release_deferred(&self.id, control);
                return Err(self.activation_error("get mute", source));
            }
        };

        let subscription = match control.subscribe_mute_change(&self.id, bridge.clone()) {
            Ok(subscription) => subscription,
            Err(source) => {
                release_deferred(&self.id, control);
                return Err(self.activation_error("subscribe mute change", source));
            }
        };

        self.activation = Activation::Active {
            control,
            subscription,
        };
        debug!(device_id = %self.id, muted, "device activated");
        Ok(muted)
    }

    /// Unsubscribe and release the mute control.
    ///
    /// The control is released even when unsubscribing fails.
    pub fn deactivate(&mut self) -> Result<(), AudioError> {
        let Activation::Active {
            control,
            subscription,
        } = std::mem::replace(&mut self.activation, Activation::Inactive)
        else {
            return Ok(());
        };

        let result = subscription
            .unsubscribe()
            .map_err(|source| self.activation_error("unsubscribe mute change", source));
        release_deferred(&self.id, control);

        debug!(device_id = %self.id, "device deactivated");
        result
    }

    /// Hardware mute flag, or `false` while inactive.
    pub fn get_mute(&self) -> Result<bool, AudioError> {
        match &self.activation {
            Activation::Inactive => Ok(false),
            Activation::Active { control, .. } => {
                control.get_mute().map_err(|source| AudioError::BackendCall {
                    call: "get mute",
                    source,
                })
            }
        }
    }

    /// Set the hardware mute flag. Does nothing while inactive.
    pub fn set_mute(&self, muted: bool) -> Result<(), AudioError> {
        match &self.activation {
            Activation::Inactive => Ok(()),
            Activation::Active { control, .. } => {
                control
                    .set_mute(muted)
                    .map_err(|source| AudioError::BackendCall {
                        call: "set mute",
                        source,
                    })
            }
        }
    }

    fn activation_error(&self, step: &'static str, source: BackendError) -> AudioError {
        AudioError::Activation {
            device_id: self.id.clone(),
            step,
            source,
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(err) = self.deactivate() {
            warn!(device_id = %self.id, %err, "device release");
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Release a mute control off the current call stack.
///
/// Releasing IAudioEndpointVolume from inside one of its own notification
/// callbacks blocks the Core Audio dispatch thread, and deactivation is
/// reachable from those callbacks.
fn release_deferred(device_id: &str, control: Box<dyn MuteControl>) {
    let id = device_id.to_string();
    let spawned = thread::Builder::new()
        .name("mute-control-release".to_string())
        .spawn(move || {
            drop(control);
            trace!(device_id = %id, "mute control released");
        });

    // On spawn failure the closure, and the control with it, is dropped here
    if let Err(err) = spawned {
        warn!(device_id, %err, "deferred release unavailable, released inline");
    }
}
