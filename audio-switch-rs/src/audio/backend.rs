//! Platform audio backend capability.
//!
//! The service only talks to the OS audio stack through these traits. The
//! Windows Core Audio binding lives in [`super::wasapi`]; tests substitute a
//! fake implementation.
//!
//! Backends deliver notifications through a [`NotificationBridge`] on threads
//! they own. They must never invoke the bridge synchronously from inside a
//! call made by the service, since the service holds its lock for the
//! duration of every call into the backend.

use super::error::BackendError;
use super::notifications::NotificationBridge;

/// One endpoint as reported by an enumeration pass.
pub struct Endpoint {
    pub id: String,
    pub name: String,
    pub handle: Box<dyn EndpointHandle>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Backend reference to an endpoint. Dropping it releases the endpoint.
pub trait EndpointHandle: Send {
    /// Acquire the mute-control capability of this endpoint.
    fn activate_mute_control(&self) -> Result<Box<dyn MuteControl>, BackendError>;
}

/// Mute control of an activated endpoint. Dropping it releases the control.
pub trait MuteControl: Send {
    fn get_mute(&self) -> Result<bool, BackendError>;

    fn set_mute(&self, muted: bool) -> Result<(), BackendError>;

    /// Subscribe to mute changes of this endpoint.
    ///
    /// Notifications are reported through
    /// [`NotificationBridge::on_endpoint_mute_changed`] tagged with `device_id`.
    fn subscribe_mute_change(
        &self,
        device_id: &str,
        bridge: NotificationBridge,
    ) -> Result<Box<dyn MuteSubscription>, BackendError>;
}

/// An active mute-change subscription.
pub trait MuteSubscription: Send {
    fn unsubscribe(self: Box<Self>) -> Result<(), BackendError>;
}

/// Connection to the platform audio subsystem.
pub trait AudioBackend: Send {
    fn connect(&mut self) -> Result<(), BackendError>;

    fn disconnect(&mut self);

    /// List the endpoints currently present.
    fn enumerate_endpoints(&self) -> Result<Vec<Endpoint>, BackendError>;

    /// Register for device added/removed/state/default/property notifications.
    fn register_notifications(&mut self, bridge: NotificationBridge) -> Result<(), BackendError>;

    fn unregister_notifications(&mut self) -> Result<(), BackendError>;
}
