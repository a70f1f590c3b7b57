//! Notification bridge between backend callbacks and the service.
//!
//! Backends call these entry points from threads they own. Every entry point
//! re-enters the service through its lock; failures are logged and reduced to
//! a [`CallbackStatus`] for the backend.

use super::service::Shared;
use std::sync::Weak;
use tracing::{trace, warn};

/// Result reported back to the backend for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    Ok,
    Failed,
}

impl CallbackStatus {
    pub fn is_ok(self) -> bool {
        self == CallbackStatus::Ok
    }
}

/// Handle given to the backend for delivering notifications.
///
/// Holds a weak reference; notifications arriving after the service was
/// dropped are acknowledged and ignored.
#[derive(Clone)]
pub struct NotificationBridge {
    service: Weak<Shared>,
}

impl NotificationBridge {
    pub(crate) fn new(service: Weak<Shared>) -> Self {
        Self { service }
    }

    /// A bridge not connected to any service.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self {
            service: Weak::new(),
        }
    }

    pub fn on_device_added(&self, device_id: &str) -> CallbackStatus {
        self.device_list_changed("device added", device_id)
    }

    pub fn on_device_removed(&self, device_id: &str) -> CallbackStatus {
        self.device_list_changed("device removed", device_id)
    }

    pub fn on_device_state_changed(&self, device_id: &str, new_state: u32) -> CallbackStatus {
        trace!(device_id, new_state, "device state changed");
        self.device_list_changed("device state changed", device_id)
    }

    /// Mute flag reported by the subscription of `device_id`.
    pub fn on_endpoint_mute_changed(&self, device_id: &str, muted: bool) -> CallbackStatus {
        let Some(service) = self.service.upgrade() else {
            return CallbackStatus::Ok;
        };

        match service.endpoint_mute_changed(device_id, muted) {
            Ok(()) => CallbackStatus::Ok,
            Err(err) => {
                warn!(device_id, muted, %err, "endpoint mute notification");
                CallbackStatus::Failed
            }
        }
    }

    pub fn on_default_device_changed(&self, device_id: Option<&str>) -> CallbackStatus {
        trace!(?device_id, "default device changed");
        CallbackStatus::Ok
    }

    pub fn on_property_value_changed(&self, device_id: &str) -> CallbackStatus {
        trace!(device_id, "property value changed");
        CallbackStatus::Ok
    }

    fn device_list_changed(&self, kind: &'static str, device_id: &str) -> CallbackStatus {
        let Some(service) = self.service.upgrade() else {
            return CallbackStatus::Ok;
        };

        match service.refresh_devices() {
            Ok(()) => CallbackStatus::Ok,
            Err(err) => {
                warn!(device_id, %err, "{kind}: device list update");
                CallbackStatus::Failed
            }
        }
    }
}

impl std::fmt::Debug for NotificationBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBridge")
            .field("attached", &(self.service.strong_count() > 0))
            .finish()
    }
}
