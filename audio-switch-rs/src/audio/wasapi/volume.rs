//! Mute control using IAudioEndpointVolume.

use super::notifications::{BackendEvent, Dispatcher};
use crate::audio::backend::{MuteControl, MuteSubscription};
use crate::audio::error::BackendError;
use crate::audio::notifications::NotificationBridge;
use std::sync::mpsc::Sender;
use windows::core::implement;
use windows::Win32::Media::Audio::Endpoints::{
    IAudioEndpointVolume, IAudioEndpointVolumeCallback, IAudioEndpointVolumeCallback_Impl,
};
use windows::Win32::Media::Audio::{IMMDevice, AUDIO_VOLUME_NOTIFICATION_DATA};
use windows::Win32::System::Com::CLSCTX_ALL;
#[allow(unused_imports)]
use windows_core;

/// Mute control of one activated endpoint.
pub(super) struct WasapiMuteControl {
    endpoint_volume: IAudioEndpointVolume,
}

// SAFETY: the backend runs in the multithreaded apartment and
// IAudioEndpointVolume is free-threaded there.
unsafe impl Send for WasapiMuteControl {}

impl WasapiMuteControl {
    pub fn activate(device: &IMMDevice) -> Result<Self, BackendError> {
        // SAFETY: `device` is a live endpoint from the enumerator.
        let endpoint_volume: IAudioEndpointVolume = unsafe { device.Activate(CLSCTX_ALL, None)? };
        Ok(Self { endpoint_volume })
    }
}

impl MuteControl for WasapiMuteControl {
    fn get_mute(&self) -> Result<bool, BackendError> {
        let muted = unsafe { self.endpoint_volume.GetMute()? };
        Ok(muted.as_bool())
    }

    fn set_mute(&self, muted: bool) -> Result<(), BackendError> {
        unsafe { self.endpoint_volume.SetMute(muted, std::ptr::null())? };
        Ok(())
    }

    fn subscribe_mute_change(
        &self,
        device_id: &str,
        bridge: NotificationBridge,
    ) -> Result<Box<dyn MuteSubscription>, BackendError> {
        let dispatcher = Dispatcher::spawn(bridge)
            .map_err(|err| BackendError::new(BackendError::E_FAIL, err.to_string()))?;
        let callback: IAudioEndpointVolumeCallback =
            VolumeCallback::new(device_id, dispatcher.sender()).into();

        unsafe { self.endpoint_volume.RegisterControlChangeNotify(&callback)? };

        Ok(Box::new(WasapiMuteSubscription {
            endpoint_volume: self.endpoint_volume.clone(),
            callback,
            _dispatcher: dispatcher,
        }))
    }
}

/// A registered volume callback.
///
/// Holds its own reference to the endpoint volume so unregistering works
/// regardless of the control's release order.
struct WasapiMuteSubscription {
    endpoint_volume: IAudioEndpointVolume,
    callback: IAudioEndpointVolumeCallback,
    _dispatcher: Dispatcher,
}

// SAFETY: see WasapiMuteControl.
unsafe impl Send for WasapiMuteSubscription {}

impl MuteSubscription for WasapiMuteSubscription {
    fn unsubscribe(self: Box<Self>) -> Result<(), BackendError> {
        unsafe {
            self.endpoint_volume
                .UnregisterControlChangeNotify(&self.callback)?
        };
        Ok(())
    }
}

#[implement(IAudioEndpointVolumeCallback)]
struct VolumeCallback {
    device_id: String,
    sender: Sender<BackendEvent>,
}

impl VolumeCallback {
    fn new(device_id: &str, sender: Sender<BackendEvent>) -> Self {
        Self {
            device_id: device_id.to_string(),
            sender,
        }
    }
}

impl IAudioEndpointVolumeCallback_Impl for VolumeCallback_Impl {
    fn OnNotify(&self, pnotify: *mut AUDIO_VOLUME_NOTIFICATION_DATA) -> windows::core::Result<()> {
        if pnotify.is_null() {
            return Ok(());
        }
        // SAFETY: non-null and valid for the duration of the callback.
        let muted = unsafe { (*pnotify).bMuted.as_bool() };
        let _ = self.sender.send(BackendEvent::MuteChanged {
            device_id: self.device_id.clone(),
            muted,
        });
        Ok(())
    }
}
