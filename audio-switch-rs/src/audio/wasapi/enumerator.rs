//! Render endpoint enumeration using the MMDevice API.

use super::volume::WasapiMuteControl;
use crate::audio::backend::{Endpoint, EndpointHandle, MuteControl};
use crate::audio::error::BackendError;
use tracing::{debug, warn};
use windows::Win32::Devices::Properties::DEVPKEY_Device_FriendlyName;
use windows::Win32::Media::Audio::{eRender, IMMDevice, IMMDeviceEnumerator, DEVICE_STATE_ACTIVE};
use windows::Win32::System::Com::{CoTaskMemFree, STGM};
use windows::Win32::UI::Shell::PropertiesSystem::{IPropertyStore, PROPERTYKEY};

/// Name reported for endpoints without a friendly name.
const UNKNOWN_DEVICE_NAME: &str = "Unknown";

/// Lists the active render endpoints.
///
/// Endpoints whose id cannot be read are skipped.
pub(super) fn active_render_endpoints(
    enumerator: &IMMDeviceEnumerator,
) -> Result<Vec<Endpoint>, BackendError> {
    unsafe {
        let collection = enumerator.EnumAudioEndpoints(eRender, DEVICE_STATE_ACTIVE)?;
        let count = collection.GetCount()?;

        let mut endpoints = Vec::with_capacity(count as usize);
        for i in 0..count {
            let device = match collection.Item(i) {
                Ok(device) => device,
                Err(err) => {
                    warn!(index = i, %err, "endpoint skipped");
                    continue;
                }
            };
            match endpoint_from_device(device) {
                Ok(endpoint) => endpoints.push(endpoint),
                Err(err) => warn!(index = i, %err, "endpoint skipped"),
            }
        }

        debug!(count = endpoints.len(), "render endpoints enumerated");
        Ok(endpoints)
    }
}

fn endpoint_from_device(device: IMMDevice) -> Result<Endpoint, BackendError> {
    let id = device_id(&device)?;
    let name = friendly_name(&device).unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string());
    Ok(Endpoint {
        id,
        name,
        handle: Box::new(WasapiEndpoint { device }),
    })
}

fn device_id(device: &IMMDevice) -> Result<String, BackendError> {
    unsafe {
        let raw = device.GetId()?;
        let id = raw.to_string();
        CoTaskMemFree(Some(raw.0 as *const _));
        id.map_err(|err| BackendError::new(BackendError::E_FAIL, err.to_string()))
    }
}

fn friendly_name(device: &IMMDevice) -> Option<String> {
    unsafe {
        // STGM_READ
        let props: IPropertyStore = device.OpenPropertyStore(STGM(0)).ok()?;
        let key = PROPERTYKEY {
            fmtid: DEVPKEY_Device_FriendlyName.fmtid,
            pid: DEVPKEY_Device_FriendlyName.pid,
        };
        let value = props.GetValue(&key).ok()?;
        let name = value.to_string();
        (!name.is_empty()).then_some(name)
    }
}

/// Backend handle of one enumerated endpoint.
struct WasapiEndpoint {
    device: IMMDevice,
}

// SAFETY: the backend runs in the multithreaded apartment and MMDevice
// objects are free-threaded there.
unsafe impl Send for WasapiEndpoint {}

impl EndpointHandle for WasapiEndpoint {
    fn activate_mute_control(&self) -> Result<Box<dyn MuteControl>, BackendError> {
        Ok(Box::new(WasapiMuteControl::activate(&self.device)?))
    }
}
