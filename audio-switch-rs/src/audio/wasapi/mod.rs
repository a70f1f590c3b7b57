//! Windows Core Audio backend.

mod enumerator;
mod notifications;
mod volume;

use super::backend::{AudioBackend, Endpoint};
use super::error::BackendError;
use super::notifications::NotificationBridge;
use notifications::{DeviceNotificationClient, Dispatcher};
use std::thread::{self, ThreadId};
use tracing::{debug, warn};
use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::Media::Audio::{IMMDeviceEnumerator, IMMNotificationClient, MMDeviceEnumerator};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoUninitialize, CLSCTX_ALL, COINIT_MULTITHREADED,
};

/// COM initialization guard that uninitializes COM on drop.
///
/// COM must be uninitialized on the thread that initialized it; a guard
/// dropped elsewhere leaves the initialization in place.
struct ComGuard {
    thread: Option<ThreadId>,
}

impl ComGuard {
    fn new() -> Result<Self, BackendError> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr == RPC_E_CHANGED_MODE {
            // The host already owns this thread's apartment
            warn!("COM already initialized single-threaded on this thread");
            return Ok(Self { thread: None });
        }
        hr.ok()?;
        Ok(Self {
            thread: Some(thread::current().id()),
        })
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        match self.thread {
            Some(id) if id == thread::current().id() => unsafe { CoUninitialize() },
            Some(_) => debug!("COM guard dropped on another thread"),
            None => {}
        }
    }
}

/// Endpoint notification registration.
struct Registration {
    client: IMMNotificationClient,
    _dispatcher: Dispatcher,
}

/// A connected Core Audio session. Fields drop in order, COM last.
struct Session {
    registration: Option<Registration>,
    enumerator: IMMDeviceEnumerator,
    _com: ComGuard,
}

impl Session {
    fn unregister(&mut self) -> Result<(), BackendError> {
        if let Some(registration) = self.registration.take() {
            unsafe {
                self.enumerator
                    .UnregisterEndpointNotificationCallback(&registration.client)?
            };
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.unregister() {
            warn!(%err, "endpoint notifications unregister on session drop");
        }
    }
}

/// [`AudioBackend`] over the Windows MMDevice API.
#[derive(Default)]
pub struct WasapiBackend {
    session: Option<Session>,
}

// SAFETY: COM is initialized multithreaded and the MMDevice enumerator is
// free-threaded in that apartment.
unsafe impl Send for WasapiBackend {}

impl WasapiBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn session(&self) -> Result<&Session, BackendError> {
        self.session
            .as_ref()
            .ok_or_else(|| BackendError::new(BackendError::E_FAIL, "backend not connected"))
    }

    fn session_mut(&mut self) -> Result<&mut Session, BackendError> {
        self.session
            .as_mut()
            .ok_or_else(|| BackendError::new(BackendError::E_FAIL, "backend not connected"))
    }
}

impl AudioBackend for WasapiBackend {
    fn connect(&mut self) -> Result<(), BackendError> {
        if self.session.is_some() {
            return Ok(());
        }
        let com = ComGuard::new()?;
        let enumerator: IMMDeviceEnumerator =
            unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)? };
        self.session = Some(Session {
            registration: None,
            enumerator,
            _com: com,
        });
        debug!("core audio connected");
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.session.take().is_some() {
            debug!("core audio disconnected");
        }
    }

    fn enumerate_endpoints(&self) -> Result<Vec<Endpoint>, BackendError> {
        enumerator::active_render_endpoints(&self.session()?.enumerator)
    }

    fn register_notifications(&mut self, bridge: NotificationBridge) -> Result<(), BackendError> {
        let session = self.session_mut()?;
        session.unregister()?;

        let dispatcher = Dispatcher::spawn(bridge)
            .map_err(|err| BackendError::new(BackendError::E_FAIL, err.to_string()))?;
        let client: IMMNotificationClient = DeviceNotificationClient::new(dispatcher.sender()).into();
        unsafe { session.enumerator.RegisterEndpointNotificationCallback(&client)? };

        session.registration = Some(Registration {
            client,
            _dispatcher: dispatcher,
        });
        Ok(())
    }

    fn unregister_notifications(&mut self) -> Result<(), BackendError> {
        match self.session.as_mut() {
            Some(session) => session.unregister(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_backend_unregisters_endpoint_notifications() {
        // Keeps COM alive on this thread after the backend's guard is gone
        let _com = ComGuard::new().unwrap();
        let mut backend = WasapiBackend::new();
        backend.connect().unwrap();
        backend
            .register_notifications(NotificationBridge::detached())
            .unwrap();

        let session = backend.session().unwrap();
        let enumerator = session.enumerator.clone();
        let client = session.registration.as_ref().unwrap().client.clone();

        drop(backend);

        // Unregistering a second time fails once the drop has unregistered
        let again = unsafe { enumerator.UnregisterEndpointNotificationCallback(&client) };
        assert!(again.is_err());
    }
}
