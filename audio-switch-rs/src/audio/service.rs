//! Audio device service.
//!
//! Owns the device map and the selection state. All mutation, from user
//! commands and from backend notifications alike, runs under one lock.

use super::backend::{AudioBackend, Endpoint};
use super::device::Device;
use super::error::AudioError;
use super::notifications::NotificationBridge;
use super::state::{AudioState, DeviceInfo, SaveState, StateSink, AUDIO_DEVICE_UPDATE};
use crate::platform::SaveFile;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Where an id is known from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Presence {
    /// Currently plugged in, may also be pinned
    Present,
    /// Pinned but not plugged in
    Pinned,
    Unknown,
}

/// The audio device service.
///
/// Cheap to clone; clones share the same service.
#[derive(Clone)]
pub struct AudioService {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    /// Serializes start and stop
    lifecycle: Mutex<()>,
    inner: Mutex<Inner>,
    sink: Arc<dyn StateSink>,
}

struct Inner {
    /// Only taken out while stop disconnects
    backend: Option<Box<dyn AudioBackend>>,
    save_file: SaveFile,
    bridge: NotificationBridge,
    running: bool,
    devices: BTreeMap<String, Device>,
    save: SaveState,
}

impl AudioService {
    pub fn new(backend: Box<dyn AudioBackend>, save_file: SaveFile, sink: Arc<dyn StateSink>) -> Self {
        let shared = Arc::new_cyclic(|weak| Shared {
            lifecycle: Mutex::new(()),
            inner: Mutex::new(Inner {
                backend: Some(backend),
                save_file,
                bridge: NotificationBridge::new(weak.clone()),
                running: false,
                devices: BTreeMap::new(),
                save: SaveState::default(),
            }),
            sink,
        });
        Self { shared }
    }

    /// Load the save file, connect the backend, enumerate and subscribe.
    ///
    /// Does nothing if already running.
    pub fn start(&self) -> Result<(), AudioError> {
        let _lifecycle = self.shared.lifecycle.lock();
        let mut inner = self.shared.inner.lock();
        if inner.running {
            return Ok(());
        }

        inner.save = inner.save_file.load()?;
        inner.backend_mut()?.connect().map_err(AudioError::BackendInit)?;

        if let Err(err) = inner.reconcile().and_then(|()| inner.register()) {
            for teardown_err in inner.release_devices() {
                warn!(err = %teardown_err, "audio service start cleanup");
            }
            if let Some(backend) = inner.backend.as_mut() {
                backend.disconnect();
            }
            return Err(err);
        }

        inner.running = true;
        info!(
            devices = inner.devices.len(),
            prefs = inner.save.prefs.len(),
            selected = %inner.save.selected,
            "audio service started"
        );
        self.shared.emit(&inner);
        Ok(())
    }

    /// Persist state, release every device, unsubscribe and disconnect.
    ///
    /// Does nothing if not running. Keeps going past failures and returns
    /// all of them.
    pub fn stop(&self) -> Result<(), AudioError> {
        let _lifecycle = self.shared.lifecycle.lock();
        let mut errors = Vec::new();

        let backend = {
            let mut inner = self.shared.inner.lock();
            if !inner.running {
                return Ok(());
            }

            if let Err(err) = inner.save_file.store(&inner.save) {
                errors.push(err);
            }
            errors.extend(inner.release_devices());
            inner.running = false;
            inner.backend.take()
        };

        // Unregistering waits for callbacks in flight, which need the state
        // lock, so it runs with the lock released.
        if let Some(mut backend) = backend {
            if let Err(source) = backend.unregister_notifications() {
                errors.push(AudioError::BackendCall {
                    call: "unregister notifications",
                    source,
                });
            }
            backend.disconnect();
            self.shared.inner.lock().backend = Some(backend);
        }

        info!(errors = errors.len(), "audio service stopped");
        AudioError::from_teardown(errors)
    }

    pub fn is_running(&self) -> bool {
        self.shared.inner.lock().running
    }

    /// Snapshot of devices, prefs, selection and mute flag.
    pub fn get_state(&self) -> Result<AudioState, AudioError> {
        let inner = self.shared.inner.lock();
        inner.ensure_running()?;
        Ok(inner.snapshot())
    }

    /// Id of the device currently holding mute control, if any.
    pub fn active_device(&self) -> Result<Option<String>, AudioError> {
        let inner = self.shared.inner.lock();
        inner.ensure_running()?;
        Ok(inner
            .devices
            .values()
            .find(|d| d.is_active())
            .map(|d| d.id().to_string()))
    }

    /// Select `id` as the preferred device and activate it if present.
    ///
    /// Selecting the current selection again only re-emits the state. A
    /// device that fails to activate stays selected.
    pub fn set_device(&self, id: &str) -> Result<(), AudioError> {
        let mut inner = self.shared.inner.lock();
        inner.ensure_running()?;

        let result = inner.select(id);
        if !matches!(result, Err(AudioError::DeviceNotFound { .. })) {
            self.shared.emit(&inner);
        }
        result
    }

    /// Pin `id` if it is present, or unpin it if already pinned.
    pub fn toggle_preference(&self, id: &str) -> Result<(), AudioError> {
        let mut inner = self.shared.inner.lock();
        inner.ensure_running()?;

        inner.toggle_preference(id)?;
        self.shared.emit(&inner);
        Ok(())
    }

    /// Flip the mute flag of the selected device.
    ///
    /// A pinned selection that is not plugged in is left alone.
    pub fn toggle_mute(&self) -> Result<(), AudioError> {
        let mut inner = self.shared.inner.lock();
        inner.ensure_running()?;

        if inner.toggle_mute()? {
            self.shared.emit(&inner);
        }
        Ok(())
    }
}

impl Shared {
    fn emit(&self, inner: &Inner) {
        self.sink.emit(AUDIO_DEVICE_UPDATE, &inner.snapshot());
    }

    /// Re-enumerate after a device notification.
    pub(crate) fn refresh_devices(&self) -> Result<(), AudioError> {
        let mut inner = self.inner.lock();
        if !inner.running {
            trace!("device notification while stopped");
            return Ok(());
        }

        let result = inner.reconcile();
        self.emit(&inner);
        result
    }

    /// Record a mute flag reported by the hardware.
    pub(crate) fn endpoint_mute_changed(&self, device_id: &str, muted: bool) -> Result<(), AudioError> {
        let mut inner = self.inner.lock();
        if !inner.running {
            return Ok(());
        }
        if device_id != inner.save.selected {
            trace!(device_id, "mute notification from unselected device");
            return Ok(());
        }

        inner.save.muted = muted;
        self.emit(&inner);
        Ok(())
    }
}

impl Inner {
    fn ensure_running(&self) -> Result<(), AudioError> {
        if self.running {
            Ok(())
        } else {
            Err(AudioError::NotRunning)
        }
    }

    fn backend(&self) -> Result<&dyn AudioBackend, AudioError> {
        self.backend.as_deref().ok_or(AudioError::NotRunning)
    }

    fn backend_mut(&mut self) -> Result<&mut (dyn AudioBackend + 'static), AudioError> {
        self.backend.as_deref_mut().ok_or(AudioError::NotRunning)
    }

    fn snapshot(&self) -> AudioState {
        AudioState {
            devices: self
                .devices
                .iter()
                .map(|(id, d)| (id.clone(), d.info()))
                .collect(),
            prefs: self.save.prefs.clone(),
            selected: self.save.selected.clone(),
            muted: self.save.muted,
        }
    }

    fn presence(&self, id: &str) -> Presence {
        if self.devices.contains_key(id) {
            Presence::Present
        } else if self.save.prefs.contains_key(id) {
            Presence::Pinned
        } else {
            Presence::Unknown
        }
    }

    fn not_found(id: &str) -> AudioError {
        AudioError::DeviceNotFound {
            device_id: id.to_string(),
        }
    }

    fn register(&mut self) -> Result<(), AudioError> {
        let bridge = self.bridge.clone();
        self.backend_mut()?
            .register_notifications(bridge)
            .map_err(|source| AudioError::BackendCall {
                call: "register notifications",
                source,
            })
    }

    /// Bring `devices` in line with a fresh enumeration, then make sure the
    /// selected device is the active one.
    fn reconcile(&mut self) -> Result<(), AudioError> {
        let endpoints = self
            .backend()?
            .enumerate_endpoints()
            .map_err(|source| AudioError::BackendCall {
                call: "enumerate endpoints",
                source,
            })?;

        let mut fresh: BTreeMap<String, Endpoint> = BTreeMap::new();
        for endpoint in endpoints {
            fresh.insert(endpoint.id.clone(), endpoint);
        }

        let gone: Vec<String> = self
            .devices
            .keys()
            .filter(|id| !fresh.contains_key(*id))
            .cloned()
            .collect();
        for id in gone {
            if let Some(mut device) = self.devices.remove(&id) {
                if let Err(err) = device.deactivate() {
                    warn!(device_id = %id, %err, "removed device release");
                }
                debug!(device_id = %id, "device removed");
            }
        }

        for (id, endpoint) in fresh {
            match self.devices.get_mut(&id) {
                // The fresh handle is dropped, the known device lives on
                Some(device) => {
                    device.refresh_from(&endpoint);
                }
                None => {
                    debug!(device_id = %id, name = %endpoint.name, "device added");
                    self.devices.insert(id, Device::new(endpoint));
                }
            }
        }

        for (id, pref) in self.save.prefs.iter_mut() {
            if let Some(device) = self.devices.get(id) {
                if pref.name != device.name() {
                    pref.name = device.name().to_string();
                }
            }
        }

        self.activate_selected()
    }

    /// Activate the selected device if present and take over its mute flag.
    fn activate_selected(&mut self) -> Result<(), AudioError> {
        if let Some(device) = self.devices.get_mut(&self.save.selected) {
            self.save.muted = device.activate(&self.bridge)?;
        }
        Ok(())
    }

    fn select(&mut self, id: &str) -> Result<(), AudioError> {
        let presence = self.presence(id);
        if presence == Presence::Unknown {
            return Err(Self::not_found(id));
        }
        if id == self.save.selected {
            return Ok(());
        }

        // The switch goes ahead even if the previous device fails to let go
        let released = match self.devices.get_mut(&self.save.selected) {
            Some(previous) => previous.deactivate(),
            None => Ok(()),
        };

        debug!(device_id = id, ?presence, "device selected");
        self.save.selected = id.to_string();
        if presence == Presence::Present {
            self.activate_selected()?;
        }
        released
    }

    fn toggle_preference(&mut self, id: &str) -> Result<(), AudioError> {
        if self.save.prefs.remove(id).is_some() {
            debug!(device_id = id, "device unpinned");
            return Ok(());
        }

        let info: DeviceInfo = self
            .devices
            .get(id)
            .map(Device::info)
            .ok_or_else(|| Self::not_found(id))?;
        debug!(device_id = id, name = %info.name, "device pinned");
        self.save.pin(info);
        Ok(())
    }

    /// Returns whether anything changed.
    fn toggle_mute(&mut self) -> Result<bool, AudioError> {
        match self.presence(&self.save.selected) {
            Presence::Present => {}
            Presence::Pinned => return Ok(false),
            Presence::Unknown => return Err(Self::not_found(&self.save.selected)),
        }

        // A failed activation at selection time gets another chance here
        let needs_activation = self
            .devices
            .get(&self.save.selected)
            .is_some_and(|d| !d.is_active());
        if needs_activation {
            self.activate_selected()?;
        }

        let device = self
            .devices
            .get(&self.save.selected)
            .ok_or_else(|| Self::not_found(&self.save.selected))?;
        device.set_mute(!self.save.muted)?;
        self.save.muted = device.get_mute()?;
        debug!(device_id = %self.save.selected, muted = self.save.muted, "mute toggled");
        Ok(true)
    }

    /// Deactivate and drop every device, collecting release errors.
    fn release_devices(&mut self) -> Vec<AudioError> {
        std::mem::take(&mut self.devices)
            .into_values()
            .filter_map(|mut device| device.deactivate().err())
            .collect()
    }
}
