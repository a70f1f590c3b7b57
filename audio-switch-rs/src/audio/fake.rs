//! In-memory backend for tests.
//!
//! `FakeHardware` plays the OS audio stack: tests edit the endpoint list and
//! mute flags, fire notifications, and inspect how many mute controls were
//! acquired and released.

use super::backend::{AudioBackend, Endpoint, EndpointHandle, MuteControl, MuteSubscription};
use super::error::BackendError;
use super::notifications::NotificationBridge;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum FailStep {
    Activate,
    GetMute,
    SetMute,
    Subscribe,
    Unsubscribe,
}

#[derive(Default)]
struct HardwareState {
    endpoints: Vec<(String, String)>,
    muted: HashMap<String, bool>,
    failures: HashSet<(String, FailStep)>,
    connect_error: Option<BackendError>,
    enumerate_error: Option<BackendError>,
    connected: bool,
    connects: usize,
    activations: HashMap<String, usize>,
    releases: HashMap<String, usize>,
    release_threads: HashMap<String, Vec<Option<String>>>,
    subscriptions: HashMap<String, NotificationBridge>,
    listener: Option<NotificationBridge>,
}

#[derive(Default)]
pub(crate) struct FakeHardware {
    state: Mutex<HardwareState>,
}

impl FakeHardware {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn backend(self: &Arc<Self>) -> Box<dyn AudioBackend> {
        Box::new(FakeBackend {
            hw: Arc::clone(self),
        })
    }

    /// An endpoint value as an enumeration would report it.
    pub fn endpoint(self: &Arc<Self>, id: &str, name: &str) -> Endpoint {
        Endpoint {
            id: id.to_string(),
            name: name.to_string(),
            handle: Box::new(FakeEndpoint {
                hw: Arc::clone(self),
                id: id.to_string(),
            }),
        }
    }

    pub fn set_endpoints(&self, endpoints: &[(&str, &str)]) {
        self.state.lock().endpoints = endpoints
            .iter()
            .map(|(id, name)| (id.to_string(), name.to_string()))
            .collect();
    }

    pub fn set_hardware_mute(&self, id: &str, muted: bool) {
        self.state.lock().muted.insert(id.to_string(), muted);
    }

    pub fn hardware_mute(&self, id: &str) -> bool {
        self.state.lock().muted.get(id).copied().unwrap_or(false)
    }

    pub fn fail(&self, id: &str, step: FailStep) {
        self.state.lock().failures.insert((id.to_string(), step));
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    pub fn fail_connect(&self, error: BackendError) {
        self.state.lock().connect_error = Some(error);
    }

    pub fn fail_enumerate(&self, error: Option<BackendError>) {
        self.state.lock().enumerate_error = error;
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    pub fn has_listener(&self) -> bool {
        self.state.lock().listener.is_some()
    }

    pub fn activations(&self, id: &str) -> usize {
        self.state.lock().activations.get(id).copied().unwrap_or(0)
    }

    pub fn releases(&self, id: &str) -> usize {
        self.state.lock().releases.get(id).copied().unwrap_or(0)
    }

    /// Names of the threads that released the mute controls of `id`, in order.
    pub fn release_threads(&self, id: &str) -> Vec<Option<String>> {
        self.state
            .lock()
            .release_threads
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    /// Wait for deferred releases to land.
    pub fn wait_for_releases(&self, id: &str, count: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if self.releases(id) >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    /// Ids with a live mute-change subscription, sorted.
    pub fn subscribed(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().subscriptions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Fire a device-added notification the way Core Audio does: from
    /// another thread. Returns whether the bridge reported success.
    pub fn fire_device_added(&self, id: &str) -> bool {
        let listener = self.state.lock().listener.clone();
        let id = id.to_string();
        listener
            .map(|bridge| {
                thread::spawn(move || bridge.on_device_added(&id).is_ok())
                    .join()
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    pub fn fire_device_removed(&self, id: &str) -> bool {
        let listener = self.state.lock().listener.clone();
        let id = id.to_string();
        listener
            .map(|bridge| {
                thread::spawn(move || bridge.on_device_removed(&id).is_ok())
                    .join()
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// Fire a volume notification on the subscription of `id`.
    pub fn fire_mute_changed(&self, id: &str, muted: bool) -> bool {
        let bridge = {
            let mut state = self.state.lock();
            state.muted.insert(id.to_string(), muted);
            state.subscriptions.get(id).cloned()
        };
        let id = id.to_string();
        bridge
            .map(|bridge| {
                thread::spawn(move || bridge.on_endpoint_mute_changed(&id, muted).is_ok())
                    .join()
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// The bridge last handed to `subscribe_mute_change` for `id`.
    pub fn mute_listener(&self, id: &str) -> Option<NotificationBridge> {
        self.state.lock().subscriptions.get(id).cloned()
    }

    pub fn listener(&self) -> Option<NotificationBridge> {
        self.state.lock().listener.clone()
    }

    fn check(&self, id: &str, step: FailStep) -> Result<(), BackendError> {
        if self.state.lock().failures.contains(&(id.to_string(), step)) {
            Err(BackendError::new(
                BackendError::E_FAIL,
                format!("{step:?} failed for {id}"),
            ))
        } else {
            Ok(())
        }
    }
}

struct FakeBackend {
    hw: Arc<FakeHardware>,
}

impl AudioBackend for FakeBackend {
    fn connect(&mut self) -> Result<(), BackendError> {
        let mut state = self.hw.state.lock();
        if let Some(err) = state.connect_error.clone() {
            return Err(err);
        }
        state.connected = true;
        state.connects += 1;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.hw.state.lock().connected = false;
    }

    fn enumerate_endpoints(&self) -> Result<Vec<Endpoint>, BackendError> {
        let endpoints = {
            let state = self.hw.state.lock();
            if let Some(err) = state.enumerate_error.clone() {
                return Err(err);
            }
            state.endpoints.clone()
        };
        Ok(endpoints
            .iter()
            .map(|(id, name)| self.hw.endpoint(id, name))
            .collect())
    }

    fn register_notifications(&mut self, bridge: NotificationBridge) -> Result<(), BackendError> {
        self.hw.state.lock().listener = Some(bridge);
        Ok(())
    }

    fn unregister_notifications(&mut self) -> Result<(), BackendError> {
        self.hw.state.lock().listener = None;
        Ok(())
    }
}

struct FakeEndpoint {
    hw: Arc<FakeHardware>,
    id: String,
}

impl EndpointHandle for FakeEndpoint {
    fn activate_mute_control(&self) -> Result<Box<dyn MuteControl>, BackendError> {
        self.hw.check(&self.id, FailStep::Activate)?;
        *self
            .hw
            .state
            .lock()
            .activations
            .entry(self.id.clone())
            .or_default() += 1;
        Ok(Box::new(FakeMuteControl {
            hw: Arc::clone(&self.hw),
            id: self.id.clone(),
        }))
    }
}

struct FakeMuteControl {
    hw: Arc<FakeHardware>,
    id: String,
}

impl MuteControl for FakeMuteControl {
    fn get_mute(&self) -> Result<bool, BackendError> {
        self.hw.check(&self.id, FailStep::GetMute)?;
        Ok(self.hw.hardware_mute(&self.id))
    }

    fn set_mute(&self, muted: bool) -> Result<(), BackendError> {
        self.hw.check(&self.id, FailStep::SetMute)?;
        self.hw.set_hardware_mute(&self.id, muted);
        Ok(())
    }

    fn subscribe_mute_change(
        &self,
        device_id: &str,
        bridge: NotificationBridge,
    ) -> Result<Box<dyn MuteSubscription>, BackendError> {
        self.hw.check(&self.id, FailStep::Subscribe)?;
        self.hw
            .state
            .lock()
            .subscriptions
            .insert(device_id.to_string(), bridge);
        Ok(Box::new(FakeSubscription {
            hw: Arc::clone(&self.hw),
            id: device_id.to_string(),
        }))
    }
}

impl Drop for FakeMuteControl {
    fn drop(&mut self) {
        let thread = thread::current().name().map(str::to_string);
        let mut state = self.hw.state.lock();
        state
            .release_threads
            .entry(self.id.clone())
            .or_default()
            .push(thread);
        *state.releases.entry(self.id.clone()).or_default() += 1;
    }
}

struct FakeSubscription {
    hw: Arc<FakeHardware>,
    id: String,
}

impl MuteSubscription for FakeSubscription {
    fn unsubscribe(self: Box<Self>) -> Result<(), BackendError> {
        self.hw.state.lock().subscriptions.remove(&self.id);
        self.hw.check(&self.id, FailStep::Unsubscribe)
    }
}
