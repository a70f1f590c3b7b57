//! FFI bindings for Audio Switch.
//!
//! This crate provides C ABI functions for a foreign presentation layer.
//! All functions use panic::catch_unwind to prevent Rust panics from
//! unwinding across the FFI boundary.

use audio_switch::audio::AudioBackend;
use audio_switch::{
    default_backend, init_logging, AppConfig, AppContext, AudioError, AudioState, ConfigError,
    StateSink,
};
use parking_lot::RwLock;
use serde::Deserialize;
use std::cell::RefCell;
use std::ffi::{c_char, c_void, CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::{Arc, Once};
use tracing::{debug, warn};

// ============================================================================
// Error Handling
// ============================================================================

/// Error codes returned by FFI functions.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    InvalidHandle = -1,
    InvalidArgument = -2,
    DeviceNotFound = -3,
    NotRunning = -4,
    BackendError = -5,
    PersistenceError = -6,
    JsonError = -7,
    ConfigError = -8,
    Panic = -99,
}

impl From<&AudioError> for ErrorCode {
    fn from(err: &AudioError) -> Self {
        match err {
            AudioError::NotRunning => ErrorCode::NotRunning,
            AudioError::DeviceNotFound { .. } => ErrorCode::DeviceNotFound,
            AudioError::BackendInit(_)
            | AudioError::BackendCall { .. }
            | AudioError::Activation { .. } => ErrorCode::BackendError,
            AudioError::SaveLoad(_) | AudioError::SaveStore(_) | AudioError::PersistenceIo { .. } => {
                ErrorCode::PersistenceError
            }
            AudioError::Teardown(errors) => errors
                .first()
                .map(ErrorCode::from)
                .unwrap_or(ErrorCode::BackendError),
        }
    }
}

/// An error on its way to the caller.
#[derive(Debug)]
struct FfiError {
    code: ErrorCode,
    message: String,
}

impl FfiError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<AudioError> for FfiError {
    fn from(err: AudioError) -> Self {
        Self::new(ErrorCode::from(&err), err.to_string())
    }
}

impl From<ConfigError> for FfiError {
    fn from(err: ConfigError) -> Self {
        Self::new(ErrorCode::ConfigError, err.to_string())
    }
}

impl From<serde_json::Error> for FfiError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorCode::JsonError, err.to_string())
    }
}

/// Thread-local storage for the last error.
thread_local! {
    static LAST_ERROR: RefCell<Option<(ErrorCode, String)>> = const { RefCell::new(None) };
}

fn set_last_error(code: ErrorCode, message: impl Into<String>) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = Some((code, message.into()));
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

// ============================================================================
// Engine Handle Type
// ============================================================================

/// Configuration for engine creation.
#[derive(Debug, Default, Deserialize)]
pub struct EngineConfig {
    /// Save directory, overriding the environment and the per-user default
    #[serde(default)]
    pub save_dir: Option<String>,
}

/// Called with the event name and the JSON state snapshot.
///
/// Both strings are only valid for the duration of the call. The callback
/// runs while the service is busy and must not call back into the engine.
pub type UpdateCallback =
    extern "C" fn(event: *const c_char, state_json: *const c_char, user_data: *mut c_void);

/// Opaque handle to the engine. Actually points to an Engine struct.
pub type AudioSwitchHandle = *mut c_void;

struct Registered {
    callback: UpdateCallback,
    user_data: *mut c_void,
}

// SAFETY: the caller registering the callback vouches that `user_data` may
// be used from any thread.
unsafe impl Send for Registered {}
unsafe impl Sync for Registered {}

/// State sink forwarding updates to the registered callback.
#[derive(Default)]
struct CallbackSink {
    registered: RwLock<Option<Registered>>,
}

impl StateSink for CallbackSink {
    fn emit(&self, event: &str, state: &AudioState) {
        let registered = self.registered.read();
        let Some(registered) = registered.as_ref() else {
            return;
        };

        let json = match serde_json::to_string(state) {
            Ok(json) => json,
            Err(err) => {
                warn!(%err, "state snapshot encode");
                return;
            }
        };
        let event = CString::new(event).unwrap_or_default();
        let json = CString::new(json).unwrap_or_default();
        (registered.callback)(event.as_ptr(), json.as_ptr(), registered.user_data);
    }
}

/// Internal engine state.
struct Engine {
    ctx: AppContext,
    sink: Arc<CallbackSink>,
}

impl Engine {
    fn new(config: AppConfig, backend: Box<dyn AudioBackend>) -> Result<Self, FfiError> {
        let sink = Arc::new(CallbackSink::default());
        let ctx = AppContext::new(config, backend, sink.clone())?;
        Ok(Self { ctx, sink })
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.ctx.service().stop() {
            warn!(%err, "audio service stop on destroy");
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

static LOGGING: Once = Once::new();

/// Allocate a C string from a Rust string. Caller must free with audio_switch_free_string.
fn alloc_c_string(s: &str) -> *mut c_char {
    // A string with an interior null byte becomes empty
    CString::new(s).unwrap_or_default().into_raw()
}

/// Parse a C string to a Rust string slice.
unsafe fn parse_c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

unsafe fn engine_ref<'a>(handle: AudioSwitchHandle) -> Result<&'a Engine, FfiError> {
    (handle as *const Engine)
        .as_ref()
        .ok_or_else(|| FfiError::new(ErrorCode::InvalidHandle, "Null engine handle"))
}

unsafe fn device_arg<'a>(device_id: *const c_char) -> Result<&'a str, FfiError> {
    parse_c_str(device_id)
        .ok_or_else(|| FfiError::new(ErrorCode::InvalidArgument, "Invalid device id"))
}

fn parse_config(config_json: *const c_char) -> Result<AppConfig, FfiError> {
    let config: EngineConfig = if config_json.is_null() {
        EngineConfig::default()
    } else {
        let json = unsafe { parse_c_str(config_json) }
            .ok_or_else(|| FfiError::new(ErrorCode::InvalidArgument, "Config is not UTF-8"))?;
        serde_json::from_str(json)?
    };

    match config.save_dir {
        Some(dir) => Ok(AppConfig::with_save_dir(dir)),
        None => Ok(AppConfig::resolve()?),
    }
}

/// Run an operation returning a status code.
fn status(name: &str, f: impl FnOnce() -> Result<(), FfiError>) -> i32 {
    clear_last_error();

    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => ErrorCode::Success as i32,
        Ok(Err(err)) => {
            debug!(call = name, code = ?err.code, message = %err.message, "ffi call failed");
            let code = err.code;
            set_last_error(code, err.message);
            code as i32
        }
        Err(_) => {
            set_last_error(ErrorCode::Panic, format!("Panic in {name}"));
            ErrorCode::Panic as i32
        }
    }
}

/// Run an operation returning an allocated string, or null on failure.
fn string_result(name: &str, f: impl FnOnce() -> Result<String, FfiError>) -> *mut c_char {
    let mut out = ptr::null_mut();
    status(name, || {
        out = alloc_c_string(&f()?);
        Ok(())
    });
    out
}

fn create_engine(config: AppConfig, backend: Box<dyn AudioBackend>) -> AudioSwitchHandle {
    let mut handle = ptr::null_mut();
    status("audio_switch_create", || {
        let engine = Box::new(Engine::new(config, backend)?);
        handle = Box::into_raw(engine) as AudioSwitchHandle;
        Ok(())
    });
    handle
}

// ============================================================================
// FFI Functions - Lifecycle
// ============================================================================

/// Create a new engine on the platform audio backend.
///
/// # Arguments
/// * `config_json` - JSON configuration string (can be null for defaults)
///
/// # Returns
/// Handle to the engine, or null on failure. Check audio_switch_last_error_code() on failure.
/// The engine is created stopped.
///
/// # Safety
/// The returned handle must be freed with audio_switch_destroy().
#[no_mangle]
pub extern "C" fn audio_switch_create(config_json: *const c_char) -> AudioSwitchHandle {
    LOGGING.call_once(init_logging);

    clear_last_error();
    let prepared = panic::catch_unwind(AssertUnwindSafe(|| {
        let config = parse_config(config_json)?;
        let backend = default_backend()?;
        Ok::<_, FfiError>((config, backend))
    }));

    match prepared {
        Ok(Ok((config, backend))) => create_engine(config, backend),
        Ok(Err(err)) => {
            set_last_error(err.code, err.message);
            ptr::null_mut()
        }
        Err(_) => {
            set_last_error(ErrorCode::Panic, "Panic during engine creation");
            ptr::null_mut()
        }
    }
}

/// Destroy an engine instance, stopping it first.
///
/// # Safety
/// The handle must have been created by audio_switch_create() and must not be used after this call.
#[no_mangle]
pub extern "C" fn audio_switch_destroy(handle: AudioSwitchHandle) {
    if handle.is_null() {
        return;
    }

    let _ = panic::catch_unwind(|| unsafe {
        drop(Box::from_raw(handle as *mut Engine));
    });
}

/// Start the service: load the save file, enumerate and subscribe.
#[no_mangle]
pub extern "C" fn audio_switch_start(handle: AudioSwitchHandle) -> i32 {
    status("audio_switch_start", || {
        let engine = unsafe { engine_ref(handle)? };
        Ok(engine.ctx.service().start()?)
    })
}

/// Stop the service, persisting the selection state.
#[no_mangle]
pub extern "C" fn audio_switch_stop(handle: AudioSwitchHandle) -> i32 {
    status("audio_switch_stop", || {
        let engine = unsafe { engine_ref(handle)? };
        Ok(engine.ctx.service().stop()?)
    })
}

// ============================================================================
// FFI Functions - Device Operations
// ============================================================================

/// Get the current state snapshot.
///
/// # Returns
/// JSON string with `devices`, `prefs`, `selected` and `muted`. Caller must free
/// with audio_switch_free_string(). Returns null on failure.
#[no_mangle]
pub extern "C" fn audio_switch_get_state(handle: AudioSwitchHandle) -> *mut c_char {
    string_result("audio_switch_get_state", || {
        let engine = unsafe { engine_ref(handle)? };
        let state = engine.ctx.service().get_state()?;
        Ok(serde_json::to_string(&state)?)
    })
}

/// Select the preferred output device.
#[no_mangle]
pub extern "C" fn audio_switch_set_device(
    handle: AudioSwitchHandle,
    device_id: *const c_char,
) -> i32 {
    status("audio_switch_set_device", || {
        let engine = unsafe { engine_ref(handle)? };
        let id = unsafe { device_arg(device_id)? };
        Ok(engine.ctx.service().set_device(id)?)
    })
}

/// Pin a present device, or unpin a pinned one.
#[no_mangle]
pub extern "C" fn audio_switch_toggle_preference(
    handle: AudioSwitchHandle,
    device_id: *const c_char,
) -> i32 {
    status("audio_switch_toggle_preference", || {
        let engine = unsafe { engine_ref(handle)? };
        let id = unsafe { device_arg(device_id)? };
        Ok(engine.ctx.service().toggle_preference(id)?)
    })
}

/// Toggle mute on the selected device.
#[no_mangle]
pub extern "C" fn audio_switch_toggle_mute(handle: AudioSwitchHandle) -> i32 {
    status("audio_switch_toggle_mute", || {
        let engine = unsafe { engine_ref(handle)? };
        Ok(engine.ctx.service().toggle_mute()?)
    })
}

/// Register the update callback, replacing any previous one. Null clears it.
///
/// # Safety
/// `user_data` is passed back verbatim from whichever thread produced the
/// update; it must stay valid until the callback is replaced or the engine
/// is destroyed.
#[no_mangle]
pub extern "C" fn audio_switch_set_update_callback(
    handle: AudioSwitchHandle,
    callback: Option<UpdateCallback>,
    user_data: *mut c_void,
) -> i32 {
    status("audio_switch_set_update_callback", || {
        let engine = unsafe { engine_ref(handle)? };
        *engine.sink.registered.write() = callback.map(|callback| Registered {
            callback,
            user_data,
        });
        Ok(())
    })
}

// ============================================================================
// FFI Functions - Memory Management
// ============================================================================

/// Free a string allocated by this library.
///
/// # Safety
/// The pointer must have been returned by one of the audio_switch_* functions.
/// Do not call this on strings from other sources.
#[no_mangle]
pub extern "C" fn audio_switch_free_string(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }

    let _ = panic::catch_unwind(|| unsafe {
        drop(CString::from_raw(ptr));
    });
}

// ============================================================================
// FFI Functions - Error Handling
// ============================================================================

/// Get the last error code.
///
/// # Returns
/// The error code from the last failed operation, or 0 if no error.
#[no_mangle]
pub extern "C" fn audio_switch_last_error_code() -> i32 {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|(code, _)| *code as i32)
            .unwrap_or(0)
    })
}

/// Get the last error message.
///
/// # Returns
/// Error message string. Caller must free with audio_switch_free_string().
/// Returns null if no error.
#[no_mangle]
pub extern "C" fn audio_switch_last_error_message() -> *mut c_char {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|(_, msg)| alloc_c_string(msg))
            .unwrap_or(ptr::null_mut())
    })
}

// ============================================================================
// FFI Functions - Utility
// ============================================================================

/// Get the library version.
///
/// # Returns
/// Version string. Caller must free with audio_switch_free_string().
#[no_mangle]
pub extern "C" fn audio_switch_version() -> *mut c_char {
    alloc_c_string(env!("CARGO_PKG_VERSION"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use audio_switch::audio::{
        BackendError, Endpoint, EndpointHandle, MuteControl, MuteSubscription, NotificationBridge,
    };
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// One speaker with an in-memory mute flag.
    struct SpeakerBackend {
        muted: Arc<Mutex<bool>>,
    }

    struct Speaker {
        muted: Arc<Mutex<bool>>,
    }

    struct NoSubscription;

    impl MuteSubscription for NoSubscription {
        fn unsubscribe(self: Box<Self>) -> Result<(), BackendError> {
            Ok(())
        }
    }

    impl MuteControl for Speaker {
        fn get_mute(&self) -> Result<bool, BackendError> {
            Ok(*self.muted.lock())
        }

        fn set_mute(&self, muted: bool) -> Result<(), BackendError> {
            *self.muted.lock() = muted;
            Ok(())
        }

        fn subscribe_mute_change(
            &self,
            _device_id: &str,
            _bridge: NotificationBridge,
        ) -> Result<Box<dyn MuteSubscription>, BackendError> {
            Ok(Box::new(NoSubscription))
        }
    }

    impl EndpointHandle for Speaker {
        fn activate_mute_control(&self) -> Result<Box<dyn MuteControl>, BackendError> {
            Ok(Box::new(Speaker {
                muted: self.muted.clone(),
            }))
        }
    }

    impl AudioBackend for SpeakerBackend {
        fn connect(&mut self) -> Result<(), BackendError> {
            Ok(())
        }

        fn disconnect(&mut self) {}

        fn enumerate_endpoints(&self) -> Result<Vec<Endpoint>, BackendError> {
            Ok(vec![Endpoint {
                id: "A".to_string(),
                name: "Speakers".to_string(),
                handle: Box::new(Speaker {
                    muted: self.muted.clone(),
                }),
            }])
        }

        fn register_notifications(&mut self, _bridge: NotificationBridge) -> Result<(), BackendError> {
            Ok(())
        }

        fn unregister_notifications(&mut self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn test_engine(dir: &tempfile::TempDir) -> (AudioSwitchHandle, Arc<Mutex<bool>>) {
        let muted = Arc::new(Mutex::new(false));
        let backend = Box::new(SpeakerBackend {
            muted: muted.clone(),
        });
        let handle = create_engine(AppConfig::with_save_dir(dir.path()), backend);
        assert!(!handle.is_null());
        (handle, muted)
    }

    fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = unsafe { CStr::from_ptr(ptr).to_str().unwrap().to_string() };
        audio_switch_free_string(ptr);
        s
    }

    static UPDATES: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn count_updates(event: *const c_char, state_json: *const c_char, _: *mut c_void) {
        let event = unsafe { CStr::from_ptr(event).to_str().unwrap() };
        let json = unsafe { CStr::from_ptr(state_json).to_str().unwrap() };
        assert_eq!(event, "audio-device-update");
        assert!(serde_json::from_str::<AudioState>(json).is_ok());
        UPDATES.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_error_code_conversion() {
        assert_eq!(
            ErrorCode::from(&AudioError::DeviceNotFound {
                device_id: "test".to_string()
            }),
            ErrorCode::DeviceNotFound
        );
        assert_eq!(ErrorCode::from(&AudioError::NotRunning), ErrorCode::NotRunning);
        assert_eq!(
            ErrorCode::from(&AudioError::Teardown(vec![AudioError::NotRunning])),
            ErrorCode::NotRunning
        );
    }

    #[test]
    fn test_engine_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, muted) = test_engine(&dir);

        assert_eq!(audio_switch_get_state(handle), ptr::null_mut());
        assert_eq!(audio_switch_last_error_code(), ErrorCode::NotRunning as i32);

        assert_eq!(audio_switch_start(handle), 0);
        let id = CString::new("A").unwrap();
        assert_eq!(audio_switch_set_device(handle, id.as_ptr()), 0);
        assert_eq!(audio_switch_toggle_preference(handle, id.as_ptr()), 0);
        assert_eq!(audio_switch_toggle_mute(handle), 0);
        assert!(*muted.lock());

        let state: AudioState =
            serde_json::from_str(&take_string(audio_switch_get_state(handle))).unwrap();
        assert_eq!(state.selected, "A");
        assert!(state.muted);
        assert!(state.prefs.contains_key("A"));

        assert_eq!(audio_switch_stop(handle), 0);
        audio_switch_destroy(handle);
        assert!(dir.path().join("audio_save.json").is_file());
    }

    #[test]
    fn test_update_callback() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, _) = test_engine(&dir);

        assert_eq!(
            audio_switch_set_update_callback(handle, Some(count_updates), ptr::null_mut()),
            0
        );
        assert_eq!(audio_switch_start(handle), 0);
        assert!(UPDATES.load(Ordering::SeqCst) >= 1);

        audio_switch_set_update_callback(handle, None, ptr::null_mut());
        audio_switch_destroy(handle);
    }

    #[test]
    fn test_invalid_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, _) = test_engine(&dir);
        audio_switch_start(handle);

        assert_eq!(
            audio_switch_set_device(handle, ptr::null()),
            ErrorCode::InvalidArgument as i32
        );
        let unknown = CString::new("X").unwrap();
        assert_eq!(
            audio_switch_set_device(handle, unknown.as_ptr()),
            ErrorCode::DeviceNotFound as i32
        );
        let message = take_string(audio_switch_last_error_message());
        assert!(message.contains('X'));

        assert_eq!(
            audio_switch_toggle_mute(ptr::null_mut()),
            ErrorCode::InvalidHandle as i32
        );
        audio_switch_destroy(handle);
    }

    #[test]
    fn test_config_parsing() {
        let json = CString::new(r#"{"save_dir":"/tmp/audio-switch-test"}"#).unwrap();
        let config = parse_config(json.as_ptr()).unwrap();
        assert_eq!(config.save_dir(), std::path::Path::new("/tmp/audio-switch-test"));

        let bad = CString::new("{").unwrap();
        assert_eq!(parse_config(bad.as_ptr()).unwrap_err().code, ErrorCode::JsonError);
    }

    #[test]
    fn test_version() {
        let version = audio_switch_version();
        assert!(!take_string(version).is_empty());
    }
}
