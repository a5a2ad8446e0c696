//! Platform capability interface for global input taps
//!
//! Each OS provides one [`InputBackend`]: a permission gate plus a way to
//! register a filtered callback on the global input stream. Everything
//! above this module (edge detection, state tracking, lifecycle) is shared.

#[cfg(target_os = "macos")]
mod macos;
mod manual;
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
mod unsupported;
#[cfg(target_os = "windows")]
mod win32;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::hotkey::TransitionSink;

#[cfg(target_os = "macos")]
pub use macos::MacBackend;
pub use manual::{ManualBackend, ManualInjector};
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub use unsupported::UnsupportedBackend;
#[cfg(target_os = "windows")]
pub use win32::WindowsBackend;

/// Whether the process may observe global input events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    Authorized,
    NotAuthorized,
}

impl PermissionStatus {
    pub fn from_trusted(trusted: bool) -> Self {
        if trusted {
            PermissionStatus::Authorized
        } else {
            PermissionStatus::NotAuthorized
        }
    }

    pub fn is_authorized(self) -> bool {
        self == PermissionStatus::Authorized
    }
}

impl std::fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionStatus::Authorized => write!(f, "authorized"),
            PermissionStatus::NotAuthorized => write!(f, "not authorized"),
        }
    }
}

/// Static description of the running platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    /// Human readable OS name
    pub platform: String,
    /// Name of the tracked key as shown to users
    pub hotkey_name: String,
    /// Whether the user must grant Accessibility access
    pub requires_accessibility_permission: bool,
}

/// Errors raised by a platform backend
#[derive(Debug, thiserror::Error)]
pub enum TapError {
    #[error("OS refused to create the event tap ({permission}): {reason}")]
    RegistrationFailed {
        reason: String,
        /// Permission state observed when the OS refused
        permission: PermissionStatus,
    },

    #[error("global input events are not available on {platform}")]
    Unavailable { platform: &'static str },

    #[error("an event tap is already registered in this process")]
    AlreadyClaimed,

    #[error("OS refused to remove the event tap: {reason}")]
    TeardownFailed { reason: String },
}

impl TapError {
    /// True when granting permission in system settings may fix the error
    pub fn is_permission_related(&self) -> bool {
        matches!(
            self,
            TapError::RegistrationFailed {
                permission: PermissionStatus::NotAuthorized,
                ..
            }
        )
    }
}

/// Cancellation flag shared between `stop()` and the dispatch loop
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Interrupts a blocking dispatch loop from another thread
pub struct LoopWaker(Option<Box<dyn Fn() + Send>>);

impl LoopWaker {
    pub fn new<F>(wake: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        Self(Some(Box::new(wake)))
    }

    /// For loops that poll their stop token on their own
    pub fn polling() -> Self {
        Self(None)
    }

    pub fn wake(&self) {
        if let Some(wake) = &self.0 {
            wake();
        }
    }
}

impl std::fmt::Debug for LoopWaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LoopWaker")
            .field(&if self.0.is_some() { "signal" } else { "polling" })
            .finish()
    }
}

/// A live tap, pinned to the thread that registered it
pub trait TapRegistration {
    /// Handle used by other threads to break out of [`dispatch`](Self::dispatch)
    fn waker(&self) -> LoopWaker;

    /// Pump OS events until `stop` is cancelled
    fn dispatch(&mut self, stop: &StopToken);

    /// Remove the tap. No callbacks fire after this returns.
    fn unregister(self: Box<Self>) -> Result<(), TapError>;
}

/// OS capability surface: permission gate plus event tap registration
pub trait InputBackend: Send + Sync + 'static {
    fn info(&self) -> PlatformInfo;

    /// Query the current authorization without side effects
    fn check_permission(&self) -> PermissionStatus;

    /// Prompt for authorization if missing; may show OS UI
    fn request_permission(&self) -> PermissionStatus;

    /// Open the OS panel where the user grants input monitoring access
    fn open_permission_settings(&self) {}

    /// Install the tap on the calling thread
    ///
    /// Taps and hooks are thread-affine, so the returned registration must
    /// be dispatched and unregistered on the same thread.
    fn register(&self, sink: TransitionSink) -> Result<Box<dyn TapRegistration>, TapError>;
}

/// Backend for the OS this binary was built for
pub fn default_backend() -> Arc<dyn InputBackend> {
    #[cfg(target_os = "macos")]
    {
        Arc::new(MacBackend::new())
    }
    #[cfg(target_os = "windows")]
    {
        Arc::new(WindowsBackend::new())
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        Arc::new(UnsupportedBackend::new())
    }
}

#[cfg(any(target_os = "macos", target_os = "windows"))]
static OS_TAP_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Process-wide reservation of the single OS tap, released on drop
#[cfg(any(target_os = "macos", target_os = "windows"))]
#[derive(Debug)]
pub(crate) struct TapClaim(());

#[cfg(any(target_os = "macos", target_os = "windows"))]
impl TapClaim {
    pub(crate) fn acquire() -> Result<Self, TapError> {
        if OS_TAP_CLAIMED.swap(true, Ordering::SeqCst) {
            return Err(TapError::AlreadyClaimed);
        }
        Ok(Self(()))
    }
}

#[cfg(any(target_os = "macos", target_os = "windows"))]
impl Drop for TapClaim {
    fn drop(&mut self) {
        OS_TAP_CLAIMED.store(false, Ordering::SeqCst);
    }
}
