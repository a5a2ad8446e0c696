//! Global hotkey listener lifecycle
//!
//! Owns the dedicated listener thread. The thread registers the platform
//! tap, reports back, then blocks in the platform dispatch loop until
//! `stop()` cancels it. Registration and teardown both happen on that
//! thread because OS taps are thread-affine.

use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::edge::TransitionSink;
use crate::events::{KeyState, KeyTransition};
use crate::platform::{
    self, InputBackend, LoopWaker, PermissionStatus, PlatformInfo, StopToken, TapError,
};
use crate::state::{StateTracker, SubscriptionId};

/// Observable lifecycle phase of a [`HotkeyListener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerPhase {
    /// Never started, or the last start failed
    Idle,
    /// Tap registration in progress
    Registering,
    /// Tap live, dispatch loop running
    Running,
    /// Stopped after running
    Stopped,
}

impl std::fmt::Display for ListenerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerPhase::Idle => write!(f, "Idle"),
            ListenerPhase::Registering => write!(f, "Registering"),
            ListenerPhase::Running => write!(f, "Running"),
            ListenerPhase::Stopped => write!(f, "Stopped"),
        }
    }
}

enum Phase {
    Idle,
    Registering,
    Running(ListenerHandle),
    Stopped,
}

impl Phase {
    fn public(&self) -> ListenerPhase {
        match self {
            Phase::Idle => ListenerPhase::Idle,
            Phase::Registering => ListenerPhase::Registering,
            Phase::Running(_) => ListenerPhase::Running,
            Phase::Stopped => ListenerPhase::Stopped,
        }
    }
}

/// The registered tap together with the thread dispatching it
///
/// Only the listener holds one; it is consumed by teardown.
struct ListenerHandle {
    stop: StopToken,
    waker: LoopWaker,
    thread: JoinHandle<Result<(), TapError>>,
}

impl ListenerHandle {
    /// Cancel the loop, wait for the thread to remove the tap and exit
    fn shutdown(self) -> Result<(), HotkeyError> {
        self.stop.cancel();
        self.waker.wake();

        match self.thread.join() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(?e, "failed to remove event tap");
                Err(HotkeyError::TeardownFailed(e.to_string()))
            }
            Err(_) => {
                warn!("hotkey listener thread panicked");
                Err(HotkeyError::TeardownFailed(
                    "listener thread panicked".to_string(),
                ))
            }
        }
    }
}

/// Global hotkey listener tracking press/release of the platform hotkey
pub struct HotkeyListener {
    backend: Arc<dyn InputBackend>,
    tracker: Arc<StateTracker>,
    phase: Mutex<Phase>,
}

impl HotkeyListener {
    /// Create a listener publishing into `tracker`
    pub fn new(backend: Arc<dyn InputBackend>, tracker: Arc<StateTracker>) -> Self {
        Self {
            backend,
            tracker,
            phase: Mutex::new(Phase::Idle),
        }
    }

    /// Create a listener for the OS this binary was built for
    pub fn for_current_platform(tracker: Arc<StateTracker>) -> Self {
        Self::new(platform::default_backend(), tracker)
    }

    pub fn platform_info(&self) -> PlatformInfo {
        self.backend.info()
    }

    /// Current OS authorization, queried fresh each call
    pub fn check_permission(&self) -> PermissionStatus {
        self.backend.check_permission()
    }

    /// Ask the OS for authorization, falling back to the settings panel
    pub fn request_permission(&self) -> PermissionStatus {
        let status = self.backend.request_permission();
        info!(%status, "permission request finished");
        status
    }

    /// Fail with `PermissionDenied` unless currently authorized
    pub fn require_permission(&self) -> Result<(), HotkeyError> {
        if self.check_permission().is_authorized() {
            Ok(())
        } else {
            Err(HotkeyError::PermissionDenied)
        }
    }

    pub fn open_permission_settings(&self) {
        self.backend.open_permission_settings();
    }

    /// Start the hotkey listener
    ///
    /// Spawns a dedicated thread that registers the tap and runs the
    /// platform dispatch loop. Returns once the tap is live, or with the
    /// registration error, in which case the listener is back to Idle.
    /// Missing permission is logged but does not short-circuit: the OS
    /// decides whether the tap can be created.
    pub fn start(&self) -> Result<(), HotkeyError> {
        {
            let mut phase = self.phase.lock();
            if matches!(*phase, Phase::Registering | Phase::Running(_)) {
                return Err(HotkeyError::AlreadyRunning);
            }
            *phase = Phase::Registering;
        }

        match self.spawn_listener() {
            Ok(handle) => {
                *self.phase.lock() = Phase::Running(handle);
                info!("hotkey listener running");
                Ok(())
            }
            Err(e) => {
                *self.phase.lock() = Phase::Idle;
                Err(e)
            }
        }
    }

    /// Stop the hotkey listener
    ///
    /// Removes the tap, then joins the thread. A no-op when Idle or
    /// Stopped. While a start is still registering the tap this fails with
    /// `RegistrationInProgress` and leaves the phase alone; retry once
    /// `start` returns. The listener ends up Stopped even when teardown
    /// fails.
    pub fn stop(&self) -> Result<(), HotkeyError> {
        let handle = {
            let mut phase = self.phase.lock();
            match std::mem::replace(&mut *phase, Phase::Stopped) {
                Phase::Running(handle) => handle,
                Phase::Registering => {
                    *phase = Phase::Registering;
                    return Err(HotkeyError::RegistrationInProgress);
                }
                other => {
                    *phase = other;
                    return Ok(());
                }
            }
        };

        let result = handle.shutdown();

        // No tap anymore, so nothing will ever report the release
        if self.tracker.apply(KeyTransition::released(None)) {
            debug!("released hotkey still held at stop");
        }

        info!("hotkey listener stopped");
        result
    }

    pub fn phase(&self) -> ListenerPhase {
        self.phase.lock().public()
    }

    /// Check if the listener is currently running
    pub fn is_running(&self) -> bool {
        self.phase() == ListenerPhase::Running
    }

    pub fn current_key_state(&self) -> KeyState {
        self.tracker.current()
    }

    pub fn subscribe(&self) -> std::io::Result<broadcast::Receiver<KeyTransition>> {
        self.tracker.subscribe()
    }

    pub fn subscribe_fn<F>(&self, callback: F) -> std::io::Result<SubscriptionId>
    where
        F: Fn(KeyTransition) + Send + Sync + 'static,
    {
        self.tracker.subscribe_fn(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.tracker.unsubscribe(id)
    }

    fn spawn_listener(&self) -> Result<ListenerHandle, HotkeyError> {
        let permission = self.backend.check_permission();
        if permission.is_authorized() {
            debug!(%permission, "input monitoring permission");
        } else {
            warn!(
                %permission,
                "input monitoring not authorized, attempting registration anyway - grant access in system settings"
            );
        }

        let stop = StopToken::new();
        let token = stop.clone();
        let backend = Arc::clone(&self.backend);
        let sink = TransitionSink::new(Arc::clone(&self.tracker));
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || run_listener(backend, sink, token, ready_tx))
            .map_err(|e| HotkeyError::ThreadSpawn(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(waker)) => Ok(ListenerHandle {
                stop,
                waker,
                thread,
            }),
            Ok(Err(e)) => {
                join_failed(thread);
                match e {
                    TapError::AlreadyClaimed => Err(HotkeyError::AlreadyRunning),
                    e => {
                        error!(
                            error = %e,
                            permission_related = e.is_permission_related(),
                            "failed to register event tap"
                        );
                        Err(HotkeyError::Registration(e))
                    }
                }
            }
            Err(_) => {
                join_failed(thread);
                error!("hotkey listener thread exited before registering");
                Err(HotkeyError::ThreadSpawn(
                    "listener thread exited before registering".to_string(),
                ))
            }
        }
    }
}

impl Drop for HotkeyListener {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(?e, "hotkey listener teardown failed on drop");
        }
    }
}

impl std::fmt::Debug for HotkeyListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotkeyListener")
            .field("phase", &self.phase())
            .field("key_state", &self.current_key_state())
            .finish()
    }
}

/// Errors that can occur in the hotkey listener
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("hotkey listener is already running")]
    AlreadyRunning,

    #[error("input monitoring permission not granted - enable it in system settings")]
    PermissionDenied,

    #[error("failed to register event tap: {0}")]
    Registration(#[from] TapError),

    #[error("hotkey listener is still registering its tap")]
    RegistrationInProgress,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),

    #[error("failed to tear down event tap: {0}")]
    TeardownFailed(String),
}

/// Reap a listener thread that never got its tap running
fn join_failed(thread: JoinHandle<Result<(), TapError>>) {
    match thread.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(?e, "failed to remove event tap"),
        Err(_) => warn!("hotkey listener thread panicked"),
    }
}

/// Body of the listener thread
fn run_listener(
    backend: Arc<dyn InputBackend>,
    sink: TransitionSink,
    stop: StopToken,
    ready_tx: mpsc::Sender<Result<LoopWaker, TapError>>,
) -> Result<(), TapError> {
    info!("hotkey listener thread started");

    let mut registration = match backend.register(sink) {
        Ok(registration) => registration,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return Ok(());
        }
    };

    if ready_tx.send(Ok(registration.waker())).is_err() {
        return registration.unregister();
    }

    registration.dispatch(&stop);
    if !stop.is_cancelled() {
        warn!("dispatch loop ended before stop was requested");
    }

    let result = registration.unregister();
    info!("hotkey listener thread stopped");
    result
}
