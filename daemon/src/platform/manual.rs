//! In-process backend driven by injected readings
//!
//! Behaves like an OS tap from the listener's point of view: registration
//! happens on the listener thread and readings are delivered on it, but the
//! readings come from a [`ManualInjector`] instead of the OS.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::{
    InputBackend, LoopWaker, PermissionStatus, PlatformInfo, StopToken, TapError,
    TapRegistration,
};
use crate::hotkey::TransitionSink;

enum RawSignal {
    Level(bool),
    Wake,
}

#[derive(Default)]
struct Shared {
    tx: Mutex<Option<mpsc::Sender<RawSignal>>>,
    denied: AtomicBool,
    refuse_registration: AtomicBool,
    refuse_teardown: AtomicBool,
    registration_delay_ms: AtomicU64,
    registrations: AtomicUsize,
    permission_prompts: AtomicUsize,
    active: AtomicBool,
}

/// Backend whose raw readings are pushed by hand
#[derive(Clone, Default)]
pub struct ManualBackend {
    shared: Arc<Shared>,
}

impl ManualBackend {
    /// Authorized backend that accepts registrations
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for pushing readings into the active registration
    pub fn injector(&self) -> ManualInjector {
        ManualInjector {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn set_permission(&self, status: PermissionStatus) {
        self.shared
            .denied
            .store(!status.is_authorized(), Ordering::SeqCst);
    }

    /// Make subsequent `register` calls fail like a refused OS tap
    pub fn refuse_registration(&self, refuse: bool) {
        self.shared.refuse_registration.store(refuse, Ordering::SeqCst);
    }

    /// Make subsequent `unregister` calls fail
    pub fn refuse_teardown(&self, refuse: bool) {
        self.shared.refuse_teardown.store(refuse, Ordering::SeqCst);
    }

    /// Make subsequent `register` calls take at least `delay`
    pub fn delay_registration(&self, delay: Duration) {
        self.shared
            .registration_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Successful registrations so far
    pub fn registrations(&self) -> usize {
        self.shared.registrations.load(Ordering::SeqCst)
    }

    /// Times `request_permission` was called
    pub fn permission_prompts(&self) -> usize {
        self.shared.permission_prompts.load(Ordering::SeqCst)
    }

    /// Whether a registration is currently live
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ManualBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualBackend")
            .field("active", &self.is_active())
            .field("registrations", &self.registrations())
            .finish()
    }
}

impl InputBackend for ManualBackend {
    fn info(&self) -> PlatformInfo {
        PlatformInfo {
            platform: "manual".to_string(),
            hotkey_name: "Manual Key".to_string(),
            requires_accessibility_permission: false,
        }
    }

    fn check_permission(&self) -> PermissionStatus {
        PermissionStatus::from_trusted(!self.shared.denied.load(Ordering::SeqCst))
    }

    fn request_permission(&self) -> PermissionStatus {
        self.shared.permission_prompts.fetch_add(1, Ordering::SeqCst);
        self.check_permission()
    }

    fn register(&self, sink: TransitionSink) -> Result<Box<dyn TapRegistration>, TapError> {
        let delay = self.shared.registration_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }

        if self.shared.refuse_registration.load(Ordering::SeqCst) {
            return Err(TapError::RegistrationFailed {
                reason: "registration refused".to_string(),
                permission: self.check_permission(),
            });
        }

        let (tx, rx) = mpsc::channel();
        *self.shared.tx.lock() = Some(tx.clone());
        self.shared.registrations.fetch_add(1, Ordering::SeqCst);
        self.shared.active.store(true, Ordering::SeqCst);
        debug!("manual tap registered");

        Ok(Box::new(ManualRegistration {
            rx,
            wake_tx: tx,
            sink,
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct ManualRegistration {
    rx: mpsc::Receiver<RawSignal>,
    wake_tx: mpsc::Sender<RawSignal>,
    sink: TransitionSink,
    shared: Arc<Shared>,
}

impl TapRegistration for ManualRegistration {
    fn waker(&self) -> LoopWaker {
        let tx = self.wake_tx.clone();
        LoopWaker::new(move || {
            let _ = tx.send(RawSignal::Wake);
        })
    }

    fn dispatch(&mut self, stop: &StopToken) {
        while !stop.is_cancelled() {
            match self.rx.recv() {
                Ok(RawSignal::Level(held)) => {
                    self.sink.observe(held);
                }
                Ok(RawSignal::Wake) => {}
                Err(_) => break,
            }
        }
    }

    fn unregister(self: Box<Self>) -> Result<(), TapError> {
        *self.shared.tx.lock() = None;
        self.shared.active.store(false, Ordering::SeqCst);

        if self.shared.refuse_teardown.load(Ordering::SeqCst) {
            return Err(TapError::TeardownFailed {
                reason: "teardown refused".to_string(),
            });
        }
        debug!("manual tap unregistered");
        Ok(())
    }
}

/// Pushes raw "is the key held" readings into a [`ManualBackend`]
#[derive(Clone)]
pub struct ManualInjector {
    shared: Arc<Shared>,
}

impl ManualInjector {
    /// Deliver a raw reading. Returns `false` when no tap is registered.
    pub fn send_level(&self, held: bool) -> bool {
        match self.shared.tx.lock().as_ref() {
            Some(tx) => tx.send(RawSignal::Level(held)).is_ok(),
            None => false,
        }
    }

    pub fn press(&self) -> bool {
        self.send_level(true)
    }

    pub fn release(&self) -> bool {
        self.send_level(false)
    }
}

impl std::fmt::Debug for ManualInjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualInjector").finish_non_exhaustive()
    }
}
