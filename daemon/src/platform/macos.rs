//! Fn key tap using macOS CGEventTap
//!
//! Listens to `FlagsChanged` events on the session tap and reads the
//! secondary-Fn flag. The tap runs on the listener thread's own CFRunLoop.

use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use core_foundation::base::TCFType;
use core_foundation::boolean::CFBoolean;
use core_foundation::dictionary::{CFDictionary, CFDictionaryRef};
use core_foundation::runloop::{
    kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop, CFRunLoopSource,
};
use core_foundation::string::{CFString, CFStringRef};
use core_graphics::event::{
    CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
    CGEventTapPlacement, CGEventTapProxy, CGEventType,
};
use tracing::{error, info, warn};

use super::{
    InputBackend, LoopWaker, PermissionStatus, PlatformInfo, StopToken, TapClaim, TapError,
    TapRegistration,
};
use crate::hotkey::TransitionSink;

const ACCESSIBILITY_SETTINGS_URL: &str =
    "x-apple.systempreferences:com.apple.preference.security?Privacy_Accessibility";

/// How long the run loop sleeps before re-checking the stop token
const LOOP_SLICE: Duration = Duration::from_millis(100);

#[link(name = "ApplicationServices", kind = "framework")]
extern "C" {
    fn AXIsProcessTrusted() -> bool;
    fn AXIsProcessTrustedWithOptions(options: CFDictionaryRef) -> bool;
    static kAXTrustedCheckOptionPrompt: CFStringRef;
}

/// Whether the Fn modifier is down according to an event's flags
pub(crate) fn fn_held(flags: CGEventFlags) -> bool {
    flags.contains(CGEventFlags::CGEventFlagSecondaryFn)
}

/// CGEventTap backend tracking the Fn key
#[derive(Debug, Default)]
pub struct MacBackend;

impl MacBackend {
    pub fn new() -> Self {
        Self
    }
}

impl InputBackend for MacBackend {
    fn info(&self) -> PlatformInfo {
        PlatformInfo {
            platform: "macOS".to_string(),
            hotkey_name: "Fn Key".to_string(),
            requires_accessibility_permission: true,
        }
    }

    fn check_permission(&self) -> PermissionStatus {
        PermissionStatus::from_trusted(unsafe { AXIsProcessTrusted() })
    }

    fn request_permission(&self) -> PermissionStatus {
        if self.check_permission().is_authorized() {
            info!("process already trusted for accessibility");
            return PermissionStatus::Authorized;
        }

        // Shows the system consent dialog
        let options = CFDictionary::from_CFType_pairs(&[(
            unsafe { CFString::wrap_under_get_rule(kAXTrustedCheckOptionPrompt) },
            CFBoolean::true_value(),
        )]);
        let trusted = unsafe { AXIsProcessTrustedWithOptions(options.as_concrete_TypeRef()) };
        let status = PermissionStatus::from_trusted(trusted);

        if !trusted {
            warn!("accessibility access not granted inline, opening System Settings");
            self.open_permission_settings();
        }
        status
    }

    fn open_permission_settings(&self) {
        match Command::new("open").arg(ACCESSIBILITY_SETTINGS_URL).status() {
            Ok(status) if status.success() => info!("opened accessibility settings"),
            Ok(status) => warn!(?status, "failed to open accessibility settings"),
            Err(e) => warn!(?e, "failed to open accessibility settings"),
        }
    }

    fn register(&self, sink: TransitionSink) -> Result<Box<dyn TapRegistration>, TapError> {
        let claim = TapClaim::acquire()?;

        let disabled = Arc::new(AtomicBool::new(false));
        let disabled_flag = Arc::clone(&disabled);

        // Runs on the OS dispatch path - atomics and a queue push only
        let callback = move |_proxy: CGEventTapProxy,
                             event_type: CGEventType,
                             event: &CGEvent|
              -> Option<CGEvent> {
            match event_type {
                CGEventType::FlagsChanged => {
                    sink.observe(fn_held(event.get_flags()));
                }
                CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                    disabled_flag.store(true, Ordering::SeqCst);
                }
                _ => {}
            }
            Some(event.clone())
        };

        let tap = CGEventTap::new(
            CGEventTapLocation::Session,
            CGEventTapPlacement::HeadInsertEventTap,
            CGEventTapOptions::ListenOnly,
            vec![CGEventType::FlagsChanged],
            callback,
        )
        .map_err(|_| {
            let permission = self.check_permission();
            error!(%permission, "failed to create event tap");
            TapError::RegistrationFailed {
                reason: "CGEventTapCreate returned NULL".to_string(),
                permission,
            }
        })?;

        let source = tap
            .mach_port
            .create_runloop_source(0)
            .map_err(|_| TapError::RegistrationFailed {
                reason: "failed to create run loop source for event tap".to_string(),
                permission: self.check_permission(),
            })?;

        let run_loop = CFRunLoop::get_current();
        unsafe {
            run_loop.add_source(&source, kCFRunLoopCommonModes);
        }
        tap.enable();

        info!("event tap created and enabled");

        Ok(Box::new(MacRegistration {
            tap,
            source,
            run_loop,
            disabled,
            _claim: claim,
        }))
    }
}

struct MacRegistration {
    tap: CGEventTap<'static>,
    source: CFRunLoopSource,
    run_loop: CFRunLoop,
    disabled: Arc<AtomicBool>,
    _claim: TapClaim,
}

impl TapRegistration for MacRegistration {
    fn waker(&self) -> LoopWaker {
        LoopWaker::polling()
    }

    fn dispatch(&mut self, stop: &StopToken) {
        while !stop.is_cancelled() {
            unsafe {
                CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, LOOP_SLICE, true);
            }

            // macOS turns slow or suspicious taps off; keys may be missed meanwhile
            if self.disabled.swap(false, Ordering::SeqCst) {
                warn!("event tap disabled by the OS, re-enabling");
                self.tap.enable();
            }
        }
    }

    fn unregister(self: Box<Self>) -> Result<(), TapError> {
        unsafe {
            self.run_loop
                .remove_source(&self.source, kCFRunLoopCommonModes);
        }
        // Dropping the tap releases the mach port and the callback
        drop(self);
        info!("event tap removed");
        Ok(())
    }
}
