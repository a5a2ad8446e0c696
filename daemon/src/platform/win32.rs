//! F13 key tap using a Windows low-level keyboard hook
//!
//! The hook procedure runs on the thread that installed it, inside that
//! thread's message pump, so the sink is kept in a thread-local.

use std::cell::RefCell;

use tracing::{error, info, warn};
use windows::Win32::Foundation::{LPARAM, LRESULT, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::Input::KeyboardAndMouse::VK_F13;
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, DispatchMessageW, GetMessageW, PeekMessageW, PostThreadMessageW,
    SetWindowsHookExW, TranslateMessage, UnhookWindowsHookEx, HHOOK, KBDLLHOOKSTRUCT, MSG,
    PM_NOREMOVE, WH_KEYBOARD_LL, WM_KEYDOWN, WM_KEYUP, WM_QUIT, WM_SYSKEYDOWN, WM_SYSKEYUP,
    WM_USER,
};

use super::{
    InputBackend, LoopWaker, PermissionStatus, PlatformInfo, StopToken, TapClaim, TapError,
    TapRegistration,
};
use crate::hotkey::TransitionSink;

/// Virtual key tracked on Windows
const HOTKEY_VK: u32 = VK_F13.0 as u32;

thread_local! {
    static SINK: RefCell<Option<TransitionSink>> = const { RefCell::new(None) };
}

/// Map a hook message to a held reading, `None` for unrelated keys
pub(crate) fn classify(vk_code: u32, message: u32) -> Option<bool> {
    if vk_code != HOTKEY_VK {
        return None;
    }
    match message {
        WM_KEYDOWN | WM_SYSKEYDOWN => Some(true),
        WM_KEYUP | WM_SYSKEYUP => Some(false),
        _ => None,
    }
}

extern "system" fn keyboard_hook_proc(ncode: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    unsafe {
        if ncode >= 0 {
            let info = &*(lparam.0 as *const KBDLLHOOKSTRUCT);
            if let Some(held) = classify(info.vkCode, wparam.0 as u32) {
                SINK.with(|slot| {
                    if let Ok(slot) = slot.try_borrow() {
                        if let Some(sink) = slot.as_ref() {
                            sink.observe(held);
                        }
                    }
                });
            }
        }

        CallNextHookEx(None, ncode, wparam, lparam)
    }
}

/// Low-level keyboard hook backend tracking F13
#[derive(Debug, Default)]
pub struct WindowsBackend;

impl WindowsBackend {
    pub fn new() -> Self {
        Self
    }
}

impl InputBackend for WindowsBackend {
    fn info(&self) -> PlatformInfo {
        PlatformInfo {
            platform: "Windows".to_string(),
            hotkey_name: "F13 Key".to_string(),
            requires_accessibility_permission: false,
        }
    }

    // Desktop processes may install keyboard hooks without consent
    fn check_permission(&self) -> PermissionStatus {
        PermissionStatus::Authorized
    }

    fn request_permission(&self) -> PermissionStatus {
        PermissionStatus::Authorized
    }

    fn register(&self, sink: TransitionSink) -> Result<Box<dyn TapRegistration>, TapError> {
        let claim = TapClaim::acquire()?;
        let thread_id = unsafe { GetCurrentThreadId() };

        // Create this thread's message queue so WM_QUIT can be posted to it
        let mut msg = MSG::default();
        unsafe {
            let _ = PeekMessageW(&mut msg, None, WM_USER, WM_USER, PM_NOREMOVE);
        }

        SINK.with(|slot| *slot.borrow_mut() = Some(sink));

        let hook = unsafe { SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_hook_proc), None, 0) }
            .map_err(|e| {
                SINK.with(|slot| slot.borrow_mut().take());
                error!(?e, "failed to install keyboard hook");
                TapError::RegistrationFailed {
                    reason: e.to_string(),
                    permission: PermissionStatus::Authorized,
                }
            })?;

        info!(thread_id, "keyboard hook installed");

        Ok(Box::new(WindowsRegistration {
            hook,
            thread_id,
            _claim: claim,
        }))
    }
}

struct WindowsRegistration {
    hook: HHOOK,
    thread_id: u32,
    _claim: TapClaim,
}

impl TapRegistration for WindowsRegistration {
    fn waker(&self) -> LoopWaker {
        let thread_id = self.thread_id;
        LoopWaker::new(move || unsafe {
            if let Err(e) = PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) {
                warn!(?e, "failed to post WM_QUIT to listener thread");
            }
        })
    }

    fn dispatch(&mut self, stop: &StopToken) {
        let mut msg = MSG::default();
        while !stop.is_cancelled() {
            // 0 on WM_QUIT, -1 on error
            let ret = unsafe { GetMessageW(&mut msg, None, 0, 0) };
            if ret.0 <= 0 {
                if ret.0 < 0 {
                    warn!("GetMessageW failed, leaving dispatch loop");
                }
                break;
            }
            unsafe {
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }
    }

    fn unregister(self: Box<Self>) -> Result<(), TapError> {
        let result = unsafe { UnhookWindowsHookEx(self.hook) };
        SINK.with(|slot| slot.borrow_mut().take());

        result.map_err(|e| TapError::TeardownFailed {
            reason: e.to_string(),
        })?;
        info!("keyboard hook removed");
        Ok(())
    }
}
