//! Fallback for operating systems without a global tap implementation

use tracing::warn;

use super::{InputBackend, PermissionStatus, PlatformInfo, TapError, TapRegistration};
use crate::hotkey::TransitionSink;

/// Reports the OS API as unavailable instead of silently delivering nothing
#[derive(Debug, Default)]
pub struct UnsupportedBackend;

impl UnsupportedBackend {
    pub fn new() -> Self {
        Self
    }
}

impl InputBackend for UnsupportedBackend {
    fn info(&self) -> PlatformInfo {
        PlatformInfo {
            platform: std::env::consts::OS.to_string(),
            hotkey_name: "none".to_string(),
            requires_accessibility_permission: false,
        }
    }

    fn check_permission(&self) -> PermissionStatus {
        PermissionStatus::NotAuthorized
    }

    fn request_permission(&self) -> PermissionStatus {
        PermissionStatus::NotAuthorized
    }

    fn register(&self, _sink: TransitionSink) -> Result<Box<dyn TapRegistration>, TapError> {
        warn!(os = std::env::consts::OS, "no global input tap for this platform");
        Err(TapError::Unavailable {
            platform: std::env::consts::OS,
        })
    }
}
