//! fnkey: global Fn / F13 hotkey state tracking
//!
//! Taps the OS input stream for a single hotkey and publishes whether it
//! is held:
//! - macOS: the Fn modifier, via CGEventTap (needs Accessibility access)
//! - Windows: F13, via a low-level keyboard hook
//!
//! Readings flow from the platform tap through an edge detector into a
//! [`StateTracker`], which consumers poll or subscribe to. The
//! [`HotkeyListener`] owns the background thread hosting the tap.

pub mod config;
pub mod events;
pub mod hotkey;
pub mod lifecycle;
pub mod platform;
pub mod state;

pub use config::Config;
pub use events::{KeyState, KeyTransition};
pub use hotkey::{HotkeyError, HotkeyListener, ListenerPhase};
pub use platform::{InputBackend, PermissionStatus, PlatformInfo, TapError};
pub use state::StateTracker;
