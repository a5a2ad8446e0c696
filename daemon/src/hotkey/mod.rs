//! Hotkey module for global keyboard event listening
//!
//! Turns raw OS readings of the platform hotkey (Fn on macOS, F13 on
//! Windows) into edges, and manages the listener thread that hosts the tap.

mod edge;
mod listener;

pub use edge::{EdgeDetector, TransitionSink};
pub use listener::{HotkeyError, HotkeyListener, ListenerPhase};
