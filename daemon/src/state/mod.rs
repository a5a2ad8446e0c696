//! State module for the tracked hotkey
//!
//! The tracker keeps a single pressed/released value:
//! - Released: default on every process start
//! - Pressed: while the hotkey is held
//!
//! Consumers either poll `current()` or subscribe to transitions.

mod tracker;

pub use tracker::{StateTracker, SubscriptionId, DEFAULT_EVENT_CAPACITY};
