//! Events module for hotkey state transitions
//!
//! Provides the tracked key state and the transition values that flow
//! from the event tap to the state tracker and its subscribers.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Pressed/released state of the tracked hotkey
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    /// Key is up (initial state on every process start)
    #[default]
    Released,
    /// Key is held down
    Pressed,
}

impl KeyState {
    pub(crate) const fn as_u8(self) -> u8 {
        match self {
            KeyState::Released => 0,
            KeyState::Pressed => 1,
        }
    }

    pub(crate) const fn from_u8(raw: u8) -> Self {
        if raw == 0 {
            KeyState::Released
        } else {
            KeyState::Pressed
        }
    }

    /// Map a raw "is the key held" signal to a state
    pub const fn from_held(held: bool) -> Self {
        if held {
            KeyState::Pressed
        } else {
            KeyState::Released
        }
    }

    pub fn is_pressed(self) -> bool {
        self == KeyState::Pressed
    }
}

impl std::fmt::Display for KeyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyState::Released => write!(f, "RELEASED"),
            KeyState::Pressed => write!(f, "PRESSED"),
        }
    }
}

/// A single edge of the tracked key, produced by the event tap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyTransition {
    /// State the key moved into
    pub state: KeyState,
    /// When the edge was observed
    pub at: Instant,
    /// How long the key was held, set on releases with a known press
    pub held_for: Option<Duration>,
}

impl KeyTransition {
    /// Transition into `Pressed`, stamped now
    pub fn pressed() -> Self {
        Self {
            state: KeyState::Pressed,
            at: Instant::now(),
            held_for: None,
        }
    }

    /// Transition into `Released`, stamped now
    pub fn released(held_for: Option<Duration>) -> Self {
        Self {
            state: KeyState::Released,
            at: Instant::now(),
            held_for,
        }
    }
}

impl std::fmt::Display for KeyTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.held_for {
            Some(held) => write!(f, "{} ({}ms)", self.state, held.as_millis()),
            None => write!(f, "{}", self.state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&KeyState::Pressed).unwrap();
        assert_eq!(json, r#""pressed""#);
    }

    #[test]
    fn test_state_deserialization() {
        let state: KeyState = serde_json::from_str(r#""released""#).unwrap();
        assert_eq!(state, KeyState::Released);
    }

    #[test]
    fn test_default_is_released() {
        assert_eq!(KeyState::default(), KeyState::Released);
        assert!(!KeyState::default().is_pressed());
    }

    #[test]
    fn test_raw_round_trip() {
        for state in [KeyState::Released, KeyState::Pressed] {
            assert_eq!(KeyState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn test_release_display_includes_duration() {
        let t = KeyTransition::released(Some(Duration::from_millis(1500)));
        assert_eq!(t.to_string(), "RELEASED (1500ms)");
        assert_eq!(KeyTransition::pressed().to_string(), "PRESSED");
    }
}
