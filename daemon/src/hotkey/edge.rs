//! Edge detection for raw hotkey readings
//!
//! Platform callbacks report a level ("is the key held right now"). The
//! detector turns those levels into edges so redundant OS events never
//! reach the tracker twice.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::events::KeyTransition;
use crate::state::StateTracker;

/// Remembers the last raw level seen by one registration
#[derive(Debug)]
pub struct EdgeDetector {
    held: AtomicBool,
    origin: Instant,
    /// Microseconds since `origin` at the last press
    pressed_at: AtomicU64,
}

impl EdgeDetector {
    pub fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
            origin: Instant::now(),
            pressed_at: AtomicU64::new(0),
        }
    }

    /// Feed one level reading, returning a transition only on change
    pub fn observe(&self, held: bool) -> Option<KeyTransition> {
        if self
            .held
            .compare_exchange(!held, held, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }

        let now = self.origin.elapsed().as_micros() as u64;
        if held {
            self.pressed_at.store(now, Ordering::SeqCst);
            Some(KeyTransition::pressed())
        } else {
            let pressed_at = self.pressed_at.load(Ordering::SeqCst);
            let held_for = Duration::from_micros(now.saturating_sub(pressed_at));
            Some(KeyTransition::released(Some(held_for)))
        }
    }
}

impl Default for EdgeDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback target handed to a platform backend at registration time
///
/// `observe` only performs atomic operations and a queue push, so it is
/// safe to call from the OS event dispatch context.
#[derive(Debug)]
pub struct TransitionSink {
    detector: EdgeDetector,
    tracker: Arc<StateTracker>,
}

impl TransitionSink {
    pub fn new(tracker: Arc<StateTracker>) -> Self {
        Self {
            detector: EdgeDetector::new(),
            tracker,
        }
    }

    /// Feed one raw reading from the OS
    pub fn observe(&self, held: bool) -> Option<KeyTransition> {
        let transition = self.detector.observe(held)?;
        self.tracker.apply(transition);
        Some(transition)
    }
}
