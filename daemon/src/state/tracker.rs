//! Hotkey state tracker
//!
//! Holds the current pressed/released state in a single atomic cell and
//! fans transitions out to subscribers through a queued hand-off, so the
//! event tap callback never waits on a consumer.
//!
//! The tap side only performs a compare-and-set and a push onto an unbounded
//! lock-free queue. A dispatcher thread drains that queue, forwards each
//! transition to the broadcast receivers and then runs the callbacks, so a
//! slow callback delays delivery but never drops an edge.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::events::{KeyState, KeyTransition};

/// Default size of the transition queue
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

type Observer = Arc<dyn Fn(KeyTransition) + Send + Sync>;
type Observers = Arc<RwLock<Vec<(SubscriptionId, Observer)>>>;

/// Identifies a callback registered with [`StateTracker::subscribe_fn`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Thread-safe owner of the tracked key state
pub struct StateTracker {
    state: AtomicU8,
    queue_tx: mpsc::Sender<KeyTransition>,
    queue_rx: Arc<Mutex<Option<mpsc::Receiver<KeyTransition>>>>,
    dispatching: AtomicBool,
    dispatcher_started: Mutex<bool>,
    events_tx: broadcast::Sender<KeyTransition>,
    observers: Observers,
    next_id: AtomicU64,
}

impl StateTracker {
    /// Create a tracker in the `Released` state
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create a tracker whose broadcast queue holds `capacity` entries
    ///
    /// The capacity bounds only [`subscribe`](Self::subscribe) receivers.
    /// Callbacks are fed from an unbounded queue.
    pub fn with_capacity(capacity: usize) -> Self {
        let (events_tx, _) = broadcast::channel(capacity.max(1));
        let (queue_tx, queue_rx) = mpsc::channel();
        Self {
            state: AtomicU8::new(KeyState::Released.as_u8()),
            queue_tx,
            queue_rx: Arc::new(Mutex::new(Some(queue_rx))),
            dispatching: AtomicBool::new(false),
            dispatcher_started: Mutex::new(false),
            events_tx,
            observers: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Snapshot of the current state
    pub fn current(&self) -> KeyState {
        KeyState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Apply a transition
    ///
    /// Returns `true` when the state changed. A transition into the state
    /// already held is a no-op and publishes nothing.
    pub fn apply(&self, transition: KeyTransition) -> bool {
        let target = transition.state;
        let from = KeyState::from_held(!target.is_pressed());

        if self
            .state
            .compare_exchange(from.as_u8(), target.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        // Nothing is queued until someone subscribes
        if self.dispatching.load(Ordering::SeqCst) {
            // Err only means the dispatcher is gone
            let _ = self.queue_tx.send(transition);
        }
        true
    }

    /// Subscribe to transitions through a queued receiver
    ///
    /// A receiver that falls more than the queue capacity behind observes
    /// `RecvError::Lagged` instead of slowing the publisher down.
    pub fn subscribe(&self) -> io::Result<broadcast::Receiver<KeyTransition>> {
        let rx = self.events_tx.subscribe();
        self.ensure_dispatcher()?;
        Ok(rx)
    }

    /// Register a callback invoked for every transition
    ///
    /// Callbacks run on a dedicated notifier thread in registration order
    /// and see every edge, however long they take.
    pub fn subscribe_fn<F>(&self, callback: F) -> io::Result<SubscriptionId>
    where
        F: Fn(KeyTransition) + Send + Sync + 'static,
    {
        self.ensure_dispatcher()?;

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, Arc::new(callback)));
        Ok(id)
    }

    /// Remove a callback. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Number of registered callbacks
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    fn ensure_dispatcher(&self) -> io::Result<()> {
        let mut started = self.dispatcher_started.lock();
        if *started {
            return Ok(());
        }

        let queue = Arc::clone(&self.queue_rx);
        let events_tx = self.events_tx.clone();
        let observers = Arc::clone(&self.observers);

        // The receiver stays in its slot if the spawn fails, so a later
        // subscription can retry
        thread::Builder::new()
            .name("hotkey-notifier".to_string())
            .spawn(move || {
                if let Some(rx) = queue.lock().take() {
                    run_dispatcher(rx, events_tx, observers);
                }
            })
            .map_err(|e| {
                error!(?e, "failed to spawn notifier thread");
                e
            })?;

        self.dispatching.store(true, Ordering::SeqCst);
        *started = true;
        Ok(())
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateTracker")
            .field("state", &self.current())
            .field("observers", &self.observer_count())
            .finish()
    }
}

/// Deliver queued transitions until the tracker is dropped
fn run_dispatcher(
    rx: mpsc::Receiver<KeyTransition>,
    events_tx: broadcast::Sender<KeyTransition>,
    observers: Observers,
) {
    info!("notifier thread started");

    while let Ok(transition) = rx.recv() {
        debug!(to = %transition.state, held_for = ?transition.held_for, "key state changed");

        // Err only means no receiver is listening right now
        let _ = events_tx.send(transition);

        // Snapshot so callbacks may (un)subscribe without deadlocking
        let snapshot: Vec<Observer> =
            observers.read().iter().map(|(_, cb)| Arc::clone(cb)).collect();
        for callback in snapshot {
            callback(transition);
        }
    }

    info!("notifier thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn transition(state: KeyState) -> KeyTransition {
        match state {
            KeyState::Pressed => KeyTransition::pressed(),
            KeyState::Released => KeyTransition::released(None),
        }
    }

    #[test]
    fn test_initial_state() {
        let tracker = StateTracker::new();
        assert_eq!(tracker.current(), KeyState::Released);
    }

    #[test]
    fn test_duplicate_signals_are_noops() {
        let tracker = StateTracker::new();

        assert!(tracker.apply(transition(KeyState::Pressed)));
        assert!(!tracker.apply(transition(KeyState::Pressed)));
        assert_eq!(tracker.current(), KeyState::Pressed);

        assert!(tracker.apply(transition(KeyState::Released)));
        assert!(!tracker.apply(transition(KeyState::Released)));
        assert_eq!(tracker.current(), KeyState::Released);
    }

    #[test]
    fn test_release_from_initial_state_is_noop() {
        let tracker = StateTracker::new();
        let mut rx = tracker.subscribe().unwrap();

        assert!(!tracker.apply(transition(KeyState::Released)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_subscriber_sees_only_edges() {
        let tracker = StateTracker::new();
        let mut rx = tracker.subscribe().unwrap();

        for state in [KeyState::Pressed, KeyState::Pressed, KeyState::Released] {
            tracker.apply(transition(state));
        }

        let first = tokio_test::block_on(rx.recv()).unwrap();
        let second = tokio_test::block_on(rx.recv()).unwrap();
        assert_eq!(first.state, KeyState::Pressed);
        assert_eq!(second.state, KeyState::Released);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_slow_receiver_lags_instead_of_blocking() {
        let tracker = StateTracker::with_capacity(2);
        let mut rx = tracker.subscribe().unwrap();

        // Callbacks run after the broadcast, so the eighth one means all
        // eight transitions have been published
        let (done_tx, done_rx) = mpsc::channel();
        let count = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&count);
        tracker
            .subscribe_fn(move |_| {
                if seen.fetch_add(1, Ordering::SeqCst) + 1 == 8 {
                    let _ = done_tx.send(());
                }
            })
            .unwrap();

        for _ in 0..4 {
            assert!(tracker.apply(transition(KeyState::Pressed)));
            assert!(tracker.apply(transition(KeyState::Released)));
        }
        done_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));
    }

    #[test]
    fn test_slow_callback_sees_every_edge() {
        let tracker = StateTracker::with_capacity(4);
        let (tx, rx) = mpsc::channel();
        tracker
            .subscribe_fn(move |t| {
                thread::sleep(Duration::from_millis(5));
                let _ = tx.send(t.state);
            })
            .unwrap();

        for i in 0..41 {
            let state = if i % 2 == 0 {
                KeyState::Pressed
            } else {
                KeyState::Released
            };
            assert!(tracker.apply(transition(state)));
        }

        let seen: Vec<KeyState> = (0..41)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(seen[0], KeyState::Pressed);
        assert!(seen.windows(2).all(|pair| pair[0] != pair[1]));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_transitions_before_subscription_are_not_replayed() {
        let tracker = StateTracker::new();
        tracker.apply(transition(KeyState::Pressed));

        let mut rx = tracker.subscribe().unwrap();
        tracker.apply(transition(KeyState::Released));

        let first = tokio_test::block_on(rx.recv()).unwrap();
        assert_eq!(first.state, KeyState::Released);
    }

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let tracker = StateTracker::new();
        let (tx, rx) = mpsc::channel();

        for tag in 0..3 {
            let tx = tx.clone();
            tracker
                .subscribe_fn(move |t| {
                    let _ = tx.send((tag, t.state));
                })
                .unwrap();
        }

        tracker.apply(transition(KeyState::Pressed));

        let seen: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(
            seen,
            vec![
                (0, KeyState::Pressed),
                (1, KeyState::Pressed),
                (2, KeyState::Pressed)
            ]
        );
    }

    #[test]
    fn test_unsubscribe() {
        let tracker = StateTracker::new();
        let id = tracker.subscribe_fn(|_| {}).unwrap();
        assert_eq!(tracker.observer_count(), 1);

        assert!(tracker.unsubscribe(id));
        assert!(!tracker.unsubscribe(id));
        assert_eq!(tracker.observer_count(), 0);
    }

    #[test]
    fn test_concurrent_reads_never_tear() {
        let tracker = Arc::new(StateTracker::new());

        thread::scope(|scope| {
            let writer = Arc::clone(&tracker);
            scope.spawn(move || {
                for i in 0..1000 {
                    let state = if i % 2 == 0 {
                        KeyState::Pressed
                    } else {
                        KeyState::Released
                    };
                    writer.apply(transition(state));
                }
            });

            for _ in 0..4 {
                let reader = Arc::clone(&tracker);
                scope.spawn(move || {
                    for _ in 0..1000 {
                        let raw = reader.state.load(Ordering::SeqCst);
                        assert!(raw <= 1, "torn read: {raw}");
                        let state = reader.current();
                        assert!(matches!(state, KeyState::Released | KeyState::Pressed));
                    }
                });
            }
        });

        // 1000 alternating transitions end on Released
        assert_eq!(tracker.current(), KeyState::Released);
    }
}
