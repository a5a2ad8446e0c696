//! End-to-end listener behaviour driven through the manual backend

use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use fnkey::hotkey::{HotkeyError, HotkeyListener, ListenerPhase};
use fnkey::platform::{ManualBackend, ManualInjector};
use fnkey::{KeyState, PermissionStatus, StateTracker, TapError};

const WAIT: Duration = Duration::from_secs(2);

fn setup() -> (HotkeyListener, ManualBackend, ManualInjector) {
    let backend = ManualBackend::new();
    let injector = backend.injector();
    let listener = HotkeyListener::new(Arc::new(backend.clone()), Arc::new(StateTracker::new()));
    (listener, backend, injector)
}

fn record(listener: &HotkeyListener) -> mpsc::Receiver<KeyState> {
    let (tx, rx) = mpsc::channel();
    listener
        .subscribe_fn(move |t| {
            let _ = tx.send(t.state);
        })
        .unwrap();
    rx
}

fn wait_for_state(listener: &HotkeyListener, state: KeyState) -> bool {
    for _ in 0..400 {
        if listener.current_key_state() == state {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_duplicate_press_is_suppressed() {
    let (listener, _, injector) = setup();
    let seen = record(&listener);
    listener.start().unwrap();

    assert!(injector.press());
    assert!(injector.press());
    assert!(injector.release());

    assert_eq!(seen.recv_timeout(WAIT).unwrap(), KeyState::Pressed);
    assert_eq!(seen.recv_timeout(WAIT).unwrap(), KeyState::Released);
    assert!(seen.recv_timeout(Duration::from_millis(100)).is_err());

    listener.stop().unwrap();
}

#[test]
fn test_repeated_levels_yield_only_edges() {
    let (listener, _, injector) = setup();
    let seen = record(&listener);
    listener.start().unwrap();

    for held in [true, true, false, false, true, false, false] {
        assert!(injector.send_level(held));
    }

    let edges: Vec<KeyState> = (0..4).map(|_| seen.recv_timeout(WAIT).unwrap()).collect();
    assert_eq!(
        edges,
        vec![
            KeyState::Pressed,
            KeyState::Released,
            KeyState::Pressed,
            KeyState::Released
        ]
    );
    assert!(seen.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_state_preserved_without_events() {
    let (listener, _, _) = setup();
    listener.start().unwrap();
    listener.stop().unwrap();
    assert_eq!(listener.current_key_state(), KeyState::Released);
}

#[test]
fn test_current_state_follows_key() {
    let (listener, _, injector) = setup();
    listener.start().unwrap();

    injector.press();
    assert!(wait_for_state(&listener, KeyState::Pressed));

    injector.release();
    assert!(wait_for_state(&listener, KeyState::Released));
}

#[test]
fn test_stop_releases_held_key() {
    let (listener, _, injector) = setup();
    let seen = record(&listener);
    listener.start().unwrap();

    injector.press();
    assert_eq!(seen.recv_timeout(WAIT).unwrap(), KeyState::Pressed);

    listener.stop().unwrap();
    assert_eq!(listener.current_key_state(), KeyState::Released);
    assert_eq!(seen.recv_timeout(WAIT).unwrap(), KeyState::Released);
}

#[test]
fn test_second_start_keeps_first_registration() {
    let (listener, backend, injector) = setup();
    listener.start().unwrap();

    assert!(matches!(listener.start(), Err(HotkeyError::AlreadyRunning)));
    assert_eq!(backend.registrations(), 1);

    // The first tap still delivers
    injector.press();
    assert!(wait_for_state(&listener, KeyState::Pressed));
}

#[test]
fn test_stop_on_idle_and_stopped_is_noop() {
    let (listener, _, _) = setup();
    assert!(listener.stop().is_ok());
    assert_eq!(listener.phase(), ListenerPhase::Idle);

    listener.start().unwrap();
    listener.stop().unwrap();
    assert!(listener.stop().is_ok());
    assert_eq!(listener.phase(), ListenerPhase::Stopped);
}

#[test]
fn test_not_authorized_still_attempts_registration() {
    let (listener, backend, _) = setup();
    backend.set_permission(PermissionStatus::NotAuthorized);
    assert_eq!(listener.check_permission(), PermissionStatus::NotAuthorized);

    // OS accepts the tap anyway
    listener.start().unwrap();
    assert_eq!(backend.registrations(), 1);
    listener.stop().unwrap();

    // OS refuses the tap: the refusal is what surfaces
    backend.refuse_registration(true);
    match listener.start() {
        Err(HotkeyError::Registration(e @ TapError::RegistrationFailed { .. })) => {
            assert!(e.is_permission_related());
        }
        other => panic!("unexpected start result: {other:?}"),
    }
    assert_eq!(listener.phase(), ListenerPhase::Idle);
    assert_eq!(backend.permission_prompts(), 0);
}

#[test]
fn test_request_permission_delegates_to_backend() {
    let (listener, backend, _) = setup();
    backend.set_permission(PermissionStatus::NotAuthorized);

    assert_eq!(listener.request_permission(), PermissionStatus::NotAuthorized);
    assert_eq!(backend.permission_prompts(), 1);

    backend.set_permission(PermissionStatus::Authorized);
    assert_eq!(listener.request_permission(), PermissionStatus::Authorized);
}

#[test]
fn test_independent_listeners() {
    let (first, _, first_injector) = setup();
    let (second, _, _) = setup();
    first.start().unwrap();
    second.start().unwrap();

    first_injector.press();
    assert!(wait_for_state(&first, KeyState::Pressed));
    assert_eq!(second.current_key_state(), KeyState::Released);
}

#[test]
fn test_release_reports_hold_duration() {
    let (listener, _, injector) = setup();
    let mut rx = listener.subscribe().unwrap();
    listener.start().unwrap();

    injector.press();
    thread::sleep(Duration::from_millis(20));
    injector.release();

    let press = tokio_test::block_on(rx.recv()).unwrap();
    let release = tokio_test::block_on(rx.recv()).unwrap();
    assert_eq!(press.state, KeyState::Pressed);
    assert_eq!(release.state, KeyState::Released);
    assert!(press.held_for.is_none());
    assert!(release.held_for.is_some());
}

#[test]
fn test_concurrent_reads_during_transitions() {
    let (listener, _, injector) = setup();
    let listener = Arc::new(listener);
    listener.start().unwrap();

    thread::scope(|scope| {
        scope.spawn(|| {
            for i in 0..1000 {
                injector.send_level(i % 2 == 0);
            }
        });
        for _ in 0..4 {
            let listener = Arc::clone(&listener);
            scope.spawn(move || {
                for _ in 0..1000 {
                    let state = listener.current_key_state();
                    assert!(matches!(state, KeyState::Released | KeyState::Pressed));
                }
            });
        }
    });

    // Last of 1000 alternating levels is a release
    assert!(wait_for_state(&listener, KeyState::Released));
    listener.stop().unwrap();
}
