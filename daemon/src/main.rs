//! fnkey-daemon: background daemon tracking the global hotkey
//!
//! Wires the fnkey core together:
//! - Permission check (and optional prompt) for input monitoring
//! - Hotkey listener on a dedicated thread
//! - Transition log until SIGINT/SIGTERM

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fnkey::hotkey::HotkeyError;
use fnkey::lifecycle::ShutdownSignal;
use fnkey::{Config, HotkeyListener, KeyState, StateTracker};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "fnkey-daemon starting"
    );

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;
    info!(?config, "configuration loaded");

    let tracker = Arc::new(StateTracker::with_capacity(config.event_capacity));
    let listener = HotkeyListener::for_current_platform(Arc::clone(&tracker));

    let platform = listener.platform_info();
    info!(
        platform = %serde_json::to_string(&platform)?,
        "platform detected"
    );

    // Prompt for access before the tap is created
    let mut permission = listener.check_permission();
    if !permission.is_authorized() && config.request_permission {
        permission = listener.request_permission();
    }
    info!(%permission, "input monitoring permission");

    let mut transitions = listener
        .subscribe()
        .context("failed to subscribe to hotkey transitions")?;

    // Start the hotkey listener (runs on dedicated thread)
    match listener.start() {
        Ok(()) => {
            info!(hotkey = %platform.hotkey_name, "hotkey listener started");
        }
        Err(HotkeyError::Registration(e)) if e.is_permission_related() => {
            error!(error = %e, "failed to start hotkey listener");
            warn!("continuing without hotkey support - grant access in system settings");
            listener.open_permission_settings();
        }
        Err(e) => {
            error!(error = %e, "failed to start hotkey listener");
            warn!("continuing without hotkey support");
        }
    }

    let shutdown = ShutdownSignal::new();

    info!("daemon initialized, entering main loop");

    tokio::select! {
        // Log every hotkey edge
        _ = async {
            loop {
                match transitions.recv().await {
                    Ok(transition) => match transition.state {
                        KeyState::Pressed => info!(hotkey = %platform.hotkey_name, "hotkey pressed"),
                        KeyState::Released => info!(
                            hotkey = %platform.hotkey_name,
                            held_for = ?transition.held_for,
                            "hotkey released"
                        ),
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "transition receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("transition stream closed");
        }

        // Wait for shutdown signal
        result = shutdown.wait() => {
            match result {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!(?e, "failed to listen for shutdown signals"),
            }
        }
    }

    // Cleanup
    info!("shutting down...");

    if let Err(e) = listener.stop() {
        warn!(error = %e, "hotkey listener did not stop cleanly");
    }

    info!("fnkey-daemon stopped");

    Ok(())
}
