//! Configuration loading and management

use anyhow::{bail, Context, Result};

use crate::state::DEFAULT_EVENT_CAPACITY;

const REQUEST_PERMISSION_VAR: &str = "FNKEY_REQUEST_PERMISSION";
const EVENT_CAPACITY_VAR: &str = "FNKEY_EVENT_CAPACITY";

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Prompt for input monitoring access at startup when missing
    pub request_permission: bool,

    /// Size of the transition queue shared by subscribers
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_permission: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(REQUEST_PERMISSION_VAR) {
            config.request_permission =
                parse_bool(&raw).with_context(|| format!("invalid {REQUEST_PERMISSION_VAR}"))?;
        }

        if let Some(raw) = lookup(EVENT_CAPACITY_VAR) {
            let capacity: usize = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid {EVENT_CAPACITY_VAR}: {raw:?}"))?;
            if capacity == 0 {
                bail!("{EVENT_CAPACITY_VAR} must be at least 1");
            }
            config.event_capacity = capacity;
        }

        Ok(config)
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got {other:?}"),
    }
}
