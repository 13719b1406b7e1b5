use std::env;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Size of the shared model region in bytes, fixed for the process lifetime.
pub const MODEL_BUFFER_CAPACITY: usize = 410_000;

pub const TIMER_ENV: &str = "INFER_BRIDGE_TIMER";
pub const MAX_ARENA_ENV: &str = "INFER_BRIDGE_MAX_ARENA_MB";
pub const STATS_WINDOW_ENV: &str = "INFER_BRIDGE_STATS_WINDOW_MS";

const DEFAULT_MAX_ARENA_BYTES: usize = 256 * 1024 * 1024;
const DEFAULT_STATS_WINDOW_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Record invoke durations into the session stats.
    pub timer_enabled: bool,
    /// Upper bound for the tensor storage a single interpreter may allocate.
    pub max_arena_bytes: usize,
    pub stats_window_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            timer_enabled: true,
            max_arena_bytes: DEFAULT_MAX_ARENA_BYTES,
            stats_window_ms: DEFAULT_STATS_WINDOW_MS,
        }
    }
}

impl BridgeConfig {
    /// Defaults overridden by whichever `INFER_BRIDGE_*` variables are set.
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = env::var(TIMER_ENV) {
            config.timer_enabled = !matches!(raw.trim(), "0" | "false" | "off");
        }
        if let Some(mb) = env_number::<usize>(MAX_ARENA_ENV) {
            config.max_arena_bytes = mb.saturating_mul(1024 * 1024);
        }
        if let Some(ms) = env_number::<u64>(STATS_WINDOW_ENV) {
            config.stats_window_ms = ms;
        }
        config
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("parse bridge config")
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            crate::warning!("ignoring {}={:?}: not a number", name, raw);
            None
        }
    }
}
