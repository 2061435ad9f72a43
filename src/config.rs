//! Configuration Module
//!
//! Loads the storm workload parameters from environment variables.

use std::env;
use std::str::FromStr;

use tracing::warn;

/// Storm workload parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Number of concurrent tasks hammering the hot keys
    pub storm_tasks: usize,
    /// `get` calls made by each storm task
    pub gets_per_task: usize,
    /// Hot keys are `1..=hot_keys`
    pub hot_keys: u32,
    /// Keys `1..=cold_keys` are read once each alongside the storm
    pub cold_keys: u32,
    /// Keys `1..=prewarm_keys` are loaded before the storm starts
    pub prewarm_keys: u32,
    /// Artificial latency added to every fetch, in milliseconds
    pub fetch_delay_ms: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `STORM_TASKS` - Concurrent storm tasks (default: 8000)
    /// - `STORM_GETS_PER_TASK` - Gets per storm task (default: 10)
    /// - `STORM_HOT_KEYS` - Size of the hot key range (default: 9)
    /// - `STORM_COLD_KEYS` - Size of the cold key range (default: 999)
    /// - `PREWARM_KEYS` - Keys loaded at construction (default: 10)
    /// - `FETCH_DELAY_MS` - Fetch latency in milliseconds (default: 0)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let config = Self {
            storm_tasks: env_or("STORM_TASKS", defaults.storm_tasks),
            gets_per_task: env_or("STORM_GETS_PER_TASK", defaults.gets_per_task),
            hot_keys: env_or("STORM_HOT_KEYS", defaults.hot_keys),
            cold_keys: env_or("STORM_COLD_KEYS", defaults.cold_keys),
            prewarm_keys: env_or("PREWARM_KEYS", defaults.prewarm_keys),
            fetch_delay_ms: env_or("FETCH_DELAY_MS", defaults.fetch_delay_ms),
        };
        config.validated()
    }

    /// Replaces values the storm cannot run with by their defaults.
    ///
    /// An empty hot key range has nothing to hammer, so `hot_keys = 0`
    /// falls back to the default range.
    pub fn validated(mut self) -> Self {
        if self.hot_keys == 0 {
            let fallback = Self::default().hot_keys;
            warn!(
                "STORM_HOT_KEYS must be at least 1, using default of {}",
                fallback
            );
            self.hot_keys = fallback;
        }
        self
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storm_tasks: 8000,
            gets_per_task: 10,
            hot_keys: 9,
            cold_keys: 999,
            prewarm_keys: 10,
            fetch_delay_ms: 0,
        }
    }
}
