//! Engine configuration.
//!
//! Defaults come from [`crate::constants`]; every value can be overridden
//! through a `LURCH_*` environment variable. There is no configuration file:
//! anything beyond these knobs belongs to the Lua behavior layer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{self, MIN_TICK_INTERVAL};

/// Runtime configuration for the engine and the Lua host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Directory holding `init.lua` and the runtime modules.
    pub rt_dir: PathBuf,
    /// Extra module directory prepended to `package.path` (user config).
    pub conf_dir: PathBuf,
    /// Directory of the running executable, exported as `__LURCH_EXEDIR`.
    pub exe_dir: PathBuf,
    /// Upper bound on a single readiness wait.
    pub tick_interval: Duration,
    /// Server silence after which an idle tick invokes `on_timeout`.
    pub idle_threshold: Duration,
    /// Minimum spacing between physical presents.
    pub present_interval: Duration,
    /// Initial delay before re-asking `on_disconnect`.
    pub reconnect_backoff: Duration,
    /// Ceiling for the reconnect backoff.
    pub reconnect_backoff_max: Duration,
    /// Per-candidate TCP connect timeout.
    pub connect_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let exe_dir = Self::resolve_exe_dir();
        Self {
            rt_dir: exe_dir.join("rt"),
            conf_dir: exe_dir.join("conf"),
            exe_dir,
            tick_interval: constants::DEFAULT_TICK_INTERVAL,
            idle_threshold: constants::DEFAULT_IDLE_THRESHOLD,
            present_interval: constants::DEFAULT_PRESENT_INTERVAL,
            reconnect_backoff: constants::DEFAULT_RECONNECT_BACKOFF,
            reconnect_backoff_max: constants::DEFAULT_RECONNECT_BACKOFF_MAX,
            connect_timeout: constants::DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl Config {
    /// Loads the defaults and applies `LURCH_*` environment overrides.
    pub fn load() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        if !config.rt_dir.join("init.lua").exists() {
            // Running from a checkout: fall back to ./rt like the old launcher did
            let local = PathBuf::from("rt");
            if local.join("init.lua").exists() {
                log::debug!("Using ./rt instead of {}", config.rt_dir.display());
                config.rt_dir = local;
            }
        }
        config
    }

    /// Use a specific runtime directory (the `--rt` flag).
    pub fn with_rt_dir(mut self, rt_dir: impl AsRef<Path>) -> Self {
        self.rt_dir = rt_dir.as_ref().to_path_buf();
        self
    }

    fn resolve_exe_dir() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from an arbitrary key lookup.
    ///
    /// Unparseable numeric values are ignored with a warning so a typo in the
    /// environment never prevents startup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(rt) = lookup("LURCH_RT_PATH") {
            self.rt_dir = PathBuf::from(rt);
        }

        if let Some(conf) = lookup("LURCH_CONF_PATH") {
            self.conf_dir = PathBuf::from(conf);
        }

        let duration = |key: &str, from: fn(u64) -> Duration| -> Option<Duration> {
            let raw = lookup(key)?;
            match raw.trim().parse::<u64>() {
                Ok(value) => Some(from(value)),
                Err(e) => {
                    log::warn!("Ignoring {}={:?}: {}", key, raw, e);
                    None
                }
            }
        };

        if let Some(tick) = duration("LURCH_TICK_SECS", Duration::from_secs) {
            if tick < MIN_TICK_INTERVAL {
                log::warn!("LURCH_TICK_SECS={} is too short, using {:?}", tick.as_secs(), MIN_TICK_INTERVAL);
            }
            self.tick_interval = tick.max(MIN_TICK_INTERVAL);
        }
        if let Some(idle) = duration("LURCH_IDLE_SECS", Duration::from_secs) {
            self.idle_threshold = idle;
        }
        if let Some(interval) = duration("LURCH_PRESENT_INTERVAL_MS", Duration::from_millis) {
            self.present_interval = interval;
        }
        if let Some(backoff) = duration("LURCH_RECONNECT_BACKOFF_MS", Duration::from_millis) {
            self.reconnect_backoff = backoff;
        }
        if let Some(max) = duration("LURCH_RECONNECT_BACKOFF_MAX_MS", Duration::from_millis) {
            self.reconnect_backoff_max = max;
        }
        if let Some(timeout) = duration("LURCH_CONNECT_TIMEOUT_SECS", Duration::from_secs) {
            self.connect_timeout = timeout;
        }
    }
}
