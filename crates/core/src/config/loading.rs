use std::path::Path;

use tracing::warn;

use super::types::SchedulerConfig;
use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

impl SchedulerConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus environment overrides, for runs without a config file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// Convention: `OFFSCHED_SECTION_KEY` overrides `section.key`.
    /// - `OFFSCHED_POLICY_MODE` → `policy.mode`
    /// - `OFFSCHED_POLICY_OFFLOAD` → `policy.offload`
    /// - `OFFSCHED_POLICY_SLICE_NS` → `policy.slice_ns`
    /// - `OFFSCHED_POLICY_MAX_TRACKED` → `policy.max_tracked`
    /// - `OFFSCHED_CHANNEL_CAPACITY` → `channel.capacity`
    /// - `OFFSCHED_COORDINATOR_POLL_WAIT_MS` → `coordinator.poll_wait_ms`
    /// - `OFFSCHED_COORDINATOR_REPORT_INTERVAL_MS` → `coordinator.report_interval_ms`
    ///
    /// Unparseable values are logged and ignored.
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    pub(crate) fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = parsed(&lookup, "OFFSCHED_POLICY_MODE") {
            self.policy.mode = mode;
        }
        if let Some(offload) = parsed(&lookup, "OFFSCHED_POLICY_OFFLOAD") {
            self.policy.offload = offload;
        }
        if let Some(slice) = parsed(&lookup, "OFFSCHED_POLICY_SLICE_NS") {
            self.policy.slice_ns = slice;
        }
        if let Some(max) = parsed(&lookup, "OFFSCHED_POLICY_MAX_TRACKED") {
            self.policy.max_tracked = max;
        }
        if let Some(capacity) = parsed(&lookup, "OFFSCHED_CHANNEL_CAPACITY") {
            self.channel.capacity = capacity;
        }
        if let Some(wait) = parsed(&lookup, "OFFSCHED_COORDINATOR_POLL_WAIT_MS") {
            self.coordinator.poll_wait_ms = wait;
        }
        if let Some(interval) = parsed(&lookup, "OFFSCHED_COORDINATOR_REPORT_INTERVAL_MS") {
            self.coordinator.report_interval_ms = interval;
        }
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key).filter(|s| !s.is_empty())?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(key, value = %raw, error = %e, "ignoring invalid env override");
            None
        }
    }
}
