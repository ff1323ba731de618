use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default time slice granted to a task, in nanoseconds (20 ms).
pub const DEFAULT_SLICE_NS: u64 = 20_000_000;

// ── Top-level config ────────────────────────────────────────────────

/// Full configuration for the offload scheduler and its coordinator.
///
/// Parsed from `offsched.toml` with support for `OFFSCHED_*` environment
/// variable overrides. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Scheduling policy and offload behaviour.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Offload channel sizing.
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Userspace coordinator loop.
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
}

// ── Enumerations ────────────────────────────────────────────────────

/// Ordering of the shared dispatch queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Arrival order.
    Fifo,
    /// Weighted virtual time.
    #[default]
    Fair,
}

/// When the scheduler delegates work to the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffloadMode {
    /// No offload traffic.
    Off,
    /// One request per enqueued task; the task is parked until its response
    /// comes back.
    PerEnqueue,
    /// The delegated function runs inside the scheduler and only the
    /// finalized record is published.
    Inline,
    /// The consumer task emits a periodic request while it runs.
    #[default]
    Heartbeat,
}

/// Output format of interval reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Csv,
    Json,
}

impl fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyMode::Fifo => write!(f, "fifo"),
            PolicyMode::Fair => write!(f, "fair"),
        }
    }
}

impl FromStr for PolicyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(PolicyMode::Fifo),
            "fair" | "vtime" => Ok(PolicyMode::Fair),
            other => Err(format!("unknown policy mode '{other}', expected 'fifo' or 'fair'")),
        }
    }
}

impl fmt::Display for OffloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OffloadMode::Off => write!(f, "off"),
            OffloadMode::PerEnqueue => write!(f, "per_enqueue"),
            OffloadMode::Inline => write!(f, "inline"),
            OffloadMode::Heartbeat => write!(f, "heartbeat"),
        }
    }
}

impl FromStr for OffloadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "off" | "none" => Ok(OffloadMode::Off),
            "per_enqueue" => Ok(OffloadMode::PerEnqueue),
            "inline" => Ok(OffloadMode::Inline),
            "heartbeat" => Ok(OffloadMode::Heartbeat),
            other => Err(format!(
                "unknown offload mode '{other}', expected off, per_enqueue, inline or heartbeat"
            )),
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::Csv => write!(f, "csv"),
            ReportFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ReportFormat::Csv),
            "json" => Ok(ReportFormat::Json),
            other => Err(format!("unknown report format '{other}', expected 'csv' or 'json'")),
        }
    }
}

// ── Section configs ─────────────────────────────────────────────────

/// `[policy]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub mode: PolicyMode,

    /// Time slice handed to every dispatched task.
    #[serde(default = "default_slice_ns")]
    pub slice_ns: u64,

    /// Scale applied when charging vtime (`used * scale / weight`).
    #[serde(default = "default_vtime_scale")]
    pub vtime_scale: u64,

    #[serde(default)]
    pub offload: OffloadMode,

    /// Maximum responses folded back per dispatch call.
    #[serde(default = "default_drain_batch")]
    pub drain_batch: usize,

    /// Maximum responses folded back when the consumer starts running.
    #[serde(default = "default_run_drain_batch")]
    pub run_drain_batch: usize,

    /// In-flight requests older than this are counted as missed.
    #[serde(default = "default_offload_timeout_ms")]
    pub offload_timeout_ms: u64,

    /// Minimum gap between two heartbeat requests. Zero sends one per run.
    #[serde(default)]
    pub heartbeat_interval_ms: u64,

    /// Payload carried by heartbeat requests.
    #[serde(default = "default_heartbeat_payload")]
    pub heartbeat_payload: u64,

    /// Upper bound on simultaneously tracked tasks.
    #[serde(default = "default_max_tracked")]
    pub max_tracked: usize,

    /// Number of registry shards.
    #[serde(default = "default_registry_shards")]
    pub registry_shards: usize,
}

fn default_slice_ns() -> u64 {
    DEFAULT_SLICE_NS
}

fn default_vtime_scale() -> u64 {
    100
}

fn default_drain_batch() -> usize {
    256
}

fn default_run_drain_batch() -> usize {
    16
}

fn default_offload_timeout_ms() -> u64 {
    1_000
}

fn default_heartbeat_payload() -> u64 {
    10
}

fn default_max_tracked() -> usize {
    1024
}

fn default_registry_shards() -> usize {
    16
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            mode: PolicyMode::default(),
            slice_ns: default_slice_ns(),
            vtime_scale: default_vtime_scale(),
            offload: OffloadMode::default(),
            drain_batch: default_drain_batch(),
            run_drain_batch: default_run_drain_batch(),
            offload_timeout_ms: default_offload_timeout_ms(),
            heartbeat_interval_ms: 0,
            heartbeat_payload: default_heartbeat_payload(),
            max_tracked: default_max_tracked(),
            registry_shards: default_registry_shards(),
        }
    }
}

impl PolicyConfig {
    pub fn offload_timeout_ns(&self) -> u64 {
        self.offload_timeout_ms.saturating_mul(1_000_000)
    }

    pub fn heartbeat_interval_ns(&self) -> u64 {
        self.heartbeat_interval_ms.saturating_mul(1_000_000)
    }
}

/// `[channel]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Capacity of each of the three offload queues.
    #[serde(default = "default_channel_capacity")]
    pub capacity: usize,
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: default_channel_capacity(),
        }
    }
}

/// `[coordinator]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Upper bound on one idle wait of the polling loop.
    #[serde(default = "default_poll_wait_ms")]
    pub poll_wait_ms: u64,

    /// Length of a latency reporting interval.
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,

    #[serde(default)]
    pub format: ReportFormat,
}

fn default_poll_wait_ms() -> u64 {
    100
}

fn default_report_interval_ms() -> u64 {
    1_000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_wait_ms: default_poll_wait_ms(),
            report_interval_ms: default_report_interval_ms(),
            format: ReportFormat::default(),
        }
    }
}
