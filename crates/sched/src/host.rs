//! The seam between the policy and whatever actually runs tasks.

use thiserror::Error;

use offsched_core::TaskKey;

use crate::task::{CpuId, Task};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("host refused to attach scheduler '{name}': {reason}")]
    Refused { name: String, reason: String },

    #[error("host reports no processors")]
    NoProcessors,
}

/// Services the scheduling core needs from its host.
///
/// Implementations must be callable from every processor concurrently.
pub trait Host: Send + Sync {
    /// Number of processors; valid ids are `0..nr_cpus()`.
    fn nr_cpus(&self) -> u32;

    /// Monotonic clock in nanoseconds.
    fn now_ns(&self) -> u64;

    /// Pick a processor for a waking task, reporting whether it is idle.
    fn select_idle_cpu(&self, task: &Task, prev_cpu: CpuId, wake_flags: u64) -> (CpuId, bool);

    /// Whether the task behind `key` still exists and can be scheduled.
    fn resolve(&self, key: TaskKey) -> bool;

    /// Register the scheduler with the host.
    fn attach(&self, name: &str) -> Result<(), HostError>;

    /// Unregister on exit.
    fn detach(&self, _name: &str) {}
}
