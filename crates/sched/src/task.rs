use serde::Serialize;

use offsched_core::{TaskId, TaskKey};

/// Processor index.
pub type CpuId = u32;

/// Default task weight (nice 0).
pub const DEFAULT_WEIGHT: u64 = 100;

/// Host-reported lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Liveness {
    Runnable,
    Running,
    Sleeping,
    Zombie,
    Dead,
}

impl Liveness {
    /// Zombie and dead tasks never run again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Liveness::Zombie | Liveness::Dead)
    }
}

/// A schedulable entity as seen by the hooks.
///
/// Owned by the host. Hooks read it and only write `vtime` (in `enable`
/// and `stopping`); queues hold [`TaskKey`]s, never tasks.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub key: TaskKey,
    pub comm: String,
    pub weight: u64,
    pub vtime: u64,
    /// Remaining slice of the current run.
    pub slice_ns: u64,
    /// Processor the task last ran on, or was placed on.
    pub cpu: CpuId,
    pub liveness: Liveness,
    pub sum_exec_runtime_ns: u64,
    pub nr_migrations: u64,
    pub min_flt: u64,
    pub maj_flt: u64,
}

impl Task {
    pub fn new(id: TaskId, arrival_ns: u64, comm: impl Into<String>) -> Self {
        Self {
            key: TaskKey::new(id, arrival_ns),
            comm: comm.into(),
            weight: DEFAULT_WEIGHT,
            vtime: 0,
            slice_ns: 0,
            cpu: 0,
            liveness: Liveness::Runnable,
            sum_exec_runtime_ns: 0,
            nr_migrations: 0,
            min_flt: 0,
            maj_flt: 0,
        }
    }

    pub fn with_weight(mut self, weight: u64) -> Self {
        self.weight = weight;
        self
    }

    pub fn on_cpu(mut self, cpu: CpuId) -> Self {
        self.cpu = cpu;
        self
    }

    pub fn id(&self) -> TaskId {
        self.key.id
    }
}
