use std::sync::Arc;

use offsched_core::TaskKey;

use crate::context::{ExitKind, SchedContext};
use crate::error::SchedError;
use crate::host::Host;
use crate::task::{CpuId, Task};

/// Outcome of CPU selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Always a valid processor id.
    pub cpu: CpuId,
    /// The task was already queued on `cpu`'s local queue; the host must
    /// not call `enqueue` for this wakeup.
    pub direct: bool,
}

/// Scheduling policy callbacks, invoked by the host.
///
/// Hooks may run concurrently on every processor and must not block. All
/// shared state lives in the [`SchedContext`] returned by `init`.
pub trait SchedOps: Send + Sync {
    fn name(&self) -> &'static str;

    /// Build a fresh instance. Fails without leaving any state behind.
    fn init(&self, host: Arc<dyn Host>) -> Result<SchedContext, SchedError>;

    fn select_cpu(&self, ctx: &SchedContext, task: &Task, prev_cpu: CpuId, wake_flags: u64) -> Placement;

    fn enqueue(&self, ctx: &SchedContext, task: &Task, enq_flags: u64) -> Result<(), SchedError>;

    /// Pick the next task for `cpu`; `None` leaves it idle.
    fn dispatch(&self, ctx: &SchedContext, cpu: CpuId, prev: Option<&Task>) -> Result<Option<TaskKey>, SchedError>;

    /// A task joins this scheduler.
    fn enable(&self, ctx: &SchedContext, task: &mut Task);

    fn running(&self, ctx: &SchedContext, task: &Task) -> Result<(), SchedError>;

    fn stopping(&self, ctx: &SchedContext, task: &mut Task, runnable: bool) -> Result<(), SchedError>;

    /// Tear the instance down. In-flight offload records are abandoned.
    fn exit(&self, ctx: &SchedContext, kind: ExitKind);
}
