use std::sync::Arc;

use tracing::info;

use offsched_core::{HalvePlusOne, OffloadChannel, OffloadCompute, SchedulerConfig, TaskKey};

use crate::context::{ExitKind, SchedContext};
use crate::error::SchedError;
use crate::host::{Host, HostError};
use crate::ops::{Placement, SchedOps};
use crate::sync::lock;
use crate::task::{CpuId, Task};

/// Scheduler name reported to the host.
pub const SCHED_NAME: &str = "offsched";

/// The offload scheduler. Stateless itself; every instance's state lives in
/// the [`SchedContext`] returned by [`SchedOps::init`].
pub struct OffloadScheduler {
    pub(super) config: SchedulerConfig,
    /// Function evaluated in-core by the inline offload mode.
    pub(super) compute: Arc<dyn OffloadCompute>,
}

impl OffloadScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_compute(config, Arc::new(HalvePlusOne))
    }

    pub fn with_compute(config: SchedulerConfig, compute: Arc<dyn OffloadCompute>) -> Self {
        Self { config, compute }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}

impl SchedOps for OffloadScheduler {
    fn name(&self) -> &'static str {
        SCHED_NAME
    }

    fn init(&self, host: Arc<dyn Host>) -> Result<SchedContext, SchedError> {
        self.config.validate()?;
        if host.nr_cpus() == 0 {
            return Err(HostError::NoProcessors.into());
        }
        let channel = OffloadChannel::new(self.config.channel.capacity)?;
        host.attach(SCHED_NAME)?;

        let policy = &self.config.policy;
        info!(
            "Scheduler {} attached: {} cpus, mode {}, offload {}, channel capacity {}",
            SCHED_NAME,
            host.nr_cpus(),
            policy.mode,
            policy.offload,
            channel.capacity()
        );
        Ok(SchedContext::new(policy.clone(), host, channel))
    }

    fn select_cpu(&self, ctx: &SchedContext, task: &Task, prev_cpu: CpuId, wake_flags: u64) -> Placement {
        self.place(ctx, task, prev_cpu, wake_flags)
    }

    fn enqueue(&self, ctx: &SchedContext, task: &Task, _enq_flags: u64) -> Result<(), SchedError> {
        self.enqueue_task(ctx, task)
    }

    fn dispatch(&self, ctx: &SchedContext, cpu: CpuId, _prev: Option<&Task>) -> Result<Option<TaskKey>, SchedError> {
        self.dispatch_cpu(ctx, cpu)
    }

    fn enable(&self, ctx: &SchedContext, task: &mut Task) {
        self.enable_task(ctx, task);
    }

    fn running(&self, ctx: &SchedContext, task: &Task) -> Result<(), SchedError> {
        self.start_running(ctx, task)
    }

    fn stopping(&self, ctx: &SchedContext, task: &mut Task, runnable: bool) -> Result<(), SchedError> {
        self.stop_running(ctx, task, runnable)
    }

    fn exit(&self, ctx: &SchedContext, kind: ExitKind) {
        ctx.record_exit(kind);
        let abandoned = ctx.channel.abandon();
        let in_flight = {
            let mut pending = lock(&ctx.pending);
            let n = pending.len();
            pending.clear();
            n
        };
        let queued = ctx.shared.clear() + ctx.local.clear();
        ctx.host.detach(SCHED_NAME);

        let c = ctx.counters();
        info!(
            exit = ?ctx.exit_kind(),
            abandoned,
            in_flight,
            queued,
            "Scheduler {} exited after {} ms",
            SCHED_NAME,
            ctx.uptime_ns() / 1_000_000
        );
        info!(
            "Sent: {} Returned: {} Missed: {} Errors: {} Dispatched: {}",
            c.sent, c.returned, c.missed, c.errors, c.dispatched
        );
    }
}
