use tracing::debug;

use offsched_core::{OffloadMode, PolicyMode, TaskKey};

use crate::context::SchedContext;
use crate::counters::bump;
use crate::error::SchedError;
use crate::ops::Placement;
use crate::task::{CpuId, Task};

use super::OffloadScheduler;

impl OffloadScheduler {
    /// Pick a processor for a waking task and fast-path it when idle.
    ///
    /// The consumer is never fast-pathed here; whether it jumps the queue
    /// is decided by the back-pressure gate in enqueue.
    pub(super) fn place(&self, ctx: &SchedContext, task: &Task, prev_cpu: CpuId, wake_flags: u64) -> Placement {
        let (suggested, idle) = ctx.host.select_idle_cpu(task, prev_cpu, wake_flags);
        let cpu = ctx.valid_cpu(suggested, prev_cpu);

        if idle && !ctx.is_consumer(task) && !ctx.has_exited() && ctx.local.push(cpu, task.key) {
            bump(&ctx.counters.local_dispatched);
            return Placement { cpu, direct: true };
        }
        Placement { cpu, direct: false }
    }

    pub(super) fn enqueue_task(&self, ctx: &SchedContext, task: &Task) -> Result<(), SchedError> {
        if ctx.has_exited() {
            return Ok(());
        }
        let now = ctx.now_ns();
        self.track(ctx, "enqueue", task, now, |_| ())?;
        bump(&ctx.counters.enqueued);

        if ctx.is_consumer(task) {
            // Back-pressure gate: only jump the queue while there is offload
            // work for the consumer to pick up.
            let cpu = ctx.valid_cpu(task.cpu, 0);
            if ctx.outstanding() > 0 && ctx.local.push(cpu, task.key) {
                bump(&ctx.counters.local_dispatched);
                return Ok(());
            }
            self.insert(ctx, task);
            return Ok(());
        }

        match self.config.policy.offload {
            OffloadMode::PerEnqueue => {
                let vtime = self.dispatch_key(ctx, task);
                let payload = u64::from(task.cpu);
                if self.send_request(ctx, Some(task.key), payload, vtime, now).is_ok() {
                    // Parked until the response is folded back in dispatch.
                    return Ok(());
                }
                self.insert(ctx, task);
            }
            OffloadMode::Inline => {
                self.offload_inline(ctx, task, now)?;
                self.insert(ctx, task);
            }
            OffloadMode::Off | OffloadMode::Heartbeat => self.insert(ctx, task),
        }
        Ok(())
    }

    /// Pick the next task for `cpu`: fold back responses, expire stale
    /// requests, then the local queue, then the shared queue.
    pub(super) fn dispatch_cpu(&self, ctx: &SchedContext, cpu: CpuId) -> Result<Option<TaskKey>, SchedError> {
        if ctx.has_exited() {
            return Ok(None);
        }
        let now = ctx.now_ns();
        self.drain_responses(ctx, self.config.policy.drain_batch, now)?;
        self.expire_in_flight(ctx, now);

        if let Some(key) = ctx.local.pop(cpu) {
            return Ok(Some(key));
        }
        while let Some(entry) = ctx.shared.pop() {
            if ctx.host.resolve(entry.task) {
                bump(&ctx.counters.dispatched);
                return Ok(Some(entry.task));
            }
            debug!(task = %entry.task, "dropping queued task that no longer exists");
        }
        Ok(None)
    }

    /// Ordering key `task` would be queued with right now.
    pub(super) fn dispatch_key(&self, ctx: &SchedContext, task: &Task) -> u64 {
        match self.config.policy.mode {
            PolicyMode::Fifo => 0,
            PolicyMode::Fair => ctx.clock.enqueue_key(task.vtime, self.config.policy.slice_ns),
        }
    }

    pub(super) fn insert(&self, ctx: &SchedContext, task: &Task) {
        let vtime = self.dispatch_key(ctx, task);
        self.insert_key(ctx, task.key, vtime);
    }

    /// Queue a task by key, e.g. when republishing a parked task.
    pub(super) fn insert_key(&self, ctx: &SchedContext, key: TaskKey, vtime: u64) {
        match self.config.policy.mode {
            PolicyMode::Fifo => {
                ctx.shared.insert_fifo(key);
            }
            PolicyMode::Fair => {
                ctx.shared.insert_vtime(key, vtime);
            }
        }
    }
}
