use std::sync::atomic::Ordering;

use tracing::debug;

use offsched_core::{OffloadMode, PolicyMode};

use crate::context::{SchedContext, UNSET};
use crate::counters::bump;
use crate::error::{RegistryError, SchedError};
use crate::registry::TrackingRecord;
use crate::task::Task;
use crate::vtime::charge;

use super::OffloadScheduler;

impl OffloadScheduler {
    pub(super) fn enable_task(&self, ctx: &SchedContext, task: &mut Task) {
        task.vtime = ctx.clock.now();
    }

    pub(super) fn start_running(&self, ctx: &SchedContext, task: &Task) -> Result<(), SchedError> {
        let now = ctx.now_ns();
        bump(&ctx.counters.running);

        let cpu = task.cpu;
        if let Some(true) = self.track(ctx, "running", task, now, |r| r.start_run(cpu, now))? {
            debug!(task = %task.key, cpu, "task migrated");
        }

        if self.config.policy.mode == PolicyMode::Fair {
            ctx.clock.advance_to(self.dispatch_key(ctx, task));
        }

        if ctx.is_consumer(task) {
            ctx.consumer_run_start_ns.store(now, Ordering::Relaxed);
            if self.config.policy.offload == OffloadMode::Heartbeat {
                self.drain_responses(ctx, self.config.policy.run_drain_batch, now)?;
                self.maybe_heartbeat(ctx, now);
            }
        }
        Ok(())
    }

    pub(super) fn stop_running(&self, ctx: &SchedContext, task: &mut Task, runnable: bool) -> Result<(), SchedError> {
        let now = ctx.now_ns();
        bump(&ctx.counters.stopping);

        if self.config.policy.mode == PolicyMode::Fair {
            let policy = &self.config.policy;
            let used = policy.slice_ns.saturating_sub(task.slice_ns);
            task.vtime = task.vtime.wrapping_add(charge(used, policy.vtime_scale, task.weight));
        }

        if ctx.is_consumer(task) {
            let start = ctx.consumer_run_start_ns.swap(UNSET, Ordering::Relaxed);
            if start != UNSET {
                ctx.consumer_runtime_ns
                    .fetch_add(now.saturating_sub(start), Ordering::Relaxed);
            }
        }

        let update = ctx.registry.update(task, now, |r| r.stop_run(now));
        self.checked(ctx, "stopping", update)?;

        if task.liveness.is_terminal() {
            let retired = ctx.registry.retire(task.key, now);
            if let Some(record) = self.checked(ctx, "stopping", retired)?.flatten() {
                bump(&ctx.counters.retired);
                debug!(
                    task = %record.key,
                    comm = %record.comm,
                    run_time_ns = record.run_time_ns,
                    execution_time_ns = ?record.execution_time_ns,
                    migrations = record.migrations,
                    "task retired"
                );
            }
        } else if !runnable {
            debug!(task = %task.key, "task sleeping");
        }
        Ok(())
    }

    /// Create-or-refresh the tracking record. A full registry is counted and
    /// tolerated; touching a retired task ends the instance.
    pub(super) fn track<R>(
        &self,
        ctx: &SchedContext,
        hook: &'static str,
        task: &Task,
        now: u64,
        f: impl FnOnce(&mut TrackingRecord) -> R,
    ) -> Result<Option<R>, SchedError> {
        let observed = ctx.registry.observe(task, now, f).map(Some);
        self.checked(ctx, hook, observed).map(Option::flatten)
    }

    fn checked<T>(
        &self,
        ctx: &SchedContext,
        hook: &'static str,
        result: Result<T, RegistryError>,
    ) -> Result<Option<T>, SchedError> {
        match result {
            Ok(v) => Ok(Some(v)),
            Err(RegistryError::Full { capacity }) => {
                bump(&ctx.counters.registry_full);
                debug!(hook, capacity, "task registry full, not tracking");
                Ok(None)
            }
            Err(e @ (RegistryError::Retired(_) | RegistryError::Reused { .. })) => {
                Err(ctx.violation(hook, e.to_string()))
            }
        }
    }
}
