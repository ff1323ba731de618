use std::sync::atomic::Ordering;

use tracing::{debug, warn};

use offsched_core::{ChannelError, OffloadRecord, TaskKey};

use crate::context::{InFlight, SchedContext, UNSET};
use crate::counters::bump;
use crate::error::SchedError;
use crate::sync::lock;
use crate::task::Task;

use super::OffloadScheduler;

impl OffloadScheduler {
    /// Send one offload request on behalf of `task` (or a heartbeat when
    /// `None`) and return its sequence number.
    ///
    /// A task given here is parked: it is not queued again until its
    /// response is folded back or the request expires.
    pub fn submit_offload(
        &self,
        ctx: &SchedContext,
        task: Option<&Task>,
        payload: u64,
    ) -> Result<u64, ChannelError> {
        let vtime = task.map_or(0, |t| self.dispatch_key(ctx, t));
        self.send_request(ctx, task.map(|t| t.key), payload, vtime, ctx.now_ns())
    }

    /// Push a request. The send is counted before the push and the pending
    /// entry exists before the coordinator can see the record, so a fast
    /// response can never be counted ahead of its send.
    pub(super) fn send_request(
        &self,
        ctx: &SchedContext,
        task: Option<TaskKey>,
        payload: u64,
        vtime: u64,
        now: u64,
    ) -> Result<u64, ChannelError> {
        let seq = ctx.next_seq.fetch_add(1, Ordering::Relaxed);
        ctx.counters.reserve_send();
        lock(&ctx.pending).insert(
            seq,
            InFlight {
                task,
                sent_ns: now,
                vtime,
            },
        );

        match ctx.channel.submit_request(OffloadRecord::request(seq, task, payload, now)) {
            Ok(()) => {
                debug!(seq, payload, "offload request sent");
                Ok(seq)
            }
            Err(e) => {
                lock(&ctx.pending).remove(&seq);
                ctx.counters.release_send();
                bump(&ctx.counters.errors);
                debug!(error = %e, "offload request dropped");
                Err(e)
            }
        }
    }

    /// Fold back up to `limit` responses. Returns how many were taken.
    pub(super) fn drain_responses(&self, ctx: &SchedContext, limit: usize, now: u64) -> Result<usize, SchedError> {
        let mut taken = 0;
        while taken < limit {
            let Some(response) = ctx.channel.take_response() else {
                break;
            };
            taken += 1;
            self.fold_response(ctx, response, now)?;
        }
        Ok(taken)
    }

    fn fold_response(&self, ctx: &SchedContext, response: OffloadRecord, now: u64) -> Result<(), SchedError> {
        let Some(in_flight) = lock(&ctx.pending).remove(&response.seq) else {
            // Already expired and counted as missed.
            debug!(seq = response.seq, "late offload response dropped");
            return Ok(());
        };

        let finalized = match response.finalize(now) {
            Ok(record) => record,
            Err(e) => return Err(ctx.violation("dispatch", e.to_string())),
        };

        if let Some(key) = in_flight.task {
            if !ctx.host.resolve(key) {
                bump(&ctx.counters.missed);
                debug!(seq = finalized.seq, task = %key, "offload owner gone");
                return Ok(());
            }
            self.insert_key(ctx, key, in_flight.vtime);
        }
        bump(&ctx.counters.returned);
        ctx.channel.publish_finalized(finalized);
        Ok(())
    }

    /// Give up on requests older than the offload timeout, republishing
    /// their tasks. Runs at most once per quarter timeout across all
    /// processors.
    pub(super) fn expire_in_flight(&self, ctx: &SchedContext, now: u64) {
        let timeout = self.config.policy.offload_timeout_ns();
        if timeout == 0 {
            return;
        }
        let last = ctx.last_expiry_ns.load(Ordering::Relaxed);
        if now.saturating_sub(last) < (timeout / 4).max(1) {
            return;
        }
        if ctx
            .last_expiry_ns
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let expired: Vec<(u64, InFlight)> = {
            let mut pending = lock(&ctx.pending);
            let stale: Vec<u64> = pending
                .iter()
                .filter(|(_, f)| now.saturating_sub(f.sent_ns) >= timeout)
                .map(|(seq, _)| *seq)
                .collect();
            stale
                .into_iter()
                .filter_map(|seq| pending.remove(&seq).map(|f| (seq, f)))
                .collect()
        };
        if expired.is_empty() {
            return;
        }

        for (seq, in_flight) in &expired {
            bump(&ctx.counters.missed);
            if let Some(key) = in_flight.task {
                if ctx.host.resolve(key) {
                    self.insert_key(ctx, key, in_flight.vtime);
                }
            }
            debug!(seq, age_ns = now.saturating_sub(in_flight.sent_ns), "offload request expired");
        }
        warn!(count = expired.len(), "offload requests expired without a response");
    }

    /// Send a heartbeat request from the consumer if the interval elapsed
    /// and the request queue has room.
    pub(super) fn maybe_heartbeat(&self, ctx: &SchedContext, now: u64) {
        let policy = &self.config.policy;
        let last = ctx.last_heartbeat_ns.load(Ordering::Relaxed);
        if last != UNSET && now.saturating_sub(last) < policy.heartbeat_interval_ns() {
            return;
        }
        if !ctx.channel.has_request_room() {
            return;
        }
        if ctx
            .last_heartbeat_ns
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        if let Err(e) = self.send_request(ctx, None, policy.heartbeat_payload, 0, now) {
            debug!(error = %e, "heartbeat request dropped");
        }
    }

    /// Evaluate the delegated function in-core and publish the result
    /// directly, timing only the computation.
    pub(super) fn offload_inline(&self, ctx: &SchedContext, task: &Task, now: u64) -> Result<(), SchedError> {
        let seq = ctx.next_seq.fetch_add(1, Ordering::Relaxed);
        let result = self.compute.compute(u64::from(task.cpu));
        let record = OffloadRecord::request(seq, Some(task.key), u64::from(task.cpu), now)
            .respond(result)
            .finalize(ctx.now_ns());
        match record {
            Ok(record) => {
                ctx.channel.publish_finalized(record);
                Ok(())
            }
            Err(e) => Err(ctx.violation("enqueue", e.to_string())),
        }
    }
}
