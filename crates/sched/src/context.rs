use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use serde::Serialize;
use tracing::error;

use offsched_core::{ChannelHandle, PolicyConfig, TaskId, TaskKey};

use crate::counters::{CounterSnapshot, Counters};
use crate::dsq::{DispatchQueue, LocalQueues};
use crate::error::SchedError;
use crate::host::Host;
use crate::registry::TaskRegistry;
use crate::sync::lock;
use crate::task::{CpuId, Task};
use crate::vtime::VirtualClock;

/// Marks an unset timestamp or consumer slot.
pub(crate) const UNSET: u64 = u64::MAX;

/// Why a scheduler instance ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ExitKind {
    Normal,
    Error(String),
    /// Tear down and initialise a fresh instance.
    Restart,
}

impl ExitKind {
    pub fn should_restart(&self) -> bool {
        matches!(self, ExitKind::Restart)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ExitKind::Error(_))
    }
}

/// An offload request waiting for its response.
#[derive(Debug, Clone, Copy)]
pub(crate) struct InFlight {
    /// Parked task to republish when the response arrives.
    pub task: Option<TaskKey>,
    pub sent_ns: u64,
    /// Dispatch key the parked task is republished with.
    pub vtime: u64,
}

/// All state of one scheduler instance.
///
/// Created by [`crate::SchedOps::init`] and passed explicitly to every hook.
/// Shared between processors (and the coordinator) behind an `Arc`.
pub struct SchedContext {
    pub(crate) policy: PolicyConfig,
    pub(crate) host: Arc<dyn Host>,
    pub(crate) nr_cpus: u32,
    pub(crate) channel: ChannelHandle,
    pub(crate) counters: Counters,
    pub(crate) registry: TaskRegistry,
    pub(crate) shared: DispatchQueue,
    pub(crate) local: LocalQueues,
    pub(crate) clock: VirtualClock,
    pub(crate) pending: Mutex<HashMap<u64, InFlight>>,
    pub(crate) next_seq: AtomicU64,
    consumer: AtomicU64,
    pub(crate) consumer_run_start_ns: AtomicU64,
    pub(crate) consumer_runtime_ns: AtomicU64,
    pub(crate) last_heartbeat_ns: AtomicU64,
    pub(crate) last_expiry_ns: AtomicU64,
    started_ns: u64,
    exit: OnceLock<ExitKind>,
}

impl std::fmt::Debug for SchedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedContext")
            .field("nr_cpus", &self.nr_cpus)
            .field("counters", &self.counters.snapshot())
            .field("tracked", &self.registry.len())
            .field("exit", &self.exit.get())
            .finish_non_exhaustive()
    }
}

impl SchedContext {
    pub(crate) fn new(policy: PolicyConfig, host: Arc<dyn Host>, channel: ChannelHandle) -> Self {
        let nr_cpus = host.nr_cpus();
        let now = host.now_ns();
        Self {
            registry: TaskRegistry::new(policy.max_tracked, policy.registry_shards),
            policy,
            host,
            nr_cpus,
            channel,
            counters: Counters::default(),
            shared: DispatchQueue::new(),
            local: LocalQueues::new(nr_cpus),
            clock: VirtualClock::new(),
            pending: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            consumer: AtomicU64::new(UNSET),
            consumer_run_start_ns: AtomicU64::new(UNSET),
            consumer_runtime_ns: AtomicU64::new(0),
            last_heartbeat_ns: AtomicU64::new(UNSET),
            last_expiry_ns: AtomicU64::new(now),
            started_ns: now,
            exit: OnceLock::new(),
        }
    }

    // ── Offload endpoint ────────────────────────────────────────────

    /// Handle to the offload channel shared with the coordinator.
    pub fn channel(&self) -> ChannelHandle {
        Arc::clone(&self.channel)
    }

    /// Designate the task whose id is `id` as the offload consumer.
    pub fn set_consumer(&self, id: TaskId) {
        self.consumer.store(u64::from(id.0), Ordering::Relaxed);
    }

    pub fn clear_consumer(&self) {
        self.consumer.store(UNSET, Ordering::Relaxed);
    }

    pub fn consumer(&self) -> Option<TaskId> {
        let raw = self.consumer.load(Ordering::Relaxed);
        u32::try_from(raw).ok().map(TaskId)
    }

    pub fn is_consumer(&self, task: &Task) -> bool {
        self.consumer() == Some(task.id())
    }

    /// Total time the consumer has spent on a processor.
    pub fn consumer_runtime_ns(&self) -> u64 {
        self.consumer_runtime_ns.load(Ordering::Relaxed)
    }

    /// Requests sent and not yet answered.
    pub fn in_flight(&self) -> usize {
        lock(&self.pending).len()
    }

    // ── Observation ─────────────────────────────────────────────────

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    pub fn outstanding(&self) -> u64 {
        self.counters.outstanding()
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn virtual_time(&self) -> u64 {
        self.clock.now()
    }

    pub fn nr_cpus(&self) -> u32 {
        self.nr_cpus
    }

    /// Slice the host should grant each dispatched task.
    pub fn slice_ns(&self) -> u64 {
        self.policy.slice_ns
    }

    pub fn now_ns(&self) -> u64 {
        self.host.now_ns()
    }

    pub fn uptime_ns(&self) -> u64 {
        self.now_ns().saturating_sub(self.started_ns)
    }

    /// Tasks waiting in the shared queue and in all local queues.
    pub fn queued(&self) -> (usize, usize) {
        (self.shared.len(), self.local.total_len())
    }

    // ── Exit ────────────────────────────────────────────────────────

    /// Record why this instance ends. Only the first exit is kept.
    pub fn record_exit(&self, kind: ExitKind) -> bool {
        self.exit.set(kind).is_ok()
    }

    pub fn exit_kind(&self) -> Option<ExitKind> {
        self.exit.get().cloned()
    }

    pub fn has_exited(&self) -> bool {
        self.exit.get().is_some()
    }

    /// Log an invariant violation and end the instance with an error.
    pub(crate) fn violation(&self, hook: &'static str, detail: impl Into<String>) -> SchedError {
        let err = SchedError::invariant(hook, detail);
        error!(hook, error = %err, "scheduler invariant violated");
        self.record_exit(ExitKind::Error(err.to_string()));
        err
    }

    /// Clamp a host-suggested processor to a valid id.
    pub(crate) fn valid_cpu(&self, cpu: CpuId, fallback: CpuId) -> CpuId {
        if cpu < self.nr_cpus {
            cpu
        } else if fallback < self.nr_cpus {
            fallback
        } else {
            0
        }
    }
}
