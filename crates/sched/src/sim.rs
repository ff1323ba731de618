//! In-process simulated host.
//!
//! Owns a table of synthetic tasks with work budgets and drives the
//! scheduling hooks the way a kernel would: wake → select_cpu → enqueue,
//! dispatch → running → (run) → stopping. One rayon worker per simulated
//! processor. Not a model of any real kernel; it exists so the policy can
//! be exercised end to end.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use offsched_core::{TaskId, TaskKey};

use crate::context::SchedContext;
use crate::error::SchedError;
use crate::host::{Host, HostError};
use crate::ops::{Placement, SchedOps};
use crate::sync::lock;
use crate::task::{CpuId, Liveness, Task};

/// How long an idle processor waits before asking for work again.
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

/// Time source of a [`SimHost`].
#[derive(Debug)]
pub enum SimClock {
    /// Wall-clock time; running a task sleeps for its run length.
    Monotonic(Instant),
    /// Time moves only when a task runs or a test advances it.
    Manual(AtomicU64),
}

#[derive(Debug)]
struct SimTask {
    task: Task,
    /// Work left in nanoseconds; `None` runs forever.
    remaining_ns: Option<u64>,
    enabled: bool,
}

#[derive(Debug)]
pub struct SimHost {
    nr_cpus: u32,
    clock: SimClock,
    quantum_ns: u64,
    tasks: Mutex<HashMap<TaskId, SimTask>>,
    idle: Box<[AtomicBool]>,
    next_id: AtomicU32,
    refuse: Option<String>,
    attached: Mutex<Option<String>>,
}

impl SimHost {
    /// Host with a wall clock.
    pub fn new(nr_cpus: u32) -> Self {
        Self::with_clock(nr_cpus, SimClock::Monotonic(Instant::now()))
    }

    /// Host with a deterministic clock starting at zero.
    pub fn manual(nr_cpus: u32) -> Self {
        Self::with_clock(nr_cpus, SimClock::Manual(AtomicU64::new(0)))
    }

    /// Host that refuses to attach any scheduler.
    pub fn refusing(nr_cpus: u32, reason: impl Into<String>) -> Self {
        let mut host = Self::manual(nr_cpus);
        host.refuse = Some(reason.into());
        host
    }

    fn with_clock(nr_cpus: u32, clock: SimClock) -> Self {
        Self {
            nr_cpus,
            clock,
            quantum_ns: u64::MAX,
            tasks: Mutex::new(HashMap::new()),
            idle: (0..nr_cpus).map(|_| AtomicBool::new(true)).collect(),
            next_id: AtomicU32::new(1),
            refuse: None,
            attached: Mutex::new(None),
        }
    }

    /// Cap how long a task runs per dispatch, below its slice.
    pub fn with_quantum(mut self, quantum_ns: u64) -> Self {
        self.quantum_ns = quantum_ns.max(1);
        self
    }

    /// Name of the currently attached scheduler.
    pub fn attached(&self) -> Option<String> {
        lock(&self.attached).clone()
    }

    /// Let `ns` of time pass.
    pub fn elapse(&self, ns: u64) {
        match &self.clock {
            SimClock::Manual(now) => {
                now.fetch_add(ns, Ordering::Relaxed);
            }
            SimClock::Monotonic(_) => std::thread::sleep(Duration::from_nanos(ns)),
        }
    }

    // ── Task table ──────────────────────────────────────────────────

    /// Create a task arriving now with `work_ns` of work (`None` = forever).
    pub fn spawn(&self, comm: &str, work_ns: Option<u64>) -> Task {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let task = Task::new(id, self.now_ns(), comm);
        self.insert(task.clone(), work_ns);
        task
    }

    /// Add or replace a task. Replacing an id with a new arrival time
    /// models the host recycling the id.
    pub fn insert(&self, task: Task, work_ns: Option<u64>) {
        lock(&self.tasks).insert(
            task.id(),
            SimTask {
                task,
                remaining_ns: work_ns,
                enabled: false,
            },
        );
    }

    pub fn remove(&self, key: TaskKey) -> Option<Task> {
        let mut tasks = lock(&self.tasks);
        match tasks.get(&key.id) {
            Some(t) if t.task.key == key => tasks.remove(&key.id).map(|t| t.task),
            _ => None,
        }
    }

    pub fn task(&self, key: TaskKey) -> Option<Task> {
        self.with_task(key, |t| t.clone())
    }

    pub fn with_task<R>(&self, key: TaskKey, f: impl FnOnce(&mut Task) -> R) -> Option<R> {
        let mut tasks = lock(&self.tasks);
        match tasks.get_mut(&key.id) {
            Some(t) if t.task.key == key => Some(f(&mut t.task)),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.tasks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Driving the hooks ───────────────────────────────────────────

    /// Make a task runnable: enable it on first wake, pick a processor,
    /// and enqueue unless it was placed directly.
    pub fn wake<S>(&self, sched: &S, ctx: &SchedContext, key: TaskKey) -> Result<Option<Placement>, SchedError>
    where
        S: SchedOps + ?Sized,
    {
        let Some((mut task, enabled)) = self.checkout(key, |t| (t.task.clone(), t.enabled)) else {
            return Ok(None);
        };
        if !enabled {
            sched.enable(ctx, &mut task);
        }
        let placement = sched.select_cpu(ctx, &task, task.cpu, 0);
        task.cpu = placement.cpu;
        task.liveness = Liveness::Runnable;
        self.checkout(key, |t| {
            t.task.vtime = task.vtime;
            t.task.cpu = task.cpu;
            t.task.liveness = Liveness::Runnable;
            t.enabled = true;
        });
        if !placement.direct {
            sched.enqueue(ctx, &task, 0)?;
        }
        Ok(Some(placement))
    }

    /// One scheduling round on `cpu`. Returns the task that ran, or `None`
    /// if the processor stayed idle.
    pub fn run_slice<S>(&self, sched: &S, ctx: &SchedContext, cpu: CpuId) -> Result<Option<TaskKey>, SchedError>
    where
        S: SchedOps + ?Sized,
    {
        let Some(key) = sched.dispatch(ctx, cpu, None)? else {
            self.set_idle(cpu, true);
            return Ok(None);
        };
        self.set_idle(cpu, false);

        let slice = ctx.slice_ns();
        let checked_out = self.checkout(key, |t| {
            if t.task.liveness.is_terminal() {
                return None;
            }
            if t.task.cpu != cpu {
                t.task.nr_migrations += 1;
                t.task.cpu = cpu;
            }
            t.task.liveness = Liveness::Running;
            t.task.slice_ns = slice;
            Some((t.task.clone(), t.remaining_ns))
        });
        let Some((mut task, remaining)) = checked_out.flatten() else {
            debug!(task = %key, cpu, "dispatched task vanished");
            return Ok(None);
        };

        sched.running(ctx, &task)?;

        let ran = slice.min(self.quantum_ns).min(remaining.unwrap_or(u64::MAX));
        self.elapse(ran);
        task.slice_ns = slice - ran;
        task.sum_exec_runtime_ns += ran;
        let finished = remaining.is_some_and(|r| r <= ran);
        task.liveness = if finished { Liveness::Dead } else { Liveness::Runnable };

        sched.stopping(ctx, &mut task, !finished)?;

        if finished {
            self.remove(key);
            return Ok(Some(key));
        }
        self.checkout(key, |t| {
            t.remaining_ns = remaining.map(|r| r - ran);
            t.task = task;
        });
        self.wake(sched, ctx, key)?;
        Ok(Some(key))
    }

    /// Keep `cpu` busy until shutdown or the scheduler exits.
    pub fn run_processor<S>(&self, sched: &S, ctx: &SchedContext, cpu: CpuId, shutdown: &AtomicBool) -> Result<(), SchedError>
    where
        S: SchedOps + ?Sized,
    {
        while !shutdown.load(Ordering::Relaxed) && !ctx.has_exited() {
            if self.run_slice(sched, ctx, cpu)?.is_none() {
                std::thread::sleep(IDLE_BACKOFF);
            }
        }
        Ok(())
    }

    /// Run every processor on a dedicated rayon pool until shutdown.
    /// Returns the first hook error, if any.
    pub fn run<S>(&self, sched: &S, ctx: &SchedContext, shutdown: &AtomicBool) -> Result<(), SchedError>
    where
        S: SchedOps + ?Sized,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.nr_cpus as usize)
            .thread_name(|i| format!("sim-cpu-{i}"))
            .build()
            .map_err(|e| SchedError::Setup(format!("processor pool: {e}")))?;

        info!("Simulated host running {} processors", self.nr_cpus);
        let failure: Mutex<Option<SchedError>> = Mutex::new(None);
        pool.scope(|s| {
            for cpu in 0..self.nr_cpus {
                let failure = &failure;
                s.spawn(move |_| {
                    if let Err(e) = self.run_processor(sched, ctx, cpu, shutdown) {
                        error!(cpu, error = %e, "processor stopped");
                        lock(failure).get_or_insert(e);
                    }
                });
            }
        });
        info!("Simulated host stopped");

        match failure.into_inner().unwrap_or_else(|p| p.into_inner()) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn checkout<R>(&self, key: TaskKey, f: impl FnOnce(&mut SimTask) -> R) -> Option<R> {
        let mut tasks = lock(&self.tasks);
        match tasks.get_mut(&key.id) {
            Some(t) if t.task.key == key => Some(f(t)),
            _ => None,
        }
    }

    fn set_idle(&self, cpu: CpuId, idle: bool) {
        if let Some(flag) = self.idle.get(cpu as usize) {
            flag.store(idle, Ordering::Relaxed);
        }
    }

    fn claim_idle(&self, cpu: CpuId) -> bool {
        self.idle.get(cpu as usize).is_some_and(|flag| {
            flag.compare_exchange(true, false, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        })
    }
}

impl Host for SimHost {
    fn nr_cpus(&self) -> u32 {
        self.nr_cpus
    }

    fn now_ns(&self) -> u64 {
        match &self.clock {
            SimClock::Monotonic(start) => u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX),
            SimClock::Manual(now) => now.load(Ordering::Relaxed),
        }
    }

    fn select_idle_cpu(&self, _task: &Task, prev_cpu: CpuId, _wake_flags: u64) -> (CpuId, bool) {
        if self.claim_idle(prev_cpu) {
            return (prev_cpu, true);
        }
        match (0..self.nr_cpus).find(|&cpu| self.claim_idle(cpu)) {
            Some(cpu) => (cpu, true),
            None => (prev_cpu, false),
        }
    }

    fn resolve(&self, key: TaskKey) -> bool {
        lock(&self.tasks)
            .get(&key.id)
            .is_some_and(|t| t.task.key == key && !t.task.liveness.is_terminal())
    }

    fn attach(&self, name: &str) -> Result<(), HostError> {
        if self.nr_cpus == 0 {
            return Err(HostError::NoProcessors);
        }
        if let Some(reason) = &self.refuse {
            return Err(HostError::Refused {
                name: name.to_string(),
                reason: reason.clone(),
            });
        }
        *lock(&self.attached) = Some(name.to_string());
        Ok(())
    }

    fn detach(&self, name: &str) {
        let mut attached = lock(&self.attached);
        if attached.as_deref() == Some(name) {
            *attached = None;
        }
    }
}
