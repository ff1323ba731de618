//! Per-task tracking registry.
//!
//! Sharded by task id so hooks on different processors rarely contend; each
//! shard lock is held only for a map lookup and a field update. A task that
//! is retired leaves a tombstone keyed by its full [`TaskKey`], so a late
//! hook for the same generation is detected instead of silently re-creating
//! the record. Tombstones are bounded per shard and evicted oldest first.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use offsched_core::{TaskId, TaskKey};

use crate::error::RegistryError;
use crate::sync::lock;
use crate::task::{CpuId, Task};

const MIN_TOMBSTONES_PER_SHARD: usize = 8;

/// What the scheduler knows about one live task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackingRecord {
    pub key: TaskKey,
    pub comm: String,
    pub first_seen_ns: u64,
    pub last_seen_ns: u64,
    /// Set while the task is on a processor.
    pub run_start_ns: Option<u64>,
    /// Accumulated on-processor time. Never decreases.
    pub run_time_ns: u64,
    pub run_count: u64,
    pub migrations: u64,
    pub last_cpu: Option<CpuId>,
    pub vtime: u64,
    pub min_flt: u64,
    pub maj_flt: u64,
    /// Arrival to retirement, set once the task is terminal.
    pub execution_time_ns: Option<u64>,
}

impl TrackingRecord {
    fn new(task: &Task, now_ns: u64) -> Self {
        Self {
            key: task.key,
            comm: task.comm.clone(),
            first_seen_ns: now_ns,
            last_seen_ns: now_ns,
            run_start_ns: None,
            run_time_ns: 0,
            run_count: 0,
            migrations: 0,
            last_cpu: None,
            vtime: task.vtime,
            min_flt: task.min_flt,
            maj_flt: task.maj_flt,
            execution_time_ns: None,
        }
    }

    fn refresh(&mut self, task: &Task, now_ns: u64) {
        if self.comm != task.comm {
            self.comm.clone_from(&task.comm);
        }
        self.last_seen_ns = self.last_seen_ns.max(now_ns);
        self.vtime = task.vtime;
        self.min_flt = task.min_flt;
        self.maj_flt = task.maj_flt;
    }

    /// Mark the task as started on `cpu`. Returns whether it migrated.
    pub(crate) fn start_run(&mut self, cpu: CpuId, now_ns: u64) -> bool {
        let migrated = self.last_cpu.is_some_and(|last| last != cpu);
        if migrated {
            self.migrations += 1;
        }
        self.last_cpu = Some(cpu);
        self.run_start_ns = Some(now_ns);
        self.run_count += 1;
        migrated
    }

    /// Close the current run, if any, and return its length.
    pub(crate) fn stop_run(&mut self, now_ns: u64) -> u64 {
        let ran = self
            .run_start_ns
            .take()
            .map_or(0, |start| now_ns.saturating_sub(start));
        self.run_time_ns = self.run_time_ns.saturating_add(ran);
        ran
    }
}

#[derive(Debug)]
enum Slot {
    Live(TrackingRecord),
    Retired { arrival_ns: u64 },
}

#[derive(Debug, Default)]
struct Shard {
    slots: HashMap<TaskId, Slot>,
    graveyard: VecDeque<TaskKey>,
}

impl Shard {
    fn bury(&mut self, key: TaskKey, limit: usize) {
        self.slots.insert(
            key.id,
            Slot::Retired {
                arrival_ns: key.arrival_ns,
            },
        );
        self.graveyard.push_back(key);
        while self.graveyard.len() > limit {
            let Some(old) = self.graveyard.pop_front() else {
                break;
            };
            let still_buried = matches!(
                self.slots.get(&old.id),
                Some(Slot::Retired { arrival_ns }) if *arrival_ns == old.arrival_ns
            );
            if still_buried {
                self.slots.remove(&old.id);
            }
        }
    }
}

/// Bounded, sharded map from task identity to [`TrackingRecord`].
#[derive(Debug)]
pub struct TaskRegistry {
    shards: Box<[Mutex<Shard>]>,
    live: AtomicUsize,
    capacity: usize,
    tombstone_limit: usize,
}

impl TaskRegistry {
    /// `shards` must be a power of two.
    pub fn new(capacity: usize, shards: usize) -> Self {
        let shards = shards.max(1).next_power_of_two();
        Self {
            shards: (0..shards).map(|_| Mutex::new(Shard::default())).collect(),
            live: AtomicUsize::new(0),
            capacity,
            tombstone_limit: capacity.div_ceil(shards).max(MIN_TOMBSTONES_PER_SHARD),
        }
    }

    fn shard(&self, id: TaskId) -> MutexGuard<'_, Shard> {
        let idx = (id.0 as usize) & (self.shards.len() - 1);
        lock(&self.shards[idx])
    }

    fn reserve(&self) -> Result<(), RegistryError> {
        self.live
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| RegistryError::Full {
                capacity: self.capacity,
            })
    }

    /// Create or refresh the record for `task`, then apply `f` to it.
    ///
    /// A live record with a different arrival time means the host reused
    /// an id before retiring its previous holder; that is rejected with
    /// [`RegistryError::Reused`] and the live record is left untouched.
    pub fn observe<R>(
        &self,
        task: &Task,
        now_ns: u64,
        f: impl FnOnce(&mut TrackingRecord) -> R,
    ) -> Result<R, RegistryError> {
        let key = task.key;
        let mut shard = self.shard(key.id);
        match shard.slots.get_mut(&key.id) {
            Some(Slot::Live(record)) if record.key == key => {
                record.refresh(task, now_ns);
                return Ok(f(record));
            }
            Some(Slot::Live(record)) => {
                return Err(RegistryError::Reused {
                    live: record.key,
                    incoming: key,
                });
            }
            Some(Slot::Retired { arrival_ns }) if *arrival_ns == key.arrival_ns => {
                return Err(RegistryError::Retired(key));
            }
            Some(Slot::Retired { .. }) | None => {}
        }

        self.reserve()?;
        let mut fresh = TrackingRecord::new(task, now_ns);
        let out = f(&mut fresh);
        shard.slots.insert(key.id, Slot::Live(fresh));
        Ok(out)
    }

    /// Refresh and apply `f` to an existing record without creating one.
    ///
    /// Returns `Ok(None)` when the task is not tracked.
    pub fn update<R>(
        &self,
        task: &Task,
        now_ns: u64,
        f: impl FnOnce(&mut TrackingRecord) -> R,
    ) -> Result<Option<R>, RegistryError> {
        let key = task.key;
        let mut shard = self.shard(key.id);
        match shard.slots.get_mut(&key.id) {
            Some(Slot::Live(record)) if record.key == key => {
                record.refresh(task, now_ns);
                Ok(Some(f(record)))
            }
            Some(Slot::Live(record)) => Err(RegistryError::Reused {
                live: record.key,
                incoming: key,
            }),
            Some(Slot::Retired { arrival_ns }) if *arrival_ns == key.arrival_ns => {
                Err(RegistryError::Retired(key))
            }
            _ => Ok(None),
        }
    }

    /// Remove a terminal task, leaving a tombstone.
    ///
    /// Returns the final record with its execution time filled in, or
    /// `Ok(None)` if the task was never tracked.
    pub fn retire(&self, key: TaskKey, now_ns: u64) -> Result<Option<TrackingRecord>, RegistryError> {
        let mut shard = self.shard(key.id);
        match shard.slots.get(&key.id) {
            Some(Slot::Live(record)) if record.key == key => {}
            Some(Slot::Live(record)) => {
                return Err(RegistryError::Reused {
                    live: record.key,
                    incoming: key,
                });
            }
            Some(Slot::Retired { arrival_ns }) if *arrival_ns == key.arrival_ns => {
                return Err(RegistryError::Retired(key));
            }
            _ => return Ok(None),
        }
        let Some(Slot::Live(mut record)) = shard.slots.remove(&key.id) else {
            return Ok(None);
        };
        self.live.fetch_sub(1, Ordering::Relaxed);
        record.execution_time_ns = Some(now_ns.saturating_sub(record.first_seen_ns));
        shard.bury(key, self.tombstone_limit);
        Ok(Some(record))
    }

    pub fn get(&self, key: TaskKey) -> Option<TrackingRecord> {
        match self.shard(key.id).slots.get(&key.id) {
            Some(Slot::Live(record)) if record.key == key => Some(record.clone()),
            _ => None,
        }
    }

    pub fn contains(&self, key: TaskKey) -> bool {
        matches!(
            self.shard(key.id).slots.get(&key.id),
            Some(Slot::Live(record)) if record.key == key
        )
    }

    pub fn is_retired(&self, key: TaskKey) -> bool {
        matches!(
            self.shard(key.id).slots.get(&key.id),
            Some(Slot::Retired { arrival_ns }) if *arrival_ns == key.arrival_ns
        )
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of every live record, shard by shard.
    pub fn snapshot(&self) -> Vec<TrackingRecord> {
        let mut out = Vec::with_capacity(self.len());
        for shard in self.shards.iter() {
            let shard = lock(shard);
            out.extend(shard.slots.values().filter_map(|slot| match slot {
                Slot::Live(record) => Some(record.clone()),
                Slot::Retired { .. } => None,
            }));
        }
        out
    }
}
