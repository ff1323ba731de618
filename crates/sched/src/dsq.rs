//! Dispatch queues: one shared ordered queue plus per-processor local FIFOs.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use offsched_core::TaskKey;

use crate::sync::lock;
use crate::task::CpuId;
use crate::vtime::vtime_before;

/// One queued task with its ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchEntry {
    pub task: TaskKey,
    /// Enqueue sequence (FIFO) or virtual time (fair).
    pub key: u64,
    /// Arrival sequence, breaks ties between equal keys.
    pub seq: u64,
}

impl Ord for DispatchEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        let by_key = if self.key == other.key {
            CmpOrdering::Equal
        } else if vtime_before(self.key, other.key) {
            CmpOrdering::Less
        } else {
            CmpOrdering::Greater
        };
        by_key.then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for DispatchEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// The shared dispatch queue, smallest key first.
#[derive(Debug, Default)]
pub struct DispatchQueue {
    heap: Mutex<BinaryHeap<Reverse<DispatchEntry>>>,
    seq: AtomicU64,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append in arrival order.
    pub fn insert_fifo(&self, task: TaskKey) -> DispatchEntry {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.push(DispatchEntry { task, key: seq, seq })
    }

    /// Insert ordered by virtual time.
    pub fn insert_vtime(&self, task: TaskKey, vtime: u64) -> DispatchEntry {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.push(DispatchEntry {
            task,
            key: vtime,
            seq,
        })
    }

    fn push(&self, entry: DispatchEntry) -> DispatchEntry {
        lock(&self.heap).push(Reverse(entry));
        entry
    }

    pub fn pop(&self) -> Option<DispatchEntry> {
        lock(&self.heap).pop().map(|Reverse(entry)| entry)
    }

    pub fn len(&self) -> usize {
        lock(&self.heap).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let mut heap = lock(&self.heap);
        let n = heap.len();
        heap.clear();
        n
    }
}

/// Per-processor fast-path queues.
#[derive(Debug)]
pub struct LocalQueues {
    queues: Box<[Mutex<VecDeque<TaskKey>>]>,
}

impl LocalQueues {
    pub fn new(nr_cpus: u32) -> Self {
        Self {
            queues: (0..nr_cpus).map(|_| Mutex::new(VecDeque::new())).collect(),
        }
    }

    /// Queue `task` on `cpu`. Returns `false` for an unknown processor.
    pub fn push(&self, cpu: CpuId, task: TaskKey) -> bool {
        match self.queues.get(cpu as usize) {
            Some(q) => {
                lock(q).push_back(task);
                true
            }
            None => false,
        }
    }

    pub fn pop(&self, cpu: CpuId) -> Option<TaskKey> {
        self.queues.get(cpu as usize).and_then(|q| lock(q).pop_front())
    }

    pub fn len(&self, cpu: CpuId) -> usize {
        self.queues.get(cpu as usize).map_or(0, |q| lock(q).len())
    }

    pub fn total_len(&self) -> usize {
        self.queues.iter().map(|q| lock(q).len()).sum()
    }

    pub fn clear(&self) -> usize {
        self.queues
            .iter()
            .map(|q| {
                let mut q = lock(q);
                let n = q.len();
                q.clear();
                n
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use offsched_core::TaskId;

    use super::*;

    fn key(id: u32) -> TaskKey {
        TaskKey::new(TaskId(id), 0)
    }

    #[test]
    fn fifo_pops_in_insertion_order() {
        let q = DispatchQueue::new();
        for id in [5, 3, 9, 1] {
            q.insert_fifo(key(id));
        }
        let order: Vec<u32> = std::iter::from_fn(|| q.pop()).map(|e| e.task.id.0).collect();
        assert_eq!(order, vec![5, 3, 9, 1]);
    }

    #[test]
    fn vtime_pops_non_decreasing() {
        let q = DispatchQueue::new();
        for (id, vt) in [(1, 300), (2, 100), (3, 200), (4, 100), (5, 50)] {
            q.insert_vtime(key(id), vt);
        }
        let popped: Vec<DispatchEntry> = std::iter::from_fn(|| q.pop()).collect();
        let keys: Vec<u64> = popped.iter().map(|e| e.key).collect();
        assert_eq!(keys, vec![50, 100, 100, 200, 300]);
        // Equal keys keep arrival order.
        assert_eq!(popped[1].task.id.0, 2);
        assert_eq!(popped[2].task.id.0, 4);
    }

    #[test]
    fn vtime_order_survives_wraparound() {
        let q = DispatchQueue::new();
        q.insert_vtime(key(1), 10);
        q.insert_vtime(key(2), u64::MAX - 5);
        assert_eq!(q.pop().map(|e| e.task.id.0), Some(2));
        assert_eq!(q.pop().map(|e| e.task.id.0), Some(1));
    }

    #[test]
    fn concurrent_pops_never_duplicate() {
        let q = Arc::new(DispatchQueue::new());
        for id in 0..1_000 {
            q.insert_fifo(key(id));
        }
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(e) = q.pop() {
                        seen.push(e.task.id.0);
                    }
                    seen
                })
            })
            .collect();
        let mut all = HashSet::new();
        let mut total = 0;
        for h in handles {
            for id in h.join().unwrap() {
                all.insert(id);
                total += 1;
            }
        }
        assert_eq!(total, 1_000);
        assert_eq!(all.len(), 1_000);
    }

    #[test]
    fn local_queues_are_per_cpu() {
        let lq = LocalQueues::new(2);
        assert!(lq.push(0, key(1)));
        assert!(lq.push(1, key(2)));
        assert!(!lq.push(2, key(3)));
        assert_eq!(lq.pop(1), Some(key(2)));
        assert_eq!(lq.pop(1), None);
        assert_eq!(lq.total_len(), 1);
        assert_eq!(lq.clear(), 1);
        assert_eq!(lq.len(0), 0);
    }
}
