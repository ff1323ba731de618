use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Scheduler-wide event counters.
///
/// Updated from every processor with relaxed atomics and read without
/// locking. Individual values are exact; a snapshot is not a consistent cut.
#[derive(Debug, Default)]
pub struct Counters {
    pub(crate) enqueued: AtomicU64,
    pub(crate) dispatched: AtomicU64,
    pub(crate) local_dispatched: AtomicU64,
    pub(crate) sent: AtomicU64,
    pub(crate) returned: AtomicU64,
    pub(crate) missed: AtomicU64,
    pub(crate) errors: AtomicU64,
    pub(crate) registry_full: AtomicU64,
    pub(crate) retired: AtomicU64,
    pub(crate) running: AtomicU64,
    pub(crate) stopping: AtomicU64,
}

#[inline]
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    /// Offload requests sent but neither returned nor given up on.
    ///
    /// `returned` and `missed` are read before `sent`: every return or miss
    /// is preceded by its send, so the difference cannot go negative.
    pub fn outstanding(&self) -> u64 {
        let settled = self
            .returned
            .load(Ordering::Relaxed)
            .saturating_add(self.missed.load(Ordering::Relaxed));
        self.sent.load(Ordering::Relaxed).saturating_sub(settled)
    }

    /// Reserve a send before the request is pushed.
    pub(crate) fn reserve_send(&self) {
        bump(&self.sent);
    }

    /// Undo [`Counters::reserve_send`] when the push failed. A concurrent
    /// snapshot may see `sent` drop by one; it never falls below
    /// `returned + missed`.
    pub(crate) fn release_send(&self) {
        self.sent.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            local_dispatched: self.local_dispatched.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            returned: self.returned.load(Ordering::Relaxed),
            missed: self.missed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            registry_full: self.registry_full.load(Ordering::Relaxed),
            retired: self.retired.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Relaxed),
            stopping: self.stopping.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Counters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub enqueued: u64,
    pub dispatched: u64,
    pub local_dispatched: u64,
    pub sent: u64,
    pub returned: u64,
    pub missed: u64,
    pub errors: u64,
    pub registry_full: u64,
    pub retired: u64,
    pub running: u64,
    pub stopping: u64,
}

impl CounterSnapshot {
    pub fn outstanding(&self) -> u64 {
        self.sent
            .saturating_sub(self.returned.saturating_add(self.missed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outstanding_tracks_sent_minus_settled() {
        let c = Counters::default();
        for _ in 0..5 {
            c.reserve_send();
        }
        bump(&c.returned);
        bump(&c.missed);
        assert_eq!(c.outstanding(), 3);
        assert_eq!(c.snapshot().outstanding(), 3);
    }

    #[test]
    fn released_send_is_not_outstanding() {
        let c = Counters::default();
        c.reserve_send();
        c.release_send();
        assert_eq!(c.outstanding(), 0);
        assert_eq!(c.snapshot().sent, 0);
    }

    #[test]
    fn outstanding_never_negative() {
        let snap = CounterSnapshot {
            sent: 1,
            returned: 2,
            missed: 1,
            ..Default::default()
        };
        assert_eq!(snap.outstanding(), 0);
    }

    #[test]
    fn snapshot_serializes_all_fields() {
        let c = Counters::default();
        bump(&c.enqueued);
        let json = serde_json::to_value(c.snapshot()).unwrap();
        assert_eq!(json["enqueued"], 1);
        assert_eq!(json["registry_full"], 0);
    }
}
