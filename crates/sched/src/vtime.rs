//! Virtual time helpers.
//!
//! All comparisons are wrap-safe: `a` is before `b` when the signed distance
//! `a - b` is negative. Valid as long as live vtimes stay within 2^63 of each
//! other.

use std::sync::atomic::{AtomicU64, Ordering};

#[inline]
pub fn vtime_before(a: u64, b: u64) -> bool {
    (a.wrapping_sub(b) as i64) < 0
}

/// Charge `used_ns` of run time at the given weight.
pub fn charge(used_ns: u64, scale: u64, weight: u64) -> u64 {
    let charged = u128::from(used_ns) * u128::from(scale) / u128::from(weight.max(1));
    u64::try_from(charged).unwrap_or(u64::MAX)
}

/// The global virtual clock.
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: AtomicU64,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }

    /// Move the clock forward to `vtime` with a single compare-and-swap.
    ///
    /// A concurrent advance wins and this one is dropped. Returns whether
    /// the clock moved.
    pub fn advance_to(&self, vtime: u64) -> bool {
        let current = self.now.load(Ordering::Relaxed);
        if !vtime_before(current, vtime) {
            return false;
        }
        self.now
            .compare_exchange(current, vtime, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    /// Enqueue key for a task: its own vtime, but never more than one slice
    /// behind the clock, so sleepers cannot bank unbounded credit.
    pub fn enqueue_key(&self, task_vtime: u64, slice_ns: u64) -> u64 {
        let floor = self.now().wrapping_sub(slice_ns);
        if vtime_before(task_vtime, floor) {
            floor
        } else {
            task_vtime
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn before_handles_wraparound() {
        assert!(vtime_before(1, 2));
        assert!(!vtime_before(2, 1));
        assert!(!vtime_before(5, 5));
        assert!(vtime_before(u64::MAX - 10, 5));
        assert!(!vtime_before(5, u64::MAX - 10));
    }

    #[test]
    fn charge_scales_by_weight() {
        assert_eq!(charge(20_000_000, 100, 100), 20_000_000);
        assert_eq!(charge(20_000_000, 100, 200), 10_000_000);
        assert_eq!(charge(1_000, 100, 0), 100_000);
        assert_eq!(charge(u64::MAX, 100, 1), u64::MAX);
    }

    #[test]
    fn advance_is_forward_only() {
        let clock = VirtualClock::new();
        assert!(clock.advance_to(500));
        assert!(!clock.advance_to(400));
        assert_eq!(clock.now(), 500);
    }

    #[test]
    fn enqueue_key_clamps_to_one_slice_behind() {
        let clock = VirtualClock::new();
        clock.advance_to(100_000);
        assert_eq!(clock.enqueue_key(10, 20_000), 80_000);
        assert_eq!(clock.enqueue_key(95_000, 20_000), 95_000);
    }

    #[test]
    fn enqueue_key_at_start_keeps_task_vtime() {
        let clock = VirtualClock::new();
        assert_eq!(clock.enqueue_key(0, 20_000_000), 0);
    }
}
