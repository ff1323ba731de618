//! Offload latency accumulated over one report interval.

/// Running sum and count of elapsed times, in nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyWindow {
    sum_ns: u128,
    count: u64,
}

impl LatencyWindow {
    pub fn record(&mut self, elapsed_ns: u64) {
        self.sum_ns += u128::from(elapsed_ns);
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum_ns(&self) -> u128 {
        self.sum_ns
    }

    /// Mean latency in microseconds; `None` for an empty window.
    pub fn average_us(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(self.sum_ns as f64 / self.count as f64 / 1_000.0)
    }

    /// Close the window, returning its contents and starting a new one.
    pub fn take(&mut self) -> LatencyWindow {
        std::mem::take(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_has_no_average() {
        let w = LatencyWindow::default();
        assert_eq!(w.count(), 0);
        assert_eq!(w.average_us(), None);
    }

    #[test]
    fn average_in_microseconds() {
        let mut w = LatencyWindow::default();
        w.record(1_000);
        w.record(3_000);
        assert_eq!(w.count(), 2);
        assert_eq!(w.sum_ns(), 4_000);
        assert_eq!(w.average_us(), Some(2.0));
    }

    #[test]
    fn take_resets() {
        let mut w = LatencyWindow::default();
        w.record(500);
        let closed = w.take();
        assert_eq!(closed.count(), 1);
        assert_eq!(w, LatencyWindow::default());
    }

    #[test]
    fn large_sums_do_not_overflow() {
        let mut w = LatencyWindow::default();
        w.record(u64::MAX);
        w.record(u64::MAX);
        assert_eq!(w.sum_ns(), 2 * u128::from(u64::MAX));
    }
}
