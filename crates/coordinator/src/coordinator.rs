//! Userspace side of the offload channel.
//!
//! A single thread that answers requests with the delegated computation,
//! folds finalized records into a latency window and emits one report per
//! interval. It never touches scheduler state beyond the channel and the
//! read-only [`SchedProbe`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use offsched_core::{ChannelHandle, CoordinatorConfig, HalvePlusOne, OffloadCompute};
use offsched_sched::{CounterSnapshot, SchedContext};

use crate::error::CoordinatorError;
use crate::latency::LatencyWindow;
use crate::report::{IntervalReport, ReportSink, Summary};

const MIN_BACKOFF: Duration = Duration::from_micros(50);

/// What the coordinator may observe of a running scheduler.
pub trait SchedProbe: Send + Sync {
    fn counters(&self) -> CounterSnapshot;
    fn consumer_runtime_ns(&self) -> u64;
    fn now_ns(&self) -> u64;
    fn uptime_ns(&self) -> u64;
    fn has_exited(&self) -> bool;
}

impl SchedProbe for SchedContext {
    fn counters(&self) -> CounterSnapshot {
        SchedContext::counters(self)
    }

    fn consumer_runtime_ns(&self) -> u64 {
        SchedContext::consumer_runtime_ns(self)
    }

    fn now_ns(&self) -> u64 {
        SchedContext::now_ns(self)
    }

    fn uptime_ns(&self) -> u64 {
        SchedContext::uptime_ns(self)
    }

    fn has_exited(&self) -> bool {
        SchedContext::has_exited(self)
    }
}

pub struct Coordinator {
    config: CoordinatorConfig,
    channel: ChannelHandle,
    probe: Arc<dyn SchedProbe>,
    compute: Arc<dyn OffloadCompute>,
    shutdown: Arc<AtomicBool>,
    window: LatencyWindow,
    interval_index: u64,
    interval_started_ns: u64,
    runtime_at_interval_start: u64,
    served: u64,
    samples: u64,
    response_drops: u64,
    interval_drops: u64,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        channel: ChannelHandle,
        probe: Arc<dyn SchedProbe>,
        compute: Arc<dyn OffloadCompute>,
    ) -> Self {
        let interval_started_ns = probe.now_ns();
        let runtime_at_interval_start = probe.consumer_runtime_ns();
        Self {
            config,
            channel,
            probe,
            compute,
            shutdown: Arc::new(AtomicBool::new(false)),
            window: LatencyWindow::default(),
            interval_index: 0,
            interval_started_ns,
            runtime_at_interval_start,
            served: 0,
            samples: 0,
            response_drops: 0,
            interval_drops: 0,
        }
    }

    /// Coordinator for a live scheduler instance using the reference
    /// computation.
    pub fn for_context(config: CoordinatorConfig, ctx: Arc<SchedContext>) -> Self {
        let channel = ctx.channel();
        Self::new(config, channel, ctx, Arc::new(HalvePlusOne))
    }

    /// Flag that stops [`Coordinator::run`] when set.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn interval_index(&self) -> u64 {
        self.interval_index
    }

    pub fn served(&self) -> u64 {
        self.served
    }

    pub fn response_drops(&self) -> u64 {
        self.response_drops
    }

    /// Answer pending requests. Returns how many were taken.
    pub fn serve_requests(&mut self) -> usize {
        let mut taken = 0;
        while taken < self.channel.capacity() {
            let Some(request) = self.channel.take_request() else {
                break;
            };
            taken += 1;
            self.served += 1;
            let result = self.compute.compute(request.payload);
            if let Err(e) = self.channel.submit_response(request.respond(result)) {
                self.response_drops += 1;
                self.interval_drops += 1;
                warn!(seq = request.seq, error = %e, "dropping offload response");
            }
        }
        taken
    }

    /// Move finalized records into the latency window.
    pub fn collect_results(&mut self) -> usize {
        let mut taken = 0;
        while taken < self.channel.capacity() {
            let Some(record) = self.channel.take_finalized() else {
                break;
            };
            taken += 1;
            self.samples += 1;
            self.window.record(record.elapsed_ns);
            debug!(seq = record.seq, elapsed_ns = record.elapsed_ns, "offload result");
        }
        taken
    }

    /// Emit the report for the current interval once it has elapsed.
    /// At most one report per call; a late caller catches up one interval
    /// at a time.
    pub fn maybe_report(&mut self, sink: &mut dyn ReportSink) -> Result<Option<IntervalReport>, CoordinatorError> {
        let interval_ns = self.config.report_interval_ms.saturating_mul(1_000_000).max(1);
        let now = self.probe.now_ns();
        let wall = now.saturating_sub(self.interval_started_ns);
        if wall < interval_ns {
            return Ok(None);
        }

        let window = self.window.take();
        let runtime = self.probe.consumer_runtime_ns();
        let ran = runtime.saturating_sub(self.runtime_at_interval_start);
        let report = IntervalReport {
            interval_index: self.interval_index,
            at: Utc::now(),
            sample_count: window.count(),
            average_latency_us: window.average_us(),
            running_ratio: Some(ran as f64 / wall as f64),
            response_drops: std::mem::take(&mut self.interval_drops),
        };

        self.interval_index += 1;
        self.interval_started_ns = self.interval_started_ns.saturating_add(interval_ns);
        self.runtime_at_interval_start = runtime;

        sink.interval(&report)?;
        Ok(Some(report))
    }

    /// One loop iteration. Returns the number of records handled.
    pub fn poll_once(&mut self, sink: &mut dyn ReportSink) -> Result<usize, CoordinatorError> {
        let handled = self.serve_requests() + self.collect_results();
        self.maybe_report(sink)?;
        Ok(handled)
    }

    /// Poll until shutdown or until the scheduler exits, then write the
    /// summary. Idle waits back off up to `poll_wait_ms`.
    pub fn run(&mut self, sink: &mut dyn ReportSink) -> Result<Summary, CoordinatorError> {
        info!(
            "Coordinator started, reporting every {} ms",
            self.config.report_interval_ms
        );
        let max_wait = Duration::from_millis(self.config.poll_wait_ms);
        let mut backoff = MIN_BACKOFF.min(max_wait);

        while !self.shutdown.load(Ordering::Relaxed) && !self.probe.has_exited() {
            if self.poll_once(sink)? > 0 {
                backoff = MIN_BACKOFF.min(max_wait);
                continue;
            }
            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(max_wait);
        }

        // In-flight requests are abandoned; results already published count.
        self.collect_results();
        let summary = self.summary();
        info!(
            sent = summary.counters.sent,
            returned = summary.counters.returned,
            missed = summary.counters.missed,
            served = summary.served,
            intervals = summary.intervals,
            "Coordinator stopped"
        );
        sink.summary(&summary)?;
        Ok(summary)
    }

    pub fn summary(&self) -> Summary {
        let counters = self.probe.counters();
        let consumer_runtime_ns = self.probe.consumer_runtime_ns();
        let uptime_ns = self.probe.uptime_ns();
        Summary {
            counters,
            outstanding: counters.outstanding(),
            served: self.served,
            response_drops: self.response_drops,
            finalized_dropped: self.channel.finalized_dropped(),
            samples: self.samples,
            intervals: self.interval_index,
            consumer_runtime_ns,
            uptime_ns,
            running_ratio: (uptime_ns > 0).then(|| consumer_runtime_ns as f64 / uptime_ns as f64),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use offsched_core::{OffloadChannel, OffloadRecord, ReportFormat};

    use super::*;
    use crate::report::WriterSink;

    #[derive(Default)]
    struct FakeProbe {
        now: AtomicU64,
        runtime: AtomicU64,
        exited: AtomicBool,
    }

    impl SchedProbe for FakeProbe {
        fn counters(&self) -> CounterSnapshot {
            CounterSnapshot::default()
        }
        fn consumer_runtime_ns(&self) -> u64 {
            self.runtime.load(Ordering::Relaxed)
        }
        fn now_ns(&self) -> u64 {
            self.now.load(Ordering::Relaxed)
        }
        fn uptime_ns(&self) -> u64 {
            self.now_ns()
        }
        fn has_exited(&self) -> bool {
            self.exited.load(Ordering::Relaxed)
        }
    }

    fn coordinator(capacity: usize, report_interval_ms: u64) -> (Coordinator, ChannelHandle, Arc<FakeProbe>) {
        let channel = OffloadChannel::new(capacity).unwrap();
        let probe = Arc::new(FakeProbe::default());
        let config = CoordinatorConfig {
            poll_wait_ms: 1,
            report_interval_ms,
            format: ReportFormat::Csv,
        };
        let c = Coordinator::new(config, channel.clone(), probe.clone(), Arc::new(HalvePlusOne));
        (c, channel, probe)
    }

    fn finalized(seq: u64, elapsed_ns: u64) -> OffloadRecord {
        OffloadRecord::request(seq, None, 0, 0)
            .respond(1)
            .finalize(elapsed_ns)
            .unwrap()
    }

    #[test]
    fn serves_requests_with_delegated_compute() {
        let (mut c, channel, _) = coordinator(4, 1_000);
        channel
            .submit_request(OffloadRecord::request(7, None, 10, 0))
            .unwrap();
        assert_eq!(c.serve_requests(), 1);

        let response = channel.take_response().unwrap();
        assert_eq!(response.seq, 7);
        assert_eq!(response.payload, 6);
        assert_eq!(c.served(), 1);
    }

    #[test]
    fn full_response_queue_drops_and_counts() {
        let (mut c, channel, _) = coordinator(1, 1_000);
        channel.submit_response(finalized(0, 0)).unwrap();
        channel
            .submit_request(OffloadRecord::request(1, None, 4, 0))
            .unwrap();
        c.serve_requests();
        assert_eq!(c.response_drops(), 1);
        assert_eq!(channel.pending_responses(), 1);
    }

    #[test]
    fn reports_on_interval_boundary() {
        let (mut c, channel, probe) = coordinator(8, 1);
        let mut sink = WriterSink::new(Vec::new(), ReportFormat::Csv);

        channel.publish_finalized(finalized(0, 2_000));
        channel.publish_finalized(finalized(1, 4_000));
        assert_eq!(c.collect_results(), 2);
        assert_eq!(c.maybe_report(&mut sink).unwrap(), None);

        probe.now.store(1_000_000, Ordering::Relaxed);
        probe.runtime.store(250_000, Ordering::Relaxed);
        let first = c.maybe_report(&mut sink).unwrap().unwrap();
        assert_eq!(first.interval_index, 0);
        assert_eq!(first.sample_count, 2);
        assert_eq!(first.average_latency_us, Some(3.0));
        assert_eq!(first.running_ratio, Some(0.25));
        assert_eq!(c.maybe_report(&mut sink).unwrap(), None);

        probe.now.store(2_000_000, Ordering::Relaxed);
        let second = c.maybe_report(&mut sink).unwrap().unwrap();
        assert_eq!(second.interval_index, 1);
        assert_eq!(second.sample_count, 0);
        assert_eq!(second.average_latency_us, None);
        assert_eq!(second.running_ratio, Some(0.0));

        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(out, "0, 2, 3.00, 0.2500\n1, 0, n/a, 0.0000\n");
    }

    #[test]
    fn late_caller_catches_up_one_interval_at_a_time() {
        let (mut c, _, probe) = coordinator(8, 1);
        let mut sink = WriterSink::new(Vec::new(), ReportFormat::Csv);
        probe.now.store(3_500_000, Ordering::Relaxed);
        let indices: Vec<u64> = std::iter::from_fn(|| c.maybe_report(&mut sink).unwrap())
            .map(|r| r.interval_index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(c.interval_index(), 3);
    }

    #[test]
    fn run_stops_when_scheduler_exits() {
        let (mut c, channel, probe) = coordinator(8, 1_000);
        channel.publish_finalized(finalized(0, 1_000));
        probe.exited.store(true, Ordering::Relaxed);

        let mut sink = WriterSink::new(Vec::new(), ReportFormat::Json);
        let summary = c.run(&mut sink).unwrap();
        assert_eq!(summary.samples, 1);
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let json: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(json["samples"], 1);
    }

    #[test]
    fn run_stops_on_shutdown() {
        let (mut c, channel, _) = coordinator(8, 1_000);
        let shutdown = c.shutdown_signal();
        let worker = std::thread::spawn(move || {
            let mut sink = WriterSink::new(Vec::new(), ReportFormat::Csv);
            c.run(&mut sink).unwrap()
        });

        channel
            .submit_request(OffloadRecord::request(0, None, 10, 0))
            .unwrap();
        let mut response = None;
        for _ in 0..1_000 {
            response = channel.take_response();
            if response.is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        shutdown.store(true, Ordering::Relaxed);

        let summary = worker.join().unwrap();
        assert_eq!(response.map(|r| r.payload), Some(6));
        assert_eq!(summary.served, 1);
    }
}
