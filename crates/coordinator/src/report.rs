//! Interval reports and the end-of-run summary, and where they are written.

use std::fmt;
use std::io::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;

use offsched_core::ReportFormat;
use offsched_sched::CounterSnapshot;

use crate::error::CoordinatorError;

/// One line of telemetry, emitted per report interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntervalReport {
    pub interval_index: u64,
    pub at: DateTime<Utc>,
    pub sample_count: u64,
    pub average_latency_us: Option<f64>,
    /// Share of the interval the consumer spent on a processor.
    pub running_ratio: Option<f64>,
    pub response_drops: u64,
}

impl IntervalReport {
    /// `index, count, average, ratio`; missing values render as `n/a`.
    pub fn to_csv_line(&self) -> String {
        let avg = self
            .average_latency_us
            .map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}"));
        let ratio = self
            .running_ratio
            .map_or_else(|| "n/a".to_string(), |v| format!("{v:.4}"));
        format!("{}, {}, {avg}, {ratio}", self.interval_index, self.sample_count)
    }
}

/// Totals printed when the coordinator stops.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub counters: CounterSnapshot,
    pub outstanding: u64,
    pub served: u64,
    pub response_drops: u64,
    pub finalized_dropped: u64,
    pub samples: u64,
    pub intervals: u64,
    pub consumer_runtime_ns: u64,
    pub uptime_ns: u64,
    pub running_ratio: Option<f64>,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counters;
        writeln!(f, "Sent: {} Returned: {} Missed: {}", c.sent, c.returned, c.missed)?;
        writeln!(f, "Enqueued: {} Dispatched: {} Local: {}", c.enqueued, c.dispatched, c.local_dispatched)?;
        writeln!(f, "Errors: {} Registry full: {}", c.errors, c.registry_full)?;
        writeln!(f, "Running: {} Stopping: {} Retired: {}", c.running, c.stopping, c.retired)?;
        writeln!(
            f,
            "Served: {} Response drops: {} Finalized drops: {}",
            self.served, self.response_drops, self.finalized_dropped
        )?;
        writeln!(
            f,
            "Consumer running time (ns): {} Total time (ns): {}",
            self.consumer_runtime_ns, self.uptime_ns
        )?;
        match self.running_ratio {
            Some(r) => write!(f, "Consumer running ratio: {r:.4}"),
            None => write!(f, "Consumer running ratio: n/a"),
        }
    }
}

/// Destination for reports.
pub trait ReportSink: Send {
    fn interval(&mut self, report: &IntervalReport) -> Result<(), CoordinatorError>;
    fn summary(&mut self, summary: &Summary) -> Result<(), CoordinatorError>;
}

/// Writes reports as CSV lines or one JSON object per line.
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: W,
    format: ReportFormat,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W, format: ReportFormat) -> Self {
        Self { writer, format }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl WriterSink<std::io::Stdout> {
    pub fn stdout(format: ReportFormat) -> Self {
        Self::new(std::io::stdout(), format)
    }
}

impl<W: Write + Send> ReportSink for WriterSink<W> {
    fn interval(&mut self, report: &IntervalReport) -> Result<(), CoordinatorError> {
        match self.format {
            ReportFormat::Csv => writeln!(self.writer, "{}", report.to_csv_line())?,
            ReportFormat::Json => {
                serde_json::to_writer(&mut self.writer, report)?;
                writeln!(self.writer)?;
            }
        }
        self.writer.flush()?;
        Ok(())
    }

    fn summary(&mut self, summary: &Summary) -> Result<(), CoordinatorError> {
        match self.format {
            ReportFormat::Csv => writeln!(self.writer, "{summary}")?,
            ReportFormat::Json => {
                serde_json::to_writer(&mut self.writer, summary)?;
                writeln!(self.writer)?;
            }
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(avg: Option<f64>, ratio: Option<f64>) -> IntervalReport {
        IntervalReport {
            interval_index: 3,
            at: Utc::now(),
            sample_count: 12,
            average_latency_us: avg,
            running_ratio: ratio,
            response_drops: 0,
        }
    }

    #[test]
    fn csv_line_formats_values() {
        assert_eq!(report(Some(12.3), Some(0.5)).to_csv_line(), "3, 12, 12.30, 0.5000");
    }

    #[test]
    fn csv_line_renders_missing_as_na() {
        assert_eq!(report(None, None).to_csv_line(), "3, 12, n/a, n/a");
    }

    #[test]
    fn json_sink_writes_one_object_per_line() {
        let mut sink = WriterSink::new(Vec::new(), ReportFormat::Json);
        sink.interval(&report(Some(1.0), None)).unwrap();
        sink.interval(&report(None, Some(0.25))).unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["interval_index"], 3);
        assert_eq!(first["average_latency_us"], 1.0);
        assert!(first["running_ratio"].is_null());
        assert!(first["at"].is_string());
    }

    #[test]
    fn csv_summary_lists_counters() {
        let summary = Summary {
            counters: CounterSnapshot {
                sent: 10,
                returned: 9,
                missed: 1,
                ..Default::default()
            },
            outstanding: 0,
            served: 10,
            response_drops: 0,
            finalized_dropped: 0,
            samples: 9,
            intervals: 2,
            consumer_runtime_ns: 5,
            uptime_ns: 10,
            running_ratio: Some(0.5),
        };
        let mut sink = WriterSink::new(Vec::new(), ReportFormat::Csv);
        sink.summary(&summary).unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert!(out.starts_with("Sent: 10 Returned: 9 Missed: 1\n"));
        assert!(out.contains("Consumer running ratio: 0.5000"));
    }
}
