//! Userspace coordinator for the offload scheduler: serves offload requests,
//! aggregates latency and writes per-interval reports.

pub mod coordinator;
pub mod error;
pub mod latency;
pub mod report;

pub use coordinator::{Coordinator, SchedProbe};
pub use error::CoordinatorError;
pub use latency::LatencyWindow;
pub use report::{IntervalReport, ReportSink, Summary, WriterSink};
