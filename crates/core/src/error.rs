use thiserror::Error;

use crate::channel::QueueKind;
use crate::record::OffloadRecord;

/// Errors raised while loading or validating [`crate::SchedulerConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Transient offload channel failures. Never fatal: callers count them and
/// move on, the next scheduling cycle retries naturally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("{queue} queue full (seq {})", .record.seq)]
    Full {
        queue: QueueKind,
        record: OffloadRecord,
    },
}

impl ChannelError {
    /// Give the rejected record back to the caller.
    pub fn into_record(self) -> OffloadRecord {
        match self {
            ChannelError::Full { record, .. } => record,
        }
    }
}

/// A record was finalized with a receive timestamp earlier than its send
/// timestamp. Indicates a broken host clock, never a runtime condition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("record {seq} received at {received_ns}ns before it was sent at {sent_ns}ns")]
pub struct NegativeElapsed {
    pub seq: u64,
    pub sent_ns: u64,
    pub received_ns: u64,
}
