//! Bounded scheduler ↔ coordinator offload channel.
//!
//! Three lock-free queues carry [`OffloadRecord`]s:
//! - requests: scheduler → coordinator
//! - responses: coordinator → scheduler
//! - finalized: scheduler → coordinator telemetry (observational only)
//!
//! Ownership of a record moves with the queue hand-off, so no record is ever
//! touched by both sides at once. Nothing here blocks: a full queue is
//! reported back to the producer, which decides how to count it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use serde::{Deserialize, Serialize};

use crate::error::{ChannelError, ConfigError};
use crate::record::OffloadRecord;

/// Largest capacity accepted for any of the three queues.
pub const MAX_CHANNEL_CAPACITY: usize = 65_536;

/// Which of the three queues an operation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueKind {
    Request,
    Response,
    Finalized,
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueKind::Request => write!(f, "request"),
            QueueKind::Response => write!(f, "response"),
            QueueKind::Finalized => write!(f, "finalized"),
        }
    }
}

/// Stable handle both sides obtain once at startup.
pub type ChannelHandle = Arc<OffloadChannel>;

/// The three bounded queues plus the overflow counter of the telemetry path.
#[derive(Debug)]
pub struct OffloadChannel {
    requests: ArrayQueue<OffloadRecord>,
    responses: ArrayQueue<OffloadRecord>,
    finalized: ArrayQueue<OffloadRecord>,
    /// Finalized records evicted to make room for newer ones.
    finalized_dropped: AtomicU64,
}

impl OffloadChannel {
    /// Create a channel whose queues each hold `capacity` records.
    pub fn new(capacity: usize) -> Result<ChannelHandle, ConfigError> {
        if capacity == 0 || capacity > MAX_CHANNEL_CAPACITY {
            return Err(ConfigError::Invalid(format!(
                "channel capacity must be in 1..={MAX_CHANNEL_CAPACITY}, got {capacity}"
            )));
        }
        Ok(Arc::new(Self {
            requests: ArrayQueue::new(capacity),
            responses: ArrayQueue::new(capacity),
            finalized: ArrayQueue::new(capacity),
            finalized_dropped: AtomicU64::new(0),
        }))
    }

    pub fn capacity(&self) -> usize {
        self.requests.capacity()
    }

    // ── Request queue (scheduler → coordinator) ────────────────────

    pub fn submit_request(&self, record: OffloadRecord) -> Result<(), ChannelError> {
        self.requests.push(record).map_err(|record| ChannelError::Full {
            queue: QueueKind::Request,
            record,
        })
    }

    pub fn take_request(&self) -> Option<OffloadRecord> {
        self.requests.pop()
    }

    /// Whether another request would currently fit.
    pub fn has_request_room(&self) -> bool {
        !self.requests.is_full()
    }

    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    // ── Response queue (coordinator → scheduler) ───────────────────

    pub fn submit_response(&self, record: OffloadRecord) -> Result<(), ChannelError> {
        self.responses.push(record).map_err(|record| ChannelError::Full {
            queue: QueueKind::Response,
            record,
        })
    }

    pub fn take_response(&self) -> Option<OffloadRecord> {
        self.responses.pop()
    }

    pub fn pending_responses(&self) -> usize {
        self.responses.len()
    }

    // ── Finalized queue (scheduler → telemetry) ────────────────────

    /// Publish a finalized record, evicting the oldest one when full.
    pub fn publish_finalized(&self, record: OffloadRecord) {
        if self.finalized.force_push(record).is_some() {
            self.finalized_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn take_finalized(&self) -> Option<OffloadRecord> {
        self.finalized.pop()
    }

    pub fn pending_finalized(&self) -> usize {
        self.finalized.len()
    }

    pub fn finalized_dropped(&self) -> u64 {
        self.finalized_dropped.load(Ordering::Relaxed)
    }

    /// Drop everything still queued. Used on scheduler teardown, where
    /// in-flight records are abandoned.
    pub fn abandon(&self) -> usize {
        let mut dropped = 0;
        while self.requests.pop().is_some() {
            dropped += 1;
        }
        while self.responses.pop().is_some() {
            dropped += 1;
        }
        while self.finalized.pop().is_some() {
            dropped += 1;
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(seq: u64) -> OffloadRecord {
        OffloadRecord::request(seq, None, 10, seq * 100)
    }

    #[test]
    fn rejects_zero_and_oversized_capacity() {
        assert!(OffloadChannel::new(0).is_err());
        assert!(OffloadChannel::new(MAX_CHANNEL_CAPACITY + 1).is_err());
        assert!(OffloadChannel::new(MAX_CHANNEL_CAPACITY).is_ok());
    }

    #[test]
    fn request_queue_is_fifo() {
        let ch = OffloadChannel::new(4).unwrap();
        for seq in 0..3 {
            ch.submit_request(req(seq)).unwrap();
        }
        let order: Vec<u64> = std::iter::from_fn(|| ch.take_request()).map(|r| r.seq).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn full_request_queue_returns_record() {
        let ch = OffloadChannel::new(16).unwrap();
        let mut ok = 0;
        let mut failed = Vec::new();
        for seq in 0..20 {
            match ch.submit_request(req(seq)) {
                Ok(()) => ok += 1,
                Err(e) => failed.push(e.into_record().seq),
            }
        }
        assert_eq!(ok, 16);
        assert_eq!(failed, vec![16, 17, 18, 19]);
        assert!(!ch.has_request_room());
        assert_eq!(ch.pending_requests(), 16);
    }

    #[test]
    fn full_response_queue_reports_queue_kind() {
        let ch = OffloadChannel::new(1).unwrap();
        ch.submit_response(req(0)).unwrap();
        match ch.submit_response(req(1)) {
            Err(ChannelError::Full { queue, record }) => {
                assert_eq!(queue, QueueKind::Response);
                assert_eq!(record.seq, 1);
            }
            other => panic!("expected full response queue, got {other:?}"),
        }
    }

    #[test]
    fn finalized_overflow_drops_oldest() {
        let ch = OffloadChannel::new(2).unwrap();
        ch.publish_finalized(req(0));
        ch.publish_finalized(req(1));
        ch.publish_finalized(req(2));
        assert_eq!(ch.finalized_dropped(), 1);
        assert_eq!(ch.take_finalized().map(|r| r.seq), Some(1));
        assert_eq!(ch.take_finalized().map(|r| r.seq), Some(2));
        assert!(ch.take_finalized().is_none());
    }

    #[test]
    fn abandon_clears_all_queues() {
        let ch = OffloadChannel::new(4).unwrap();
        ch.submit_request(req(0)).unwrap();
        ch.submit_response(req(1)).unwrap();
        ch.publish_finalized(req(2));
        assert_eq!(ch.abandon(), 3);
        assert_eq!(ch.pending_requests(), 0);
        assert_eq!(ch.pending_responses(), 0);
        assert_eq!(ch.pending_finalized(), 0);
    }
}
