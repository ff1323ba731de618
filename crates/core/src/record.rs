use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::NegativeElapsed;

/// Host task identity (a pid on Linux). Recycled by the host, so it is only
/// unique together with an arrival time, see [`TaskKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u32);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generation-qualified task identity.
///
/// The arrival time plays the role of a generation counter: when the host
/// reuses a numeric id, the new task arrives later and gets a distinct key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub id: TaskId,
    pub arrival_ns: u64,
}

impl TaskKey {
    pub fn new(id: TaskId, arrival_ns: u64) -> Self {
        Self { id, arrival_ns }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.arrival_ns)
    }
}

/// Fixed-shape message exchanged between the scheduler and the coordinator.
///
/// Created by the scheduler as a request, its payload is replaced with the
/// computed result by the coordinator, and it is finalized (receive stamp and
/// elapsed time) by whichever scheduler hook pulls the response first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffloadRecord {
    /// Request sequence number, unique per scheduler instance.
    pub seq: u64,
    /// Owning task, `None` for heartbeat requests.
    pub task: Option<TaskKey>,
    pub payload: u64,
    pub sent_ns: u64,
    pub received_ns: u64,
    pub elapsed_ns: u64,
}

impl OffloadRecord {
    /// Build an outbound request stamped with its send time.
    pub fn request(seq: u64, task: Option<TaskKey>, payload: u64, sent_ns: u64) -> Self {
        Self {
            seq,
            task,
            payload,
            sent_ns,
            received_ns: 0,
            elapsed_ns: 0,
        }
    }

    /// Replace the payload with a computed result.
    pub fn respond(mut self, result: u64) -> Self {
        self.payload = result;
        self
    }

    /// Stamp the receive time and derive the elapsed time.
    pub fn finalize(mut self, received_ns: u64) -> Result<Self, NegativeElapsed> {
        let elapsed = received_ns
            .checked_sub(self.sent_ns)
            .ok_or(NegativeElapsed {
                seq: self.seq,
                sent_ns: self.sent_ns,
                received_ns,
            })?;
        self.received_ns = received_ns;
        self.elapsed_ns = elapsed;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_derives_elapsed() {
        let rec = OffloadRecord::request(1, None, 10, 1_000)
            .respond(6)
            .finalize(4_500)
            .unwrap();
        assert_eq!(rec.payload, 6);
        assert_eq!(rec.received_ns, 4_500);
        assert_eq!(rec.elapsed_ns, 3_500);
    }

    #[test]
    fn finalize_rejects_receive_before_send() {
        let err = OffloadRecord::request(7, None, 10, 5_000)
            .finalize(4_999)
            .unwrap_err();
        assert_eq!(err.seq, 7);
        assert_eq!(err.sent_ns, 5_000);
        assert_eq!(err.received_ns, 4_999);
    }

    #[test]
    fn zero_elapsed_is_allowed() {
        let rec = OffloadRecord::request(2, None, 1, 300).finalize(300).unwrap();
        assert_eq!(rec.elapsed_ns, 0);
    }

    #[test]
    fn task_key_display() {
        let key = TaskKey::new(TaskId(42), 1_234);
        assert_eq!(key.to_string(), "42@1234");
    }
}
