//! Scheduling core: task model, host seam, registry, dispatch queues and the
//! offload scheduler policy.

pub mod context;
pub mod counters;
pub mod dsq;
pub mod error;
pub mod host;
pub mod ops;
pub mod registry;
pub mod scheduler;
pub mod sim;
mod sync;
pub mod task;
pub mod vtime;

pub use context::{ExitKind, SchedContext};
pub use counters::{CounterSnapshot, Counters};
pub use dsq::{DispatchEntry, DispatchQueue, LocalQueues};
pub use error::{RegistryError, SchedError};
pub use host::{Host, HostError};
pub use ops::{Placement, SchedOps};
pub use registry::{TaskRegistry, TrackingRecord};
pub use scheduler::OffloadScheduler;
pub use sim::{SimClock, SimHost};
pub use task::{CpuId, Liveness, Task, DEFAULT_WEIGHT};
pub use vtime::{vtime_before, VirtualClock};
