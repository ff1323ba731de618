pub mod channel;
pub mod compute;
pub mod config;
pub mod error;
pub mod record;

pub use channel::{ChannelHandle, OffloadChannel, QueueKind, MAX_CHANNEL_CAPACITY};
pub use compute::{HalvePlusOne, OffloadCompute};
pub use config::{
    load_dotenv, ChannelConfig, CoordinatorConfig, OffloadMode, PolicyConfig, PolicyMode,
    ReportFormat, SchedulerConfig, DEFAULT_SLICE_NS,
};
pub use error::*;
pub use record::{OffloadRecord, TaskId, TaskKey};
