//! The offload scheduler -- shared dispatch queue plus per-processor fast
//! path, FIFO or weighted virtual time ordering, and the offload protocol.
//!
//! Split into focused submodules:
//! - `core`: OffloadScheduler struct, init/exit, and the `SchedOps` impl
//! - `placement`: CPU selection, enqueue and dispatch
//! - `accounting`: enable/running/stopping bookkeeping and vtime charging
//! - `offload`: request submission, response folding, expiry and heartbeats

mod accounting;
mod core;
mod offload;
mod placement;

pub use self::core::OffloadScheduler;
