use thiserror::Error;

use offsched_core::{ConfigError, NegativeElapsed, TaskKey};

use crate::host::HostError;

/// Errors surfaced by the scheduling hooks.
#[derive(Error, Debug)]
pub enum SchedError {
    #[error("setup failed: {0}")]
    Setup(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("invariant violated in {hook}: {detail}")]
    InvariantViolation { hook: &'static str, detail: String },
}

impl SchedError {
    pub fn invariant(hook: &'static str, detail: impl Into<String>) -> Self {
        SchedError::InvariantViolation {
            hook,
            detail: detail.into(),
        }
    }
}

/// Task registry failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Tracking a new task would exceed the configured bound.
    #[error("task registry full ({capacity} tasks tracked)")]
    Full { capacity: usize },

    /// A hook referenced a task that was already removed as terminal.
    #[error("task {0} was already retired")]
    Retired(TaskKey),

    /// The host handed out an id whose previous holder is still tracked.
    #[error("task id reused by {incoming} while {live} is still live")]
    Reused { live: TaskKey, incoming: TaskKey },
}

impl From<NegativeElapsed> for SchedError {
    fn from(e: NegativeElapsed) -> Self {
        SchedError::invariant("finalize", e.to_string())
    }
}
