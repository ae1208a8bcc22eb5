//! Errors produced while lowering a `Task` to an `IRModule`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LowerError {
    #[error("no kernel schedule registered for task `{task}` (tried: {tried})")]
    NoSchedule { task: String, tried: String },

    #[error("schedule `{schedule}` declined task `{task}`: {reason}")]
    ScheduleDeclined { schedule: &'static str, task: String, reason: String },

    #[error("{pass}: {reason}")]
    PassFailed { pass: &'static str, reason: String },

    #[error(transparent)]
    Core(#[from] tgc_core::CoreError),
}
