//! Errors produced by graph-level passes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PassError {
    #[error("invalid pass context: {reason}")]
    InvalidContext { reason: String },

    #[error("{pass}: {reason}")]
    PassFailed { pass: &'static str, reason: String },

    #[error(transparent)]
    Core(#[from] tgc_core::CoreError),
}
