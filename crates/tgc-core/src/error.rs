//! Core error types for tgc-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering
//! all anticipated failure modes in the core graph and task data model.

use crate::id::{OperatorId, TensorId};
use thiserror::Error;

/// Core errors produced by the tgc-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A tensor index was not found in the flow graph.
    #[error("tensor not found: TensorId({id})", id = id.0)]
    TensorNotFound { id: TensorId },

    /// An operator index was not found in the flow graph.
    #[error("operator not found: OperatorId({id})", id = id.0)]
    OperatorNotFound { id: OperatorId },

    /// A Task's parameter list does not correspond to its inputs/outputs.
    #[error("task '{task}' parameter mismatch: {reason}")]
    TaskParameterMismatch { task: String, reason: String },

    /// A prologue/epilogue entry referenced a TensorNode not present among
    /// the Task's parameters.
    #[error("task '{task}' references unknown node in {site}")]
    DanglingCarrier { task: String, site: &'static str },

    /// A parameter has both a prologue and an epilogue attached.
    #[error("task '{task}' parameter at index {index} has both a prologue and an epilogue")]
    ConflictingCarriers { task: String, index: usize },

    /// A flow-graph invariant was violated during tracing or a pass.
    #[error("graph inconsistency: {reason}")]
    GraphInconsistency { reason: String },

    /// A `PassContext` was constructed with an out-of-range setting.
    #[error("invalid pass context: {reason}")]
    InvalidPassContext { reason: String },
}
