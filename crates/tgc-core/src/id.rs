//! Stable ID newtypes for graph entities.
//!
//! All IDs are distinct newtype wrappers over `u32`, providing type safety
//! so that a `TensorId` cannot be accidentally used where an `OperatorId` is expected.

use std::fmt;

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

/// Stable tensor identifier. Maps to a petgraph `NodeIndex<u32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorId(pub u32);

/// Stable operator identifier. Maps to a petgraph `NodeIndex<u32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperatorId(pub u32);

/// Stable edge identifier within the flow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub u32);

/// Task identity, scoped to the operator that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u32);

// Display implementations -- just print the inner value.

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Bridge between the node-identity newtypes and petgraph's NodeIndex<u32>.

impl From<NodeIndex<u32>> for TensorId {
    fn from(idx: NodeIndex<u32>) -> Self {
        TensorId(idx.index() as u32)
    }
}

impl From<TensorId> for NodeIndex<u32> {
    fn from(id: TensorId) -> Self {
        NodeIndex::new(id.0 as usize)
    }
}

impl From<NodeIndex<u32>> for OperatorId {
    fn from(idx: NodeIndex<u32>) -> Self {
        OperatorId(idx.index() as u32)
    }
}

impl From<OperatorId> for NodeIndex<u32> {
    fn from(id: OperatorId) -> Self {
        NodeIndex::new(id.0 as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensor_id_to_node_index_roundtrip() {
        let idx = NodeIndex::<u32>::new(42);
        let tensor_id = TensorId::from(idx);
        assert_eq!(tensor_id.0, 42);

        let back: NodeIndex<u32> = tensor_id.into();
        assert_eq!(back.index(), 42);
    }

    #[test]
    fn operator_id_to_node_index_roundtrip() {
        let idx = NodeIndex::<u32>::new(7);
        let op_id = OperatorId::from(idx);
        assert_eq!(op_id.0, 7);

        let back: NodeIndex<u32> = op_id.into();
        assert_eq!(back.index(), 7);
    }

    #[test]
    fn tensor_id_display() {
        assert_eq!(format!("{}", TensorId(7)), "7");
    }

    #[test]
    fn edge_id_display() {
        assert_eq!(format!("{}", EdgeId(99)), "99");
    }

    #[test]
    fn task_id_display() {
        assert_eq!(format!("{}", TaskId(3)), "3");
    }

    #[test]
    fn id_types_are_distinct() {
        // Compile-time type distinction; values are independent at runtime.
        let tensor = TensorId(1);
        let op = OperatorId(1);
        let edge = EdgeId(1);
        let task = TaskId(1);

        assert_eq!(tensor.0, op.0);
        assert_eq!(edge.0, task.0);
    }

    #[test]
    fn serde_roundtrip() {
        let tensor = TensorId(42);
        let json = serde_json::to_string(&tensor).unwrap();
        let back: TensorId = serde_json::from_str(&json).unwrap();
        assert_eq!(tensor, back);

        let op = OperatorId(7);
        let json = serde_json::to_string(&op).unwrap();
        let back: OperatorId = serde_json::from_str(&json).unwrap();
        assert_eq!(op, back);
    }
}
