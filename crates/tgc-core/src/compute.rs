//! The algebraic compute IR: `TensorNode` and `ScalarNode`.
//!
//! A `Task`'s body is a small tree of these nodes describing, per output
//! element, how to compute it from the Task's inputs -- independent of any
//! particular GPU schedule. Nodes are reference-counted and compared by
//! pointer identity wherever the fusion passes need "this exact node
//! object", not merely a structurally equal one.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::expr::{BinaryOp, ConstantValue, UnaryOp, Var};
use crate::types::ScalarType;

/// A tensor dimension: either statically known or a named symbolic size
/// bound at trace time (dynamic batch dimensions, for example).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DimExpr {
    Const(u64),
    Sym(String),
}

/// Reduction operator for a `ReduceCompute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReduceKind {
    Sum,
    Avg,
    Max,
    Min,
}

/// A scalar-valued expression over compute-IR axes and tensor reads.
/// Shares its arithmetic operator vocabulary with the low-level IR so a
/// later lowering pass can translate one into the other node-by-node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarExpr {
    Var(Arc<Var>),
    Const(ConstantValue, ScalarType),
    Unary { op: UnaryOp, expr: Arc<ScalarExpr> },
    Binary { op: BinaryOp, a: Arc<ScalarExpr>, b: Arc<ScalarExpr> },
    IfThenElse { cond: Arc<ScalarExpr>, then_expr: Arc<ScalarExpr>, else_expr: Arc<ScalarExpr> },
    /// Read one element of a `TensorNode` at the given index expressions.
    TensorElement { base: Arc<TensorNode>, indices: Vec<Arc<ScalarExpr>> },
    /// Reference to a scalar-valued input (a per-call scalar argument,
    /// not a tensor element).
    ScalarInput(Arc<ScalarNode>),
}

/// A grid of scalar values, one per point of `shape`, each produced by
/// evaluating `value` with `axes` bound to that point's coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridCompute {
    pub shape: Vec<DimExpr>,
    pub axes: Vec<Arc<Var>>,
    pub value: Arc<ScalarExpr>,
}

impl GridCompute {
    /// Builds a `GridCompute` over `shape`, exposing freshly bound axis
    /// variables to `f` only for the duration of the call -- axes cannot
    /// leak past this constructor, keeping them lexically local to this
    /// compute node as the purity invariant requires.
    pub fn new(shape: Vec<DimExpr>, f: impl FnOnce(&[Arc<Var>]) -> Arc<ScalarExpr>) -> Self {
        let axes: Vec<Arc<Var>> = (0..shape.len())
            .map(|i| Arc::new(Var::new(format!("i{i}"), crate::types::Type::Scalar(ScalarType::Int32))))
            .collect();
        let value = f(&axes);
        GridCompute { shape, axes, value }
    }
}

/// A reduction over `axes`, accumulating `value` into a single scalar
/// using `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReduceCompute {
    pub shape: Vec<DimExpr>,
    pub axes: Vec<Arc<Var>>,
    pub value: Arc<ScalarExpr>,
    pub kind: ReduceKind,
}

impl ReduceCompute {
    pub fn new(
        shape: Vec<DimExpr>,
        kind: ReduceKind,
        f: impl FnOnce(&[Arc<Var>]) -> Arc<ScalarExpr>,
    ) -> Self {
        let axes: Vec<Arc<Var>> = (0..shape.len())
            .map(|i| Arc::new(Var::new(format!("r{i}"), crate::types::Type::Scalar(ScalarType::Int32))))
            .collect();
        let value = f(&axes);
        ReduceCompute { shape, axes, value, kind }
    }
}

/// A tensor-valued node in the compute IR: either a named input or a
/// `GridCompute` deriving its elements from other nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TensorNode {
    Input { name: String, shape: Vec<DimExpr>, dtype: ScalarType },
    Compute(GridCompute),
}

impl TensorNode {
    pub fn shape(&self) -> &[DimExpr] {
        match self {
            TensorNode::Input { shape, .. } => shape,
            TensorNode::Compute(gc) => &gc.shape,
        }
    }

    pub fn is_input(&self) -> bool {
        matches!(self, TensorNode::Input { .. })
    }
}

/// A scalar-valued node in the compute IR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarNode {
    Input { name: String, dtype: ScalarType },
    Compute(ReduceCompute),
}

/// Identifies a `TensorNode` by its `Arc` pointer identity, for use as a
/// map key where "the exact node object" (not merely an equal one) is
/// the intended meaning -- see the fusion passes' extra-input bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeKey(usize);

impl From<&Arc<TensorNode>> for NodeKey {
    fn from(node: &Arc<TensorNode>) -> Self {
        NodeKey(Arc::as_ptr(node) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_compute_axes_match_shape_len() {
        let gc = GridCompute::new(vec![DimExpr::Const(4), DimExpr::Const(8)], |axes| {
            Arc::new(ScalarExpr::Var(axes[0].clone()))
        });
        assert_eq!(gc.axes.len(), gc.shape.len());
    }

    #[test]
    fn node_key_distinguishes_distinct_arcs_of_equal_value() {
        let a = Arc::new(TensorNode::Input {
            name: "x".into(),
            shape: vec![DimExpr::Const(1)],
            dtype: ScalarType::Float32,
        });
        let b = Arc::new((*a).clone());
        assert_ne!(NodeKey::from(&a), NodeKey::from(&b));
        assert_eq!(NodeKey::from(&a), NodeKey::from(&a.clone()));
    }

    #[test]
    fn serde_roundtrip_tensor_node() {
        let node = TensorNode::Input {
            name: "x".into(),
            shape: vec![DimExpr::Const(2), DimExpr::Sym("n".into())],
            dtype: ScalarType::Float16,
        };
        let json = serde_json::to_string(&node).unwrap();
        let back: TensorNode = serde_json::from_str(&json).unwrap();
        assert_eq!(serde_json::to_string(&back).unwrap(), json);
    }
}
