//! Usage analysis and the injective/barrier predicates fusion depends on.

use tgc_core::{BinaryOp, FlowGraph, Operator, ScalarExpr, Task, UsageMap};

pub fn analyze_usage(graph: &FlowGraph) -> UsageMap {
    graph.usage()
}

/// True iff every output of `task` is derived from its inputs with no
/// reduction and no data-dependent indexing -- the condition prologue and
/// epilogue fusion both require of the node they absorb.
pub fn is_injective(task: &Task) -> bool {
    task.outputs().iter().all(|out| match &**out {
        tgc_core::TensorNode::Input { .. } => true,
        tgc_core::TensorNode::Compute(gc) => scalar_expr_is_injective(&gc.value),
    })
}

fn scalar_expr_is_injective(expr: &ScalarExpr) -> bool {
    match expr {
        ScalarExpr::Var(_) | ScalarExpr::Const(_, _) => true,
        ScalarExpr::Unary { expr, .. } => scalar_expr_is_injective(expr),
        ScalarExpr::Binary { op, a, b } => {
            matches!(
                op,
                BinaryOp::Add
                    | BinaryOp::Sub
                    | BinaryOp::Multiply
                    | BinaryOp::Div
                    | BinaryOp::FloorDiv
                    | BinaryOp::Mod
                    | BinaryOp::And
                    | BinaryOp::Or
                    | BinaryOp::Less
                    | BinaryOp::LessEqual
                    | BinaryOp::Equal
                    | BinaryOp::BitwiseAnd
                    | BinaryOp::BitwiseOr
                    | BinaryOp::LeftShift
                    | BinaryOp::RightShift
            ) && scalar_expr_is_injective(a)
                && scalar_expr_is_injective(b)
        }
        ScalarExpr::IfThenElse { cond, then_expr, else_expr } => {
            scalar_expr_is_injective(cond) && scalar_expr_is_injective(then_expr) && scalar_expr_is_injective(else_expr)
        }
        ScalarExpr::TensorElement { indices, .. } => indices.iter().all(|i| scalar_expr_is_injective(i)),
        // A reference to a reduction is, by construction, not injective.
        ScalarExpr::ScalarInput(node) => match &**node {
            tgc_core::ScalarNode::Input { .. } => true,
            tgc_core::ScalarNode::Compute(_) => false,
        },
    }
}

pub fn is_barrier(op: &Operator) -> bool {
    op.is_barrier
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tgc_core::{DimExpr, GridCompute, ScalarType};

    #[test]
    fn elementwise_task_is_injective() {
        let x = Arc::new(tgc_core::TensorNode::Input {
            name: "x".into(),
            shape: vec![DimExpr::Const(4)],
            dtype: ScalarType::Float32,
        });
        let x_ref = x.clone();
        let out = tgc_core::TensorNode::Compute(GridCompute::new(vec![DimExpr::Const(4)], move |axes| {
            Arc::new(ScalarExpr::TensorElement {
                base: x_ref.clone(),
                indices: vec![Arc::new(ScalarExpr::Var(axes[0].clone()))],
            })
        }));
        let task = Task::new("id", vec![x, Arc::new(out)], 1);
        assert!(is_injective(&task));
    }
}
