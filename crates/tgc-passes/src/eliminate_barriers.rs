//! Barrier elimination (§4.4): a narrow, explicitly-scoped pass that
//! clears `Operator::is_barrier` when the barrier can no longer affect
//! correctness -- here, when every one of its outputs is read only as a
//! graph output, so no fusion pass could ever cross it regardless of the
//! flag. Full barrier-necessity analysis (tracking whether some *other*
//! downstream fusion opportunity was blocked and has since resolved) is
//! out of scope.

use std::sync::Arc;

use tgc_core::graph::TensorKey;
use tgc_core::{FlowGraph, Operator, Use};

use crate::context::PassContext;
use crate::error::PassError;
use crate::rewrite::Rewrite;
use crate::usage::analyze_usage;

pub fn eliminate_barriers_pass(graph: &FlowGraph, ctx: &PassContext) -> Result<FlowGraph, PassError> {
    let mut current = graph.clone();
    loop {
        match try_eliminate_once(&current)? {
            Some(next) => {
                if ctx.verbose {
                    tracing::debug!("eliminate_barriers: cleared one barrier, {} ops remain", next.nodes.len());
                }
                current = next;
            }
            None => return Ok(current),
        }
    }
}

fn try_eliminate_once(graph: &FlowGraph) -> Result<Option<FlowGraph>, PassError> {
    let usage = analyze_usage(graph);
    for op in &graph.nodes {
        if !op.is_barrier {
            continue;
        }
        let only_graph_output = op.outputs.iter().all(|t| {
            usage
                .get(&TensorKey::from(t))
                .map(|uses| uses.iter().all(|u| matches!(u, Use::GraphOutput { .. })))
                .unwrap_or(true)
        });
        if !only_graph_output {
            continue;
        }
        let mut cleared = (**op).clone();
        cleared.is_barrier = false;
        let cleared: Arc<Operator> = Arc::new(cleared);
        let rewrite = Rewrite::new(op, &cleared);
        return Ok(Some(rewrite.apply(graph)?));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgc_core::graph::Device;
    use tgc_core::ops;
    use tgc_core::{DimExpr, ScalarType, Tensor};

    #[test]
    fn clears_barrier_whose_only_use_is_a_graph_output() {
        let x = Tensor::graph_input(ScalarType::Float32, vec![DimExpr::Const(4)], Device::Cpu);
        let mut op = ops::relu(x.clone());
        Arc::get_mut(&mut op).unwrap().is_barrier = true;
        let graph = FlowGraph::trace(vec![x], vec![op.outputs[0].clone()]).unwrap();

        let ctx = PassContext::default();
        let cleared = eliminate_barriers_pass(&graph, &ctx).unwrap();
        assert!(!cleared.nodes[0].is_barrier);
    }

    #[test]
    fn keeps_barrier_with_a_non_output_consumer() {
        let x = Tensor::graph_input(ScalarType::Float32, vec![DimExpr::Const(4)], Device::Cpu);
        let mut relu_op = ops::relu(x.clone());
        Arc::get_mut(&mut relu_op).unwrap().is_barrier = true;
        let neg_op = ops::neg(relu_op.outputs[0].clone());

        let graph = FlowGraph::trace(vec![x], vec![neg_op.outputs[0].clone()]).unwrap();
        let ctx = PassContext::default();
        let result = eliminate_barriers_pass(&graph, &ctx).unwrap();
        let relu_node = result.nodes.iter().find(|o| o.name == "Relu").unwrap();
        assert!(relu_node.is_barrier, "barrier feeding another operator must stay set");
    }
}
