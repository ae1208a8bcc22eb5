//! `run_pipeline`: the fixed pass order from §4.4 -- constant folding,
//! pattern rewriting, variant resolution, barrier elimination, then the
//! two fusion passes. Mirrors the original's `PassContext`-gated
//! `logger.info`/`logger.debug` calls via `tracing::debug!` under
//! `ctx.verbose`.

use tgc_core::FlowGraph;

use crate::context::PassContext;
use crate::eliminate_barriers::eliminate_barriers_pass;
use crate::error::PassError;
use crate::fold_const::fold_const_pass;
use crate::fuse_epilogue::fuse_epilogue_pass;
use crate::fuse_prologue::fuse_prologue_pass;
use crate::patterns::{graph_patterns_pass, subgraph_rewrite, GraphPattern};
use crate::resolve_variant::resolve_variant_pass;

pub fn run_pipeline(graph: FlowGraph, ctx: &PassContext) -> Result<FlowGraph, PassError> {
    run_pipeline_with_patterns(graph, ctx, None)
}

/// Same pipeline, but lets a caller supply its own pattern registry for
/// `subgraph_rewrite` instead of the built-in one -- useful for tests
/// that want to exercise the pipeline shape without the full default
/// pattern set.
pub fn run_pipeline_with_patterns(
    graph: FlowGraph,
    ctx: &PassContext,
    patterns: Option<&[Box<dyn GraphPattern>]>,
) -> Result<FlowGraph, PassError> {
    macro_rules! step {
        ($name:literal, $graph:expr, $call:expr) => {{
            let result = $call?;
            if ctx.verbose {
                tracing::debug!("run_pipeline: {} done, {} ops", $name, result.nodes.len());
            }
            result
        }};
    }

    let graph = step!("fold_const", graph, fold_const_pass(&graph, ctx));
    let graph = match patterns {
        Some(custom) => step!("subgraph_rewrite", graph, subgraph_rewrite(&graph, ctx, custom)),
        None => step!("graph_patterns", graph, graph_patterns_pass(&graph, ctx)),
    };
    let graph = step!("resolve_variant", graph, resolve_variant_pass(&graph, ctx));
    let graph = step!("eliminate_barriers", graph, eliminate_barriers_pass(&graph, ctx));
    let graph = step!("fuse_prologue", graph, fuse_prologue_pass(&graph, ctx));
    let graph = step!("fuse_epilogue", graph, fuse_epilogue_pass(&graph, ctx));
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgc_core::graph::Device;
    use tgc_core::ops;
    use tgc_core::{DimExpr, ScalarType, Tensor};

    #[test]
    fn pipeline_fuses_add_then_relu_end_to_end() {
        let a = Tensor::graph_input(ScalarType::Float32, vec![DimExpr::Const(4)], Device::Cpu);
        let b = Tensor::graph_input(ScalarType::Float32, vec![DimExpr::Const(4)], Device::Cpu);
        let add_op = ops::add(a.clone(), b.clone()).unwrap();
        let relu_op = ops::relu(add_op.outputs[0].clone());

        let graph = FlowGraph::trace(vec![a, b], vec![relu_op.outputs[0].clone()]).unwrap();
        let ctx = PassContext::default();
        let optimized = run_pipeline(graph, &ctx).unwrap();
        assert_eq!(optimized.nodes.len(), 1, "add+relu should collapse to one fused node");
    }
}
