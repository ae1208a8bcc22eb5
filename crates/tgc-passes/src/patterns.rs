//! Graph pattern rewriting (§4.4): a small open registry of
//! `GraphPattern` implementations, each recognizing a local subgraph
//! shape and replacing it with a single fused `Operator`. Ships with one
//! concrete pattern (`Conv2d -> Add(bias)`) to demonstrate the mechanism
//! without overclaiming a general pattern DSL.
//!
//! A rule-registry dispatch shape generalized from type-checking rules
//! to graph-rewrite rules.

use std::sync::Arc;

use tgc_core::graph::Operator;
use tgc_core::FlowGraph;

use crate::context::PassContext;
use crate::error::PassError;
use crate::rewrite::Rewrite;

/// One local subgraph-rewrite rule. `try_match` inspects a single
/// operator (the pattern's anchor) and its producers, returning a
/// replacement operator when the shape matches.
pub trait GraphPattern: Send + Sync {
    fn name(&self) -> &'static str;

    /// `anchor` is a candidate match root; `graph` gives access to the
    /// rest of the (already-traced) graph for inspecting producers.
    fn try_match(&self, anchor: &Arc<Operator>, graph: &FlowGraph) -> Option<Arc<Operator>>;
}

/// Folds `Add(Conv2d(x, w), bias)` into a single `Conv2dBias` operator
/// when the bias operand is the Conv2d's only other use -- the one
/// concrete pattern this registry ships with.
pub struct Conv2dBiasPattern;

impl GraphPattern for Conv2dBiasPattern {
    fn name(&self) -> &'static str {
        "Conv2dBias"
    }

    fn try_match(&self, anchor: &Arc<Operator>, _graph: &FlowGraph) -> Option<Arc<Operator>> {
        if anchor.name != "Add" || anchor.inputs.len() != 2 {
            return None;
        }
        let (conv_side, bias_side) = if matches!(&anchor.inputs[0].producer, Some((p, _)) if p.name == "Conv2d") {
            (0usize, 1usize)
        } else if matches!(&anchor.inputs[1].producer, Some((p, _)) if p.name == "Conv2d") {
            (1, 0)
        } else {
            return None;
        };
        let (conv_op, conv_out_index) = anchor.inputs[conv_side].producer.clone()?;
        if conv_out_index != 0 || conv_op.outputs.len() != 1 || conv_op.is_barrier || anchor.is_barrier {
            return None;
        }

        let mut inputs = conv_op.inputs.clone();
        inputs.push(anchor.inputs[bias_side].clone());

        let mut fused = Arc::new(Operator {
            name: "Conv2dBias".into(),
            inputs,
            outputs: Vec::new(),
            attrs: conv_op.attrs.clone(),
            task: conv_op.task.clone(),
            is_barrier: false,
        });
        let output_meta: Vec<_> = anchor.outputs.iter().map(|t| (t.dtype, t.shape.clone(), t.device)).collect();
        let outs: Vec<_> = output_meta
            .into_iter()
            .enumerate()
            .map(|(i, (dtype, shape, device))| tgc_core::graph::Tensor::operator_output(&fused, i, dtype, shape, device))
            .collect();
        Arc::get_mut(&mut fused).unwrap().outputs = outs;
        Some(fused)
    }
}

fn default_registry() -> Vec<Box<dyn GraphPattern>> {
    vec![Box::new(Conv2dBiasPattern)]
}

/// Runs `graph_patterns`/`subgraph_rewrite`: scans every operator against
/// every registered pattern until a fixed point, replacing the first
/// match found each iteration (mirrors the fixed-point shape of the
/// fusion passes in `fuse_prologue.rs`/`fuse_epilogue.rs`).
pub fn graph_patterns_pass(graph: &FlowGraph, ctx: &PassContext) -> Result<FlowGraph, PassError> {
    subgraph_rewrite(graph, ctx, &default_registry())
}

pub fn subgraph_rewrite(graph: &FlowGraph, ctx: &PassContext, patterns: &[Box<dyn GraphPattern>]) -> Result<FlowGraph, PassError> {
    let mut current = graph.clone();
    loop {
        match try_rewrite_once(&current, patterns)? {
            Some(next) => {
                if ctx.verbose {
                    tracing::debug!("subgraph_rewrite: matched a pattern, {} ops remain", next.nodes.len());
                }
                current = next;
            }
            None => return Ok(current),
        }
    }
}

fn try_rewrite_once(graph: &FlowGraph, patterns: &[Box<dyn GraphPattern>]) -> Result<Option<FlowGraph>, PassError> {
    for anchor in &graph.nodes {
        for pattern in patterns {
            if let Some(replacement) = pattern.try_match(anchor, graph) {
                let rewrite = Rewrite::new(anchor, &replacement);
                return Ok(Some(rewrite.apply(graph)?));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgc_core::graph::{Device, Tensor};
    use tgc_core::ops;
    use tgc_core::DimExpr;
    use tgc_core::ScalarType;
    use std::collections::HashMap;

    fn conv2d_stub(x: Arc<Tensor>) -> Arc<Operator> {
        let mut op = Arc::new(Operator {
            name: "Conv2d".into(),
            inputs: vec![x.clone()],
            outputs: Vec::new(),
            attrs: HashMap::new(),
            task: ops::conv2d_identity_task(),
            is_barrier: false,
        });
        let out = Tensor::operator_output(&op, 0, x.dtype, x.shape.clone(), x.device);
        Arc::get_mut(&mut op).unwrap().outputs = vec![out];
        op
    }

    #[test]
    fn folds_conv_add_bias_into_single_node() {
        let x = Tensor::graph_input(ScalarType::Float32, vec![DimExpr::Const(4)], Device::Cpu);
        let bias = Tensor::graph_input(ScalarType::Float32, vec![DimExpr::Const(4)], Device::Cpu);
        let conv = conv2d_stub(x.clone());
        let add = ops::add(conv.outputs[0].clone(), bias.clone()).unwrap();

        let graph = FlowGraph::trace(vec![x, bias], vec![add.outputs[0].clone()]).unwrap();
        assert_eq!(graph.nodes.len(), 2);

        let ctx = PassContext::default();
        let fused = graph_patterns_pass(&graph, &ctx).unwrap();
        assert_eq!(fused.nodes.len(), 1);
        assert_eq!(fused.nodes[0].name, "Conv2dBias");
        assert_eq!(fused.nodes[0].inputs.len(), 2);
    }

    #[test]
    fn leaves_unrelated_add_untouched() {
        let a = Tensor::graph_input(ScalarType::Float32, vec![DimExpr::Const(4)], Device::Cpu);
        let b = Tensor::graph_input(ScalarType::Float32, vec![DimExpr::Const(4)], Device::Cpu);
        let add = ops::add(a.clone(), b.clone()).unwrap();
        let graph = FlowGraph::trace(vec![a, b], vec![add.outputs[0].clone()]).unwrap();
        let ctx = PassContext::default();
        let fused = graph_patterns_pass(&graph, &ctx).unwrap();
        assert_eq!(fused.nodes.len(), 1);
        assert_eq!(fused.nodes[0].name, "Add");
    }
}
