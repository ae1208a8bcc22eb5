//! Variant resolution (§4.4): stamps `PassContext`-driven configuration
//! (precision, reduce precision, MMA kind, parallel-k strategy) onto
//! every reduction-shaped `Operator` as attrs, so `tgc-lower`'s kernel
//! registry (§3.1) can pick the matching schedule without this crate
//! depending on `tgc-lower` -- graph-level passes stay upstream of
//! lowering. Full schedule selection (choosing among several compiled
//! `KernelSchedule` impls) happens at the lowering boundary, not here;
//! this pass only resolves *which configuration* a later schedule lookup
//! should use.

use std::sync::Arc;

use tgc_core::graph::Operator;
use tgc_core::types::AttrValue;
use tgc_core::FlowGraph;

use crate::context::{MmaKind, ParallelK, PassContext, Precision, ReducePrecision};
use crate::error::PassError;
use crate::rewrite::Rewrite;

/// Reduction-shaped operators -- the ones whose lowered schedule choice
/// actually depends on `ctx.mma`/`ctx.parallel_k`.
fn is_reduction_like(op: &Operator) -> bool {
    matches!(op.name.as_str(), "MatMul" | "ReduceSum" | "ReduceMean" | "Conv2d" | "Conv2dBias")
}

pub fn resolve_variant_pass(graph: &FlowGraph, ctx: &PassContext) -> Result<FlowGraph, PassError> {
    let mut current = graph.clone();
    loop {
        match try_resolve_once(&current, ctx)? {
            Some(next) => {
                if ctx.verbose {
                    tracing::debug!("resolve_variant: stamped one operator, {} ops remain", next.nodes.len());
                }
                current = next;
            }
            None => return Ok(current),
        }
    }
}

fn try_resolve_once(graph: &FlowGraph, ctx: &PassContext) -> Result<Option<FlowGraph>, PassError> {
    for op in &graph.nodes {
        if !is_reduction_like(op) {
            continue;
        }
        if op.attrs.contains_key("__variant_resolved") {
            continue;
        }
        let mut resolved = (**op).clone();
        resolved.attrs.insert("__variant_resolved".into(), AttrValue::Int(1));
        resolved.attrs.insert("precision".into(), AttrValue::Str(precision_name(ctx.precision).into()));
        resolved.attrs.insert("reduce_precision".into(), AttrValue::Str(reduce_precision_name(ctx.reduce_precision).into()));
        resolved.attrs.insert("mma".into(), AttrValue::Str(mma_name(ctx.mma).into()));
        resolved.attrs.insert("parallel_k".into(), parallel_k_attr(ctx.parallel_k));
        let resolved: Arc<Operator> = Arc::new(resolved);
        let rewrite = Rewrite::new(op, &resolved);
        return Ok(Some(rewrite.apply(graph)?));
    }
    Ok(None)
}

fn precision_name(p: Precision) -> &'static str {
    match p {
        Precision::F16 => "f16",
        Precision::BF16 => "bf16",
        Precision::F32 => "f32",
    }
}

fn reduce_precision_name(p: ReducePrecision) -> &'static str {
    match p {
        ReducePrecision::F16 => "f16",
        ReducePrecision::F32 => "f32",
    }
}

fn mma_name(m: MmaKind) -> &'static str {
    match m {
        MmaKind::Simt => "simt",
        MmaKind::Wmma => "wmma",
        MmaKind::Mma => "mma",
    }
}

fn parallel_k_attr(p: ParallelK) -> AttrValue {
    match p {
        ParallelK::Disabled => AttrValue::Str("disabled".into()),
        ParallelK::Default => AttrValue::Str("default".into()),
        ParallelK::Search => AttrValue::Str("search".into()),
        ParallelK::Fixed(n) => AttrValue::Int(n as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgc_core::graph::Device;
    use tgc_core::ops;
    use tgc_core::{DimExpr, ScalarType, Tensor};

    #[test]
    fn stamps_mma_attr_on_matmul() {
        let a = Tensor::graph_input(ScalarType::Float32, vec![DimExpr::Const(2), DimExpr::Const(3)], Device::Cpu);
        let b = Tensor::graph_input(ScalarType::Float32, vec![DimExpr::Const(3), DimExpr::Const(4)], Device::Cpu);
        let matmul_op = ops::matmul(a.clone(), b.clone()).unwrap();
        let graph = FlowGraph::trace(vec![a, b], vec![matmul_op.outputs[0].clone()]).unwrap();

        let mut ctx = PassContext::default();
        ctx.mma = MmaKind::Wmma;
        let resolved = resolve_variant_pass(&graph, &ctx).unwrap();
        assert_eq!(resolved.nodes[0].attrs.get("mma"), Some(&AttrValue::Str("wmma".into())));
    }

    #[test]
    fn leaves_elementwise_operators_unstamped() {
        let a = Tensor::graph_input(ScalarType::Float32, vec![DimExpr::Const(4)], Device::Cpu);
        let b = Tensor::graph_input(ScalarType::Float32, vec![DimExpr::Const(4)], Device::Cpu);
        let add_op = ops::add(a.clone(), b.clone()).unwrap();
        let graph = FlowGraph::trace(vec![a, b], vec![add_op.outputs[0].clone()]).unwrap();
        let ctx = PassContext::default();
        let resolved = resolve_variant_pass(&graph, &ctx).unwrap();
        assert!(!resolved.nodes[0].attrs.contains_key("mma"));
    }
}
