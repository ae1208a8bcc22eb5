//! End-to-end pipeline scenarios: build a graph through the public
//! `tgc_core::ops` builders, run the full `run_pipeline`, and check the
//! resulting fused shape rather than any single pass in isolation.

use std::sync::Arc;

use tgc_core::graph::Device;
use tgc_core::ops;
use tgc_core::{DimExpr, ScalarType, Tensor};
use tgc_passes::{run_pipeline, PassContext};

fn vec4(dtype: ScalarType) -> Arc<Tensor> {
    Tensor::graph_input(dtype, vec![DimExpr::Const(4)], Device::Cpu)
}

/// `y = relu(x + b)` fuses into a single operator whose task carries the
/// add as a prologue.
#[test]
fn add_relu_fuses_into_one_operator() {
    let x = vec4(ScalarType::Float32);
    let b = vec4(ScalarType::Float32);
    let add_op = ops::add(x.clone(), b.clone()).unwrap();
    let relu_op = ops::relu(add_op.outputs[0].clone());

    let graph = tgc_core::FlowGraph::trace(vec![x, b], vec![relu_op.outputs[0].clone()]).unwrap();
    assert_eq!(graph.nodes.len(), 2);

    let ctx = PassContext::default();
    let optimized = run_pipeline(graph, &ctx).unwrap();

    assert_eq!(optimized.nodes.len(), 1, "Add+Relu should fuse into a single operator");
    assert_eq!(optimized.nodes[0].task.prologues.len(), 1);
}

/// `z = f3(f2(f1(x)))`, all injective single-use elementwise ops, fuses
/// down to one operator through repeated fixed-point iteration.
#[test]
fn three_operator_chain_fuses_to_one_operator() {
    let x = vec4(ScalarType::Float32);
    let f1 = ops::relu(x.clone());
    let f2 = ops::neg(f1.outputs[0].clone());
    let f3 = ops::relu(f2.outputs[0].clone());

    let graph = tgc_core::FlowGraph::trace(vec![x], vec![f3.outputs[0].clone()]).unwrap();
    assert_eq!(graph.nodes.len(), 3);

    let ctx = PassContext::default();
    let optimized = run_pipeline(graph, &ctx).unwrap();

    assert_eq!(optimized.nodes.len(), 1, "a fully injective single-use chain should collapse to one operator");
}

/// Running the pipeline twice over its own output is a no-op: there is
/// nothing left to fuse, fold, or rewrite the second time.
#[test]
fn pipeline_output_is_a_fixed_point() {
    let x = vec4(ScalarType::Float32);
    let b = vec4(ScalarType::Float32);
    let add_op = ops::add(x.clone(), b.clone()).unwrap();
    let relu_op = ops::relu(add_op.outputs[0].clone());

    let graph = tgc_core::FlowGraph::trace(vec![x, b], vec![relu_op.outputs[0].clone()]).unwrap();
    let ctx = PassContext::default();

    let once = run_pipeline(graph, &ctx).unwrap();
    let op_count = once.nodes.len();
    let twice = run_pipeline(once, &ctx).unwrap();

    assert_eq!(twice.nodes.len(), op_count);
}
