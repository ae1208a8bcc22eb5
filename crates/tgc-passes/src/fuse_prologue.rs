//! Prologue fusion (§4.2): absorbs a single-use, single-output injective
//! producer into the consumer it feeds, as a `Prologue` carried by the
//! consumer's `Task` rather than as a materialized intermediate tensor.
//!
//! Runs to a fixed point: each call to [`try_fuse_prologue_once`] performs
//! at most one fusion (the first eligible candidate found scanning the
//! graph in reverse topological order), and [`fuse_prologue_pass`] loops
//! until a pass finds nothing left to fuse.

use std::sync::Arc;

use tgc_core::graph::{Operator, Tensor};
use tgc_core::task::{Prologue, Task};
use tgc_core::{FlowGraph, NodeKey, ScalarExpr, TensorNode, Var};

use crate::context::PassContext;
use crate::error::PassError;
use crate::rewrite::Rewrite;
use crate::usage::{analyze_usage, is_barrier, is_injective};

pub fn fuse_prologue_pass(graph: &FlowGraph, ctx: &PassContext) -> Result<FlowGraph, PassError> {
    let mut current = graph.clone();
    loop {
        match try_fuse_prologue_once(&current)? {
            Some(next) => {
                if ctx.verbose {
                    tracing::debug!("fuse_prologue: fused one producer, {} ops remain", next.nodes.len());
                }
                current = next;
            }
            None => return Ok(current),
        }
    }
}

/// The task-input parameters of `task` that still have a real backing
/// tensor in `Operator.inputs` -- i.e. every input parameter that is not
/// itself a prologue/epilogue carrier key. Order matches `Operator.inputs`.
fn real_input_backing_nodes(task: &Task) -> Vec<Arc<TensorNode>> {
    task.inputs()
        .iter()
        .filter(|p| {
            let key = NodeKey::from(*p);
            !task.prologues.contains_key(&key) && !task.epilogues.contains_key(&key)
        })
        .cloned()
        .collect()
}

/// If `node` is one of some existing prologue's `extra_inputs`, returns
/// that carrier's key.
fn find_owning_prologue(task: &Task, node: &Arc<TensorNode>) -> Option<NodeKey> {
    task.prologues
        .iter()
        .find(|(_, carrier)| carrier.extra_inputs.iter().any(|e| Arc::ptr_eq(e, node)))
        .map(|(key, _)| *key)
}

fn try_fuse_prologue_once(graph: &FlowGraph) -> Result<Option<FlowGraph>, PassError> {
    let usage = analyze_usage(graph);

    for consumer in graph.nodes.iter().rev() {
        if is_barrier(consumer) {
            continue;
        }
        let backing = real_input_backing_nodes(&consumer.task);
        debug_assert_eq!(backing.len(), consumer.inputs.len());

        for (idx, input) in consumer.inputs.iter().enumerate() {
            let Some((producer, out_index)) = &input.producer else { continue };
            if is_barrier(producer) {
                continue;
            }
            if producer.outputs.len() != 1 || *out_index != 0 {
                continue;
            }
            if !is_injective(&producer.task) {
                continue;
            }
            if !producer.task.prologues.is_empty() || !producer.task.epilogues.is_empty() {
                continue;
            }
            let uses = usage.get(&tgc_core::graph::TensorKey::from(input));
            if uses.map(|u| u.len()).unwrap_or(0) != 1 {
                continue;
            }
            let Some(backing_node) = backing.get(idx) else { continue };

            let new_consumer = match find_owning_prologue(&consumer.task, backing_node) {
                Some(carrier_key) => {
                    let carrier = consumer.task.prologues.get(&carrier_key).unwrap().clone();
                    extend_existing_prologue(consumer, idx, backing_node, producer, carrier_key, &carrier)?
                }
                None => attach_as_prologue(consumer, idx, backing_node, producer)?,
            };
            let rewrite = Rewrite::new(consumer, &new_consumer);
            return Ok(Some(rewrite.apply(graph)?));
        }
    }
    Ok(None)
}

/// Case A (§4.2): `backing_node` is a plain task input, not yet any
/// carrier's key. Attaches a fresh `Prologue` keyed by `backing_node`;
/// `backing_node` itself is dropped from `task.parameters` (it no longer
/// has a backing buffer -- the carrier's `value` replaces every read of
/// it) and `producer`'s own raw inputs become the new real parameters in
/// its place, mirroring `extend_existing_prologue`'s splice.
fn attach_as_prologue(
    consumer: &Arc<Operator>,
    real_idx: usize,
    backing_node: &Arc<TensorNode>,
    producer: &Arc<Operator>,
) -> Result<Arc<Operator>, PassError> {
    let producer_out = producer.task.outputs()[0].clone();
    let (producer_axes, producer_value) = match &*producer_out {
        TensorNode::Compute(gc) => (gc.axes.clone(), gc.value.clone()),
        TensorNode::Input { .. } => {
            return Err(PassError::PassFailed { pass: "fuse_prologue", reason: "producer output has no compute formula".into() })
        }
    };

    let mut new_task = consumer.task.clone();
    let param_pos = new_task
        .parameters
        .iter()
        .position(|p| Arc::ptr_eq(p, backing_node))
        .expect("backing_node must be a task parameter");
    new_task.parameters.remove(param_pos);
    let extra_params: Vec<Arc<TensorNode>> = producer.task.inputs().to_vec();
    for (i, p) in extra_params.iter().enumerate() {
        new_task.parameters.insert(param_pos + i, p.clone());
    }
    new_task.num_inputs = new_task.num_inputs - 1 + extra_params.len();
    new_task.prologues.insert(
        NodeKey::from(backing_node),
        Prologue { extra_inputs: extra_params, indices: producer_axes, value: producer_value },
    );
    new_task.validate().map_err(PassError::from)?;

    let mut new_inputs: Vec<Arc<Tensor>> = consumer.inputs.clone();
    new_inputs.remove(real_idx);
    new_inputs.extend(producer.inputs.iter().cloned());

    build_operator(consumer, new_inputs, new_task)
}

/// Cases B/C (§4.2): `backing_node` is itself one of `carrier`'s
/// `extra_inputs` -- `producer` feeds an already-fused carrier rather than
/// a plain parameter. Splices `producer`'s formula into `carrier.value` in
/// place of every `TensorElement` read of `backing_node`, substituting
/// `producer`'s own axes by that read's index expressions, and replaces
/// `backing_node` in both the carrier's `extra_inputs` and the task's
/// parameter/input lists with `producer`'s own raw inputs.
fn extend_existing_prologue(
    consumer: &Arc<Operator>,
    real_idx: usize,
    backing_node: &Arc<TensorNode>,
    producer: &Arc<Operator>,
    carrier_key: NodeKey,
    carrier: &Prologue,
) -> Result<Arc<Operator>, PassError> {
    let producer_out = producer.task.outputs()[0].clone();
    let (producer_axes, producer_value) = match &*producer_out {
        TensorNode::Compute(gc) => (gc.axes.clone(), gc.value.clone()),
        TensorNode::Input { .. } => {
            return Err(PassError::PassFailed { pass: "fuse_prologue", reason: "producer output has no compute formula".into() })
        }
    };
    let new_value = substitute_tensor_element(&carrier.value, backing_node, &producer_axes, &producer_value);

    let extra_pos = carrier
        .extra_inputs
        .iter()
        .position(|e| Arc::ptr_eq(e, backing_node))
        .expect("backing_node must be one of carrier.extra_inputs");
    let mut new_extra_inputs = carrier.extra_inputs.clone();
    new_extra_inputs.splice(extra_pos..extra_pos + 1, producer.task.inputs().iter().cloned());

    let mut new_task = consumer.task.clone();
    let param_pos = new_task
        .parameters
        .iter()
        .position(|p| Arc::ptr_eq(p, backing_node))
        .expect("backing_node must be a task parameter");
    new_task.parameters.remove(param_pos);
    for (i, p) in producer.task.inputs().iter().enumerate() {
        new_task.parameters.insert(param_pos + i, p.clone());
    }
    new_task.num_inputs = new_task.num_inputs - 1 + producer.task.num_inputs;
    new_task.prologues.insert(
        carrier_key,
        Prologue { extra_inputs: new_extra_inputs, indices: carrier.indices.clone(), value: new_value },
    );
    new_task.validate().map_err(PassError::from)?;

    let mut new_inputs: Vec<Arc<Tensor>> = consumer.inputs.clone();
    new_inputs.remove(real_idx);
    new_inputs.extend(producer.inputs.iter().cloned());

    build_operator(consumer, new_inputs, new_task)
}

/// Replaces every `TensorElement { base, .. }` read of `target` inside
/// `expr` with `replacement`, after substituting `replacement`'s free
/// axis variables by the read's own index expressions.
fn substitute_tensor_element(
    expr: &Arc<ScalarExpr>,
    target: &Arc<TensorNode>,
    axes: &[Arc<Var>],
    replacement: &Arc<ScalarExpr>,
) -> Arc<ScalarExpr> {
    match &**expr {
        ScalarExpr::TensorElement { base, indices } if Arc::ptr_eq(base, target) => {
            substitute_vars(replacement, axes, indices)
        }
        ScalarExpr::TensorElement { base, indices } => Arc::new(ScalarExpr::TensorElement {
            base: base.clone(),
            indices: indices.iter().map(|i| substitute_tensor_element(i, target, axes, replacement)).collect(),
        }),
        ScalarExpr::Unary { op, expr: e } => {
            Arc::new(ScalarExpr::Unary { op: *op, expr: substitute_tensor_element(e, target, axes, replacement) })
        }
        ScalarExpr::Binary { op, a, b } => Arc::new(ScalarExpr::Binary {
            op: *op,
            a: substitute_tensor_element(a, target, axes, replacement),
            b: substitute_tensor_element(b, target, axes, replacement),
        }),
        ScalarExpr::IfThenElse { cond, then_expr, else_expr } => Arc::new(ScalarExpr::IfThenElse {
            cond: substitute_tensor_element(cond, target, axes, replacement),
            then_expr: substitute_tensor_element(then_expr, target, axes, replacement),
            else_expr: substitute_tensor_element(else_expr, target, axes, replacement),
        }),
        ScalarExpr::Var(_) | ScalarExpr::Const(_, _) | ScalarExpr::ScalarInput(_) => expr.clone(),
    }
}

/// Substitutes each of `axes[i]` by `values[i]` throughout `expr`.
fn substitute_vars(expr: &Arc<ScalarExpr>, axes: &[Arc<Var>], values: &[Arc<ScalarExpr>]) -> Arc<ScalarExpr> {
    match &**expr {
        ScalarExpr::Var(v) => {
            if let Some(pos) = axes.iter().position(|a| Arc::ptr_eq(a, v)) {
                values[pos].clone()
            } else {
                expr.clone()
            }
        }
        ScalarExpr::Const(_, _) | ScalarExpr::ScalarInput(_) => expr.clone(),
        ScalarExpr::Unary { op, expr: e } => Arc::new(ScalarExpr::Unary { op: *op, expr: substitute_vars(e, axes, values) }),
        ScalarExpr::Binary { op, a, b } => Arc::new(ScalarExpr::Binary {
            op: *op,
            a: substitute_vars(a, axes, values),
            b: substitute_vars(b, axes, values),
        }),
        ScalarExpr::IfThenElse { cond, then_expr, else_expr } => Arc::new(ScalarExpr::IfThenElse {
            cond: substitute_vars(cond, axes, values),
            then_expr: substitute_vars(then_expr, axes, values),
            else_expr: substitute_vars(else_expr, axes, values),
        }),
        ScalarExpr::TensorElement { base, indices } => Arc::new(ScalarExpr::TensorElement {
            base: base.clone(),
            indices: indices.iter().map(|i| substitute_vars(i, axes, values)).collect(),
        }),
    }
}

fn build_operator(consumer: &Arc<Operator>, inputs: Vec<Arc<Tensor>>, task: Task) -> Result<Arc<Operator>, PassError> {
    let output_meta: Vec<_> = consumer.outputs.iter().map(|t| (t.dtype, t.shape.clone(), t.device)).collect();
    let mut new_op = Arc::new(Operator {
        name: consumer.name.clone(),
        inputs,
        outputs: Vec::new(),
        attrs: consumer.attrs.clone(),
        task,
        is_barrier: consumer.is_barrier,
    });
    let outs: Vec<Arc<Tensor>> = output_meta
        .into_iter()
        .enumerate()
        .map(|(i, (dtype, shape, device))| Tensor::operator_output(&new_op, i, dtype, shape, device))
        .collect();
    Arc::get_mut(&mut new_op).unwrap().outputs = outs;
    Ok(new_op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgc_core::graph::Device;
    use tgc_core::ops;
    use tgc_core::DimExpr;

    fn vec4(dtype: tgc_core::ScalarType) -> Arc<Tensor> {
        Tensor::graph_input(dtype, vec![DimExpr::Const(4)], Device::Cpu)
    }

    #[test]
    fn fuses_add_then_relu_into_single_node() {
        let a = vec4(tgc_core::ScalarType::Float32);
        let b = vec4(tgc_core::ScalarType::Float32);
        let add_op = ops::add(a.clone(), b.clone()).unwrap();
        let add_out = add_op.outputs[0].clone();
        let relu_op = ops::relu(add_out.clone());
        let relu_out = relu_op.outputs[0].clone();

        let graph = FlowGraph::trace(vec![a, b], vec![relu_out]).unwrap();
        assert_eq!(graph.nodes.len(), 2);

        let ctx = PassContext::default();
        let fused = fuse_prologue_pass(&graph, &ctx).unwrap();
        assert_eq!(fused.nodes.len(), 1, "Add should be fused as a prologue into Relu");
        assert_eq!(fused.nodes[0].task.prologues.len(), 1);
    }

    #[test]
    fn fixed_point_handles_three_operator_chain() {
        let a = vec4(tgc_core::ScalarType::Float32);
        let b = vec4(tgc_core::ScalarType::Float32);
        let c = vec4(tgc_core::ScalarType::Float32);
        let add_op = ops::add(a.clone(), b.clone()).unwrap();
        let mul_op = ops::multiply(add_op.outputs[0].clone(), c.clone()).unwrap();
        let relu_op = ops::relu(mul_op.outputs[0].clone());

        let graph = FlowGraph::trace(vec![a, b, c], vec![relu_op.outputs[0].clone()]).unwrap();
        assert_eq!(graph.nodes.len(), 3);

        let ctx = PassContext::default();
        let fused = fuse_prologue_pass(&graph, &ctx).unwrap();
        assert_eq!(fused.nodes.len(), 1);
        // Add was chained into Multiply's prologue rather than creating a
        // second independent carrier.
        assert_eq!(fused.nodes[0].task.prologues.len(), 1);
        let carrier = fused.nodes[0].task.prologues.values().next().unwrap();
        assert_eq!(carrier.extra_inputs.len(), 3, "a, b, and c should all surface as extra inputs of the chained prologue");

        let op = &fused.nodes[0];
        assert_eq!(op.task.parameters.len(), op.inputs.len() + op.outputs.len());
    }

    #[test]
    fn fused_task_parameter_count_matches_inputs_plus_outputs() {
        let a = vec4(tgc_core::ScalarType::Float32);
        let b = vec4(tgc_core::ScalarType::Float32);
        let add_op = ops::add(a.clone(), b.clone()).unwrap();
        let relu_op = ops::relu(add_op.outputs[0].clone());

        let graph = FlowGraph::trace(vec![a, b], vec![relu_op.outputs[0].clone()]).unwrap();
        let ctx = PassContext::default();
        let fused = fuse_prologue_pass(&graph, &ctx).unwrap();

        let op = &fused.nodes[0];
        assert_eq!(
            op.task.parameters.len(),
            op.inputs.len() + op.outputs.len(),
            "attach_as_prologue must drop the fused input's own parameter slot, not just append the producer's"
        );
    }

    #[test]
    fn producer_with_existing_prologue_is_not_absorbed_again() {
        let x = vec4(tgc_core::ScalarType::Float32);
        let relu_op = ops::relu(x.clone());

        // Simulate a producer that has already absorbed a prologue of its
        // own -- neither fusion case recursively resolves a producer's own
        // carried substitution, so such a producer must not be fused again.
        let mut already_fused_task = relu_op.task.clone();
        let backing = already_fused_task.inputs()[0].clone();
        already_fused_task.prologues.insert(
            NodeKey::from(&backing),
            Prologue {
                extra_inputs: vec![],
                indices: vec![],
                value: Arc::new(ScalarExpr::Const(tgc_core::expr::ConstantValue::Int(0), tgc_core::ScalarType::Int32)),
            },
        );
        let producer = build_operator(&relu_op, relu_op.inputs.clone(), already_fused_task).unwrap();
        let neg_op = ops::neg(producer.outputs[0].clone());

        let graph = FlowGraph::trace(vec![x], vec![neg_op.outputs[0].clone()]).unwrap();
        assert_eq!(graph.nodes.len(), 2);

        let ctx = PassContext::default();
        let fused = fuse_prologue_pass(&graph, &ctx).unwrap();
        assert_eq!(fused.nodes.len(), 2, "a producer that already carries a prologue must not be folded again");
    }

    #[test]
    fn non_injective_producer_is_not_fused() {
        let a = Tensor::graph_input(tgc_core::ScalarType::Float32, vec![DimExpr::Const(2), DimExpr::Const(3)], Device::Cpu);
        let b = Tensor::graph_input(tgc_core::ScalarType::Float32, vec![DimExpr::Const(3), DimExpr::Const(4)], Device::Cpu);
        let matmul_op = ops::matmul(a.clone(), b.clone()).unwrap();
        let relu_op = ops::relu(matmul_op.outputs[0].clone());

        let graph = FlowGraph::trace(vec![a, b], vec![relu_op.outputs[0].clone()]).unwrap();
        let ctx = PassContext::default();
        let fused = fuse_prologue_pass(&graph, &ctx).unwrap();
        assert_eq!(fused.nodes.len(), 2, "matmul is a reduction, not injective -- must not be absorbed as a prologue");
    }

    #[test]
    fn multi_use_producer_is_not_fused() {
        let a = vec4(tgc_core::ScalarType::Float32);
        let b = vec4(tgc_core::ScalarType::Float32);
        let add_op = ops::add(a.clone(), b.clone()).unwrap();
        let add_out = add_op.outputs[0].clone();
        let relu_op = ops::relu(add_out.clone());
        let neg_op = ops::neg(add_out.clone());

        let graph = FlowGraph::trace(vec![a, b], vec![relu_op.outputs[0].clone(), neg_op.outputs[0].clone()]).unwrap();
        let ctx = PassContext::default();
        let fused = fuse_prologue_pass(&graph, &ctx).unwrap();
        assert_eq!(fused.nodes.len(), 3, "Add feeds two consumers, so it cannot be fused into either one");
    }
}
