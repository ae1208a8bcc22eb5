//! Epilogue fusion (§4.3): the producer-absorbs-consumer mirror of
//! [`crate::fuse_prologue`]. Where prologue fusion pulls an injective
//! *producer* forward into the consumer it feeds, epilogue fusion pulls
//! an injective *consumer* backward into the (possibly non-injective --
//! a reduction, a matmul) producer it reads, as an `Epilogue` carried by
//! the producer's own output parameter.
//!
//! There is no `fuse_epilogue.py` in the retrieved reference material to
//! ground the exact substitution mechanics against (only `fuse_prologue.py`
//! was available); the eligibility rule and `TensorElement`-substitution
//! technique below are the direct mirror of that file's approach, recorded
//! as an explicit design decision in this repository's grounding ledger.

use std::sync::Arc;

use tgc_core::graph::{Operator, Tensor};
use tgc_core::task::{Epilogue, InverseMap, Task};
use tgc_core::types::Type;
use tgc_core::{FlowGraph, NodeKey, ScalarExpr, TensorNode, Var};

use crate::context::PassContext;
use crate::error::PassError;
use crate::rewrite::Rewrite;
use crate::usage::{analyze_usage, is_barrier, is_injective};

pub fn fuse_epilogue_pass(graph: &FlowGraph, ctx: &PassContext) -> Result<FlowGraph, PassError> {
    let mut current = graph.clone();
    loop {
        match try_fuse_epilogue_once(&current)? {
            Some(next) => {
                if ctx.verbose {
                    tracing::debug!("fuse_epilogue: fused one consumer, {} ops remain", next.nodes.len());
                }
                current = next;
            }
            None => return Ok(current),
        }
    }
}

fn try_fuse_epilogue_once(graph: &FlowGraph) -> Result<Option<FlowGraph>, PassError> {
    let usage = analyze_usage(graph);

    for producer in &graph.nodes {
        if is_barrier(producer) {
            continue;
        }
        if producer.outputs.len() != 1 {
            continue;
        }
        let prod_out = &producer.outputs[0];
        let uses = usage.get(&tgc_core::graph::TensorKey::from(prod_out));
        let Some(uses) = uses else { continue };
        if uses.len() != 1 {
            continue;
        }
        let tgc_core::graph::Use::OperatorInput { consumer, input_index } = &uses[0] else { continue };
        if is_barrier(consumer) {
            continue;
        }
        if !is_injective(&consumer.task) {
            continue;
        }

        let new_producer = fuse_into_epilogue(producer, consumer, *input_index)?;
        let rewrite = Rewrite::new(consumer, &new_producer);
        return Ok(Some(rewrite.apply(graph)?));
    }
    Ok(None)
}

/// Folds `consumer`'s formula into `producer`'s `Task` as an `Epilogue`
/// keyed by `producer`'s own (unchanged) output parameter. If that
/// parameter already carries an epilogue from a previous round, the new
/// consumer's formula wraps the existing one rather than starting over --
/// so a chain of elementwise consumers collapses via repeated application
/// of this same case, one fixed-point iteration per link.
fn fuse_into_epilogue(producer: &Arc<Operator>, consumer: &Arc<Operator>, fused_input: usize) -> Result<Arc<Operator>, PassError> {
    let producer_out_node = producer.task.outputs()[0].clone();
    let producer_out_axes = match &*producer_out_node {
        TensorNode::Compute(gc) => gc.axes.clone(),
        TensorNode::Input { .. } => {
            return Err(PassError::PassFailed { pass: "fuse_epilogue", reason: "producer output has no compute formula".into() })
        }
    };
    let key = NodeKey::from(&producer_out_node);

    let (consumer_axes, consumer_value) = match &*consumer.task.outputs()[0] {
        TensorNode::Compute(gc) => (gc.axes.clone(), gc.value.clone()),
        TensorNode::Input { .. } => {
            return Err(PassError::PassFailed { pass: "fuse_epilogue", reason: "consumer output has no compute formula".into() })
        }
    };
    let fused_param = consumer.task.parameters[fused_input].clone();

    let existing = producer.task.epilogues.get(&key).cloned();
    let (orig_value, base_value) = match &existing {
        Some(e) => (e.orig_value.clone(), e.value.clone()),
        None => {
            let dtype = match &*producer_out_node {
                TensorNode::Compute(gc) => scalar_type_of(&gc.value),
                _ => unreachable!(),
            };
            let orig = Arc::new(Var::new("epi", Type::Scalar(dtype)));
            (orig.clone(), Arc::new(ScalarExpr::Var(orig)))
        }
    };

    let substituted = substitute_tensor_element(&consumer_value, &fused_param, &consumer_axes, &base_value);
    let new_value = substitute_vars(&substituted, &consumer_axes, &as_scalar_vars(&producer_out_axes));

    let mut extra_inputs = existing.as_ref().map(|e| e.extra_inputs.clone()).unwrap_or_default();
    let mut new_real_inputs: Vec<Arc<Tensor>> = Vec::new();
    for (i, param) in consumer.task.inputs().iter().enumerate() {
        if i == fused_input {
            continue;
        }
        extra_inputs.push(param.clone());
        new_real_inputs.push(consumer.inputs[i].clone());
    }

    let inverse = producer.task.inverse_map.get(&key).cloned().unwrap_or_else(|| InverseMap::identity(&producer_out_axes));

    let mut new_task = producer.task.clone();
    let insert_at = new_task.num_inputs;
    for (i, param) in consumer.task.inputs().iter().enumerate().filter(|(i, _)| *i != fused_input).map(|(_, p)| p).enumerate() {
        new_task.parameters.insert(insert_at + i, param.clone());
    }
    new_task.num_inputs += new_real_inputs.len();
    new_task.epilogues.insert(
        key,
        Epilogue {
            extra_inputs,
            indices: producer_out_axes,
            orig_value,
            value: new_value,
            out_indices: inverse.input_from_output.clone(),
            out_tensor: producer_out_node,
        },
    );
    new_task.validate().map_err(PassError::from)?;

    let mut new_inputs: Vec<Arc<Tensor>> = producer.inputs.clone();
    new_inputs.extend(new_real_inputs);

    build_operator_for_consumer_output(producer, consumer, new_inputs, new_task)
}

fn scalar_type_of(expr: &ScalarExpr) -> tgc_core::ScalarType {
    match expr {
        ScalarExpr::Const(_, ty) => *ty,
        ScalarExpr::Var(v) => match v.ty {
            Type::Scalar(ty) => ty,
            _ => tgc_core::ScalarType::Float32,
        },
        ScalarExpr::Unary { expr, .. } => scalar_type_of(expr),
        ScalarExpr::Binary { a, .. } => scalar_type_of(a),
        ScalarExpr::IfThenElse { then_expr, .. } => scalar_type_of(then_expr),
        ScalarExpr::TensorElement { base, .. } => match &**base {
            TensorNode::Input { dtype, .. } => *dtype,
            TensorNode::Compute(gc) => scalar_type_of(&gc.value),
        },
        ScalarExpr::ScalarInput(node) => match &**node {
            tgc_core::ScalarNode::Input { dtype, .. } => *dtype,
            tgc_core::ScalarNode::Compute(rc) => scalar_type_of(&rc.value),
        },
    }
}

fn as_scalar_vars(vars: &[Arc<Var>]) -> Vec<Arc<ScalarExpr>> {
    vars.iter().map(|v| Arc::new(ScalarExpr::Var(v.clone()))).collect()
}

/// Replaces every `TensorElement { base, .. }` read of `target` inside
/// `expr` with `replacement` -- `replacement` here is always an opaque
/// placeholder read (`orig_value` or a previous epilogue's composed
/// value), so no axis substitution into `replacement` itself is needed.
fn substitute_tensor_element(
    expr: &Arc<ScalarExpr>,
    target: &Arc<TensorNode>,
    axes: &[Arc<Var>],
    replacement: &Arc<ScalarExpr>,
) -> Arc<ScalarExpr> {
    match &**expr {
        ScalarExpr::TensorElement { base, .. } if Arc::ptr_eq(base, target) => replacement.clone(),
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

/// Substitutes each of `axes[i]` by `values[i]` throughout `expr` --
/// reconciling the consumer's own axis variables with the producer's,
/// since the two `GridCompute`s were built independently but iterate the
/// same coordinate space once fused.
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

/// The fused node replaces `consumer` in the graph (its output tensor
/// identity must keep serving whatever read `consumer`'s output before),
/// but its `Task`/`inputs` come from `producer` plus `consumer`'s extra
/// inputs -- the absorbed computation, not `consumer`'s own shell.
fn build_operator_for_consumer_output(
    producer: &Arc<Operator>,
    consumer: &Arc<Operator>,
    inputs: Vec<Arc<Tensor>>,
    task: Task,
) -> Result<Arc<Operator>, PassError> {
    let output_meta: Vec<_> = consumer.outputs.iter().map(|t| (t.dtype, t.shape.clone(), t.device)).collect();
    let mut new_op = Arc::new(Operator {
        name: producer.name.clone(),
        inputs,
        outputs: Vec::new(),
        attrs: producer.attrs.clone(),
        task,
        is_barrier: producer.is_barrier || consumer.is_barrier,
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

    fn mat(rows: u64, cols: u64) -> Arc<Tensor> {
        Tensor::graph_input(tgc_core::ScalarType::Float32, vec![DimExpr::Const(rows), DimExpr::Const(cols)], Device::Cpu)
    }

    #[test]
    fn fuses_relu_after_matmul_as_epilogue() {
        let a = mat(2, 3);
        let b = mat(3, 4);
        let matmul_op = ops::matmul(a.clone(), b.clone()).unwrap();
        let relu_op = ops::relu(matmul_op.outputs[0].clone());

        let graph = FlowGraph::trace(vec![a, b], vec![relu_op.outputs[0].clone()]).unwrap();
        assert_eq!(graph.nodes.len(), 2);

        let ctx = PassContext::default();
        let fused = fuse_epilogue_pass(&graph, &ctx).unwrap();
        assert_eq!(fused.nodes.len(), 1, "Relu should be absorbed as matmul's epilogue");
        assert_eq!(fused.nodes[0].task.epilogues.len(), 1);
        assert_eq!(fused.nodes[0].name, "MatMul");
    }

    #[test]
    fn fused_task_parameter_count_matches_inputs_plus_outputs_with_extra_input() {
        let a = mat(2, 3);
        let b = mat(3, 4);
        let bias = mat(2, 4);
        let matmul_op = ops::matmul(a.clone(), b.clone()).unwrap();
        let add_op = ops::add(matmul_op.outputs[0].clone(), bias.clone()).unwrap();

        let graph = FlowGraph::trace(vec![a, b, bias], vec![add_op.outputs[0].clone()]).unwrap();
        let ctx = PassContext::default();
        let fused = fuse_epilogue_pass(&graph, &ctx).unwrap();

        assert_eq!(fused.nodes.len(), 1, "Add should be absorbed as matmul's epilogue");
        let op = &fused.nodes[0];
        assert_eq!(
            op.task.parameters.len(),
            op.inputs.len() + op.outputs.len(),
            "the consumer's extra real input must be inserted before the output slot, not appended after it"
        );
    }

    #[test]
    fn chains_two_epilogues_onto_one_producer() {
        let a = mat(2, 3);
        let b = mat(3, 4);
        let matmul_op = ops::matmul(a.clone(), b.clone()).unwrap();
        let relu_op = ops::relu(matmul_op.outputs[0].clone());
        let neg_op = ops::neg(relu_op.outputs[0].clone());

        let graph = FlowGraph::trace(vec![a, b], vec![neg_op.outputs[0].clone()]).unwrap();
        assert_eq!(graph.nodes.len(), 3);

        let ctx = PassContext::default();
        let fused = fuse_epilogue_pass(&graph, &ctx).unwrap();
        assert_eq!(fused.nodes.len(), 1);
        assert_eq!(fused.nodes[0].task.epilogues.len(), 1, "second consumer should extend the same epilogue, not add a second");

        let op = &fused.nodes[0];
        assert_eq!(op.task.parameters.len(), op.inputs.len() + op.outputs.len());
    }

    #[test]
    fn non_injective_consumer_is_not_fused() {
        let a = mat(2, 3);
        let b = mat(3, 4);
        let matmul_op = ops::matmul(a.clone(), b.clone()).unwrap();
        let matmul2_op = ops::matmul(matmul_op.outputs[0].clone(), mat(4, 2).clone()).unwrap();

        let graph = FlowGraph::trace(vec![a, b], vec![matmul2_op.outputs[0].clone()]).unwrap();
        let ctx = PassContext::default();
        let fused = fuse_epilogue_pass(&graph, &ctx).unwrap();
        assert_eq!(fused.nodes.len(), 2, "a reduction consumer cannot be absorbed as an epilogue");
    }
}
