//! Constant folding (§4.4): replaces any `Operator` whose inputs are all
//! constant `Tensor`s with a single constant `Tensor`, evaluated ahead of
//! time via a small tree-walking interpreter over `ScalarExpr`/`GridCompute`.
//! A tree-walking evaluator scoped down to pure arithmetic -- no I/O, no
//! control-flow statements exist at this layer.

use std::sync::Arc;

use tgc_core::graph::{Device, Operator, Tensor, TensorData};
use tgc_core::{ConstantValue, DimExpr, GridCompute, ScalarExpr, ScalarType, TensorNode};

use crate::context::PassContext;
use crate::error::PassError;
use crate::rewrite::Rewrite;

pub fn fold_const_pass(graph: &tgc_core::FlowGraph, ctx: &PassContext) -> Result<tgc_core::FlowGraph, PassError> {
    let mut current = graph.clone();
    loop {
        match try_fold_const_once(&current)? {
            Some(next) => {
                if ctx.verbose {
                    tracing::debug!("fold_const: folded one operator, {} ops remain", next.nodes.len());
                }
                current = next;
            }
            None => return Ok(current),
        }
    }
}

fn try_fold_const_once(graph: &tgc_core::FlowGraph) -> Result<Option<tgc_core::FlowGraph>, PassError> {
    for op in &graph.nodes {
        if op.is_barrier {
            continue;
        }
        if op.outputs.len() != 1 {
            continue;
        }
        if !op.inputs.iter().all(|t| t.is_constant()) {
            continue;
        }
        let TensorNode::Compute(gc) = &*op.task.outputs()[0] else { continue };

        let folded = fold_grid(op, gc)?;
        let new_op: Arc<Operator> = folded;
        let rewrite = Rewrite::new(op, &new_op);
        return Ok(Some(rewrite.apply(graph)?));
    }
    Ok(None)
}

/// Evaluates `gc` pointwise over its shape using `op`'s constant input
/// data, producing a fresh graph-input-free constant `Operator` whose
/// single output carries the folded bytes.
fn fold_grid(op: &Arc<Operator>, gc: &GridCompute) -> Result<Arc<Operator>, PassError> {
    let extents = const_extents(&gc.shape)?;
    let total: u64 = extents.iter().product::<u64>().max(1);
    let dtype = op.outputs[0].dtype;
    let mut bytes = Vec::with_capacity((total as usize) * dtype_width(dtype));

    let mut coord = vec![0u64; extents.len()];
    for _ in 0..total {
        let bindings: Vec<(usize, i64)> = gc.axes.iter().enumerate().map(|(i, _)| (i, coord[i] as i64)).collect();
        let value = eval_scalar(&gc.value, op, &bindings)?;
        append_bytes(&mut bytes, value, dtype);
        increment_coord(&mut coord, &extents);
    }

    let out_node = Arc::new(TensorNode::Input {
        name: format!("{}_const", op.task.name),
        shape: op.outputs[0].shape.clone(),
        dtype,
    });

    Ok(Arc::new(Operator {
        name: format!("{}Const", op.name),
        inputs: Vec::new(),
        outputs: vec![Tensor::constant(dtype, op.outputs[0].shape.clone(), bytes)],
        attrs: op.attrs.clone(),
        task: tgc_core::Task::new(format!("{}_const", op.task.name), vec![out_node], 0),
        is_barrier: false,
    }))
}

fn const_extents(shape: &[DimExpr]) -> Result<Vec<u64>, PassError> {
    shape
        .iter()
        .map(|d| match d {
            DimExpr::Const(n) => Ok(*n),
            DimExpr::Sym(name) => {
                Err(PassError::PassFailed { pass: "fold_const", reason: format!("cannot fold a symbolic dimension '{name}'") })
            }
        })
        .collect()
}

fn increment_coord(coord: &mut [u64], extents: &[u64]) {
    for i in (0..coord.len()).rev() {
        coord[i] += 1;
        if coord[i] < extents[i] {
            return;
        }
        coord[i] = 0;
    }
}

#[derive(Debug, Clone, Copy)]
enum Scalar {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

fn eval_scalar(expr: &ScalarExpr, op: &Arc<Operator>, bindings: &[(usize, i64)]) -> Result<Scalar, PassError> {
    match expr {
        ScalarExpr::Const(v, _) => Ok(match v {
            ConstantValue::Bool(b) => Scalar::Bool(*b),
            ConstantValue::Int(i) => Scalar::Int(*i),
            ConstantValue::UInt(u) => Scalar::UInt(*u),
            ConstantValue::Float(f) => Scalar::Float(*f),
        }),
        ScalarExpr::Var(v) => {
            // Axis variables bind to the current coordinate; matched by
            // position among `bindings`, which mirrors `gc.axes`'s order.
            for (i, value) in bindings {
                if v.name == format!("i{i}") || v.name == format!("r{i}") {
                    return Ok(Scalar::Int(*value));
                }
            }
            Err(PassError::PassFailed { pass: "fold_const", reason: format!("unbound variable '{}'", v.name) })
        }
        ScalarExpr::Unary { op: uop, expr } => {
            let v = eval_scalar(expr, op, bindings)?;
            Ok(apply_unary(*uop, v))
        }
        ScalarExpr::Binary { op: bop, a, b } => {
            let va = eval_scalar(a, op, bindings)?;
            let vb = eval_scalar(b, op, bindings)?;
            apply_binary(*bop, va, vb)
        }
        ScalarExpr::IfThenElse { cond, then_expr, else_expr } => {
            let c = eval_scalar(cond, op, bindings)?;
            if as_bool(c) {
                eval_scalar(then_expr, op, bindings)
            } else {
                eval_scalar(else_expr, op, bindings)
            }
        }
        ScalarExpr::TensorElement { base, indices } => {
            let TensorNode::Input { name, .. } = &**base else {
                return Err(PassError::PassFailed { pass: "fold_const", reason: "nested compute in a constant-folded input".into() });
            };
            let param_index = op.task.inputs().iter().position(|p| Arc::ptr_eq(p, base) || matches!(&**p, TensorNode::Input { name: n, .. } if n == name));
            let Some(param_index) = param_index else {
                return Err(PassError::PassFailed { pass: "fold_const", reason: format!("unknown constant input '{name}'") });
            };
            let tensor = &op.inputs[param_index];
            let idx: Result<Vec<i64>, PassError> = indices.iter().map(|i| eval_scalar(i, op, bindings).map(as_int)).collect();
            read_constant_element(tensor, &idx?)
        }
        ScalarExpr::ScalarInput(_) => Err(PassError::PassFailed { pass: "fold_const", reason: "reductions are not folded at the graph level".into() }),
    }
}

fn apply_unary(op: tgc_core::UnaryOp, v: Scalar) -> Scalar {
    use tgc_core::UnaryOp::*;
    match (op, v) {
        (Neg, Scalar::Int(i)) => Scalar::Int(-i),
        (Neg, Scalar::Float(f)) => Scalar::Float(-f),
        (Not, Scalar::Bool(b)) => Scalar::Bool(!b),
        (BitwiseNot, Scalar::Int(i)) => Scalar::Int(!i),
        (_, v) => v,
    }
}

fn apply_binary(op: tgc_core::BinaryOp, a: Scalar, b: Scalar) -> Result<Scalar, PassError> {
    use tgc_core::BinaryOp::*;
    let result = match op {
        Add => Scalar::Float(as_float(a) + as_float(b)),
        Sub => Scalar::Float(as_float(a) - as_float(b)),
        Multiply => Scalar::Float(as_float(a) * as_float(b)),
        Div => Scalar::Float(as_float(a) / as_float(b)),
        FloorDiv => Scalar::Int(as_int(a).div_euclid(as_int(b).max(1))),
        Mod => Scalar::Int(as_int(a).rem_euclid(as_int(b).max(1))),
        And => Scalar::Bool(as_bool(a) && as_bool(b)),
        Or => Scalar::Bool(as_bool(a) || as_bool(b)),
        Less => Scalar::Bool(as_float(a) < as_float(b)),
        LessEqual => Scalar::Bool(as_float(a) <= as_float(b)),
        Equal => Scalar::Bool(as_float(a) == as_float(b)),
        BitwiseAnd => Scalar::Int(as_int(a) & as_int(b)),
        BitwiseOr => Scalar::Int(as_int(a) | as_int(b)),
        LeftShift => Scalar::Int(as_int(a) << as_int(b)),
        RightShift => Scalar::Int(as_int(a) >> as_int(b)),
    };
    Ok(result)
}

fn as_float(v: Scalar) -> f64 {
    match v {
        Scalar::Int(i) => i as f64,
        Scalar::UInt(u) => u as f64,
        Scalar::Float(f) => f,
        Scalar::Bool(b) => b as i64 as f64,
    }
}

fn as_int(v: Scalar) -> i64 {
    match v {
        Scalar::Int(i) => i,
        Scalar::UInt(u) => u as i64,
        Scalar::Float(f) => f as i64,
        Scalar::Bool(b) => b as i64,
    }
}

fn as_bool(v: Scalar) -> bool {
    match v {
        Scalar::Bool(b) => b,
        other => as_int(other) != 0,
    }
}

fn read_constant_element(tensor: &Arc<Tensor>, indices: &[i64]) -> Result<Scalar, PassError> {
    let Some(data) = &tensor.data else {
        return Err(PassError::PassFailed { pass: "fold_const", reason: "expected a constant tensor with data".into() });
    };
    let width = dtype_width(tensor.dtype);
    let extents = const_extents(&tensor.shape)?;
    let mut flat = 0usize;
    for (i, idx) in indices.iter().enumerate() {
        flat = flat * extents[i] as usize + *idx as usize;
    }
    let start = flat * width;
    Ok(decode_bytes(&data.bytes[start..start + width], tensor.dtype))
}

fn dtype_width(dtype: ScalarType) -> usize {
    match dtype {
        ScalarType::Bool | ScalarType::Int8 | ScalarType::UInt8 => 1,
        ScalarType::Float16 | ScalarType::BFloat16 => 2,
        ScalarType::Int32 | ScalarType::UInt32 | ScalarType::Float32 => 4,
        ScalarType::Int64 | ScalarType::UInt64 | ScalarType::Float64 => 8,
        ScalarType::Int16 | ScalarType::UInt16 => 2,
    }
}

fn decode_bytes(bytes: &[u8], dtype: ScalarType) -> Scalar {
    match dtype {
        ScalarType::Float32 => Scalar::Float(f32::from_le_bytes(bytes.try_into().unwrap()) as f64),
        ScalarType::Float64 => Scalar::Float(f64::from_le_bytes(bytes.try_into().unwrap())),
        ScalarType::Int32 => Scalar::Int(i32::from_le_bytes(bytes.try_into().unwrap()) as i64),
        ScalarType::Int64 => Scalar::Int(i64::from_le_bytes(bytes.try_into().unwrap())),
        ScalarType::Bool => Scalar::Bool(bytes[0] != 0),
        _ => Scalar::Int(bytes.iter().fold(0i64, |acc, b| (acc << 8) | *b as i64)),
    }
}

fn append_bytes(out: &mut Vec<u8>, value: Scalar, dtype: ScalarType) {
    match dtype {
        ScalarType::Float32 => out.extend_from_slice(&(as_float(value) as f32).to_le_bytes()),
        ScalarType::Float64 => out.extend_from_slice(&as_float(value).to_le_bytes()),
        ScalarType::Int32 => out.extend_from_slice(&(as_int(value) as i32).to_le_bytes()),
        ScalarType::Int64 => out.extend_from_slice(&as_int(value).to_le_bytes()),
        ScalarType::Bool => out.push(as_bool(value) as u8),
        _ => out.extend_from_slice(&(as_int(value) as i32).to_le_bytes()[..dtype_width(dtype)]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgc_core::ops;

    #[test]
    fn folds_constant_add() {
        let a = Tensor::constant(ScalarType::Float32, vec![DimExpr::Const(2)], vec![0, 0, 128, 63, 0, 0, 0, 64]);
        let b = Tensor::constant(ScalarType::Float32, vec![DimExpr::Const(2)], vec![0, 0, 0, 63, 0, 0, 0, 63]);
        let add_op = ops::add(a, b).unwrap();
        let graph = tgc_core::FlowGraph::trace(vec![], vec![add_op.outputs[0].clone()]).unwrap();

        let ctx = PassContext::default();
        let folded = fold_const_pass(&graph, &ctx).unwrap();
        assert_eq!(folded.nodes.len(), 1);
        assert!(folded.nodes[0].outputs[0].is_constant());
    }

    #[test]
    fn leaves_non_constant_inputs_untouched() {
        let a = Tensor::graph_input(ScalarType::Float32, vec![DimExpr::Const(2)], Device::Cpu);
        let b = Tensor::constant(ScalarType::Float32, vec![DimExpr::Const(2)], vec![0, 0, 0, 63, 0, 0, 0, 63]);
        let add_op = ops::add(a.clone(), b).unwrap();
        let graph = tgc_core::FlowGraph::trace(vec![a], vec![add_op.outputs[0].clone()]).unwrap();

        let ctx = PassContext::default();
        let folded = fold_const_pass(&graph, &ctx).unwrap();
        assert_eq!(folded.nodes.len(), 1);
        assert!(!folded.nodes[0].outputs[0].is_constant());
    }
}
