//! `KernelSchedule`: the plug-in point a `Task` is lowered through, plus
//! a small registry of reference schedules.
//!
//! An `implement` entry-point shape: a schedule receives the Task (and
//! the resolved `PassContext`) and hands back a complete `IRModule`,
//! deciding internally whether it can handle the shape it was given. The
//! two schedules shipped here are deliberately narrow reference
//! implementations, not a general auto-scheduler: one thread per output
//! element for pure elementwise tasks, and a single accumulator loop per
//! output element for a task whose entire body is one reduction. Real
//! tiled/shared-memory schedules, and autotuned schedule search, are out
//! of scope.

use std::collections::HashMap;
use std::sync::Arc;

use tgc_passes::PassContext;

use tgc_core::{
    BinaryOp, ConstantValue, DimExpr, Expr, Function, FunctionKind, IRModule, Layout, MemoryScope,
    NodeKey, ReduceKind, ScalarExpr, ScalarNode, ScalarType, Stmt, Task, TensorNode, Type, Var,
};

use crate::error::LowerError;

pub trait KernelSchedule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this schedule is willing to lower `task` at all. Checked
    /// before `implement_cuda` so the registry can try the next schedule
    /// on a flat "no" instead of unwinding an error.
    fn applies_to(&self, task: &Task) -> bool;

    fn implement_cuda(&self, task: &Task, ctx: &PassContext) -> Result<IRModule, LowerError>;
}

fn infer_scalar_type(expr: &ScalarExpr) -> ScalarType {
    match expr {
        ScalarExpr::Var(v) => match &v.ty {
            Type::Scalar(s) => *s,
            _ => ScalarType::Float32,
        },
        ScalarExpr::Const(_, ty) => *ty,
        ScalarExpr::Unary { expr, .. } => infer_scalar_type(expr),
        ScalarExpr::Binary { a, .. } => infer_scalar_type(a),
        ScalarExpr::IfThenElse { then_expr, .. } => infer_scalar_type(then_expr),
        ScalarExpr::TensorElement { base, .. } => match base.as_ref() {
            TensorNode::Input { dtype, .. } => *dtype,
            TensorNode::Compute(gc) => infer_scalar_type(&gc.value),
        },
        ScalarExpr::ScalarInput(node) => match node.as_ref() {
            ScalarNode::Input { dtype, .. } => *dtype,
            ScalarNode::Compute(rc) => infer_scalar_type(&rc.value),
        },
    }
}

fn contains_scalar_input(expr: &ScalarExpr) -> bool {
    match expr {
        ScalarExpr::Var(_) | ScalarExpr::Const(..) => false,
        ScalarExpr::Unary { expr, .. } => contains_scalar_input(expr),
        ScalarExpr::Binary { a, b, .. } => contains_scalar_input(a) || contains_scalar_input(b),
        ScalarExpr::IfThenElse { cond, then_expr, else_expr } => {
            contains_scalar_input(cond) || contains_scalar_input(then_expr) || contains_scalar_input(else_expr)
        }
        ScalarExpr::TensorElement { indices, .. } => indices.iter().any(contains_scalar_input),
        ScalarExpr::ScalarInput(_) => true,
    }
}

/// One buffer-backed IR variable per task parameter, typed as a
/// `TensorPointer` into global memory -- codegen resolves the concrete
/// strides/flat-offset arithmetic later, this layer only names the
/// buffers and their logical shape.
fn param_var(node: &TensorNode, index: usize) -> Arc<Var> {
    let dtype = match node {
        TensorNode::Input { dtype, .. } => *dtype,
        TensorNode::Compute(gc) => infer_scalar_type(&gc.value),
    };
    let name = match node {
        TensorNode::Input { name, .. } => name.clone(),
        TensorNode::Compute(_) => format!("buf{index}"),
    };
    Arc::new(Var::new(
        name,
        Type::TensorPointer { scalar: dtype, shape: node.shape().to_vec(), scope: MemoryScope::Global, layout: Layout::row_major() },
    ))
}

/// Mirrors `IRModule::entry_name`'s `tgc_<task.name>` convention
/// without needing a throwaway `IRModule` just to read it back.
fn entry_name(task: &Task) -> String {
    format!("tgc_{}", task.name)
}

fn param_map(task: &Task) -> HashMap<NodeKey, Arc<Var>> {
    task.parameters.iter().enumerate().map(|(i, node)| (NodeKey::from(node), param_var(node, i))).collect()
}

fn dim_expr_to_expr(d: &DimExpr) -> Expr {
    match d {
        DimExpr::Const(n) => Expr::int(*n as i64, ScalarType::Int32),
        DimExpr::Sym(name) => Expr::Var(Arc::new(Var::new(name.clone(), Type::Scalar(ScalarType::Int32)))),
    }
}

fn lower_scalar_expr(expr: &ScalarExpr, params: &HashMap<NodeKey, Arc<Var>>, schedule: &'static str) -> Result<Expr, LowerError> {
    match expr {
        ScalarExpr::Var(v) => Ok(Expr::Var(v.clone())),
        ScalarExpr::Const(value, ty) => Ok(Expr::Constant { value: *value, ty: *ty }),
        ScalarExpr::Unary { op, expr } => Ok(Expr::Unary { op: *op, expr: Box::new(lower_scalar_expr(expr, params, schedule)?) }),
        ScalarExpr::Binary { op, a, b } => Ok(Expr::Binary {
            op: *op,
            a: Box::new(lower_scalar_expr(a, params, schedule)?),
            b: Box::new(lower_scalar_expr(b, params, schedule)?),
        }),
        ScalarExpr::IfThenElse { cond, then_expr, else_expr } => Ok(Expr::IfThenElse {
            cond: Box::new(lower_scalar_expr(cond, params, schedule)?),
            then_expr: Box::new(lower_scalar_expr(then_expr, params, schedule)?),
            else_expr: Box::new(lower_scalar_expr(else_expr, params, schedule)?),
        }),
        ScalarExpr::TensorElement { base, indices } => {
            let param = params.get(&NodeKey::from(base)).cloned().ok_or_else(|| LowerError::PassFailed {
                pass: schedule,
                reason: "tensor element referenced a node with no backing task parameter".into(),
            })?;
            let indices =
                indices.iter().map(|i| lower_scalar_expr(i, params, schedule)).collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::TensorElement { base: Box::new(Expr::Var(param)), indices })
        }
        ScalarExpr::ScalarInput(_) => {
            Err(LowerError::PassFailed { pass: schedule, reason: "reduction is not supported by this schedule".into() })
        }
    }
}

/// Recursively replaces every `TensorElement` read of a prologue carrier
/// with that carrier's fused formula, substituting the carrier's own axis
/// variables by the read's index expressions. Fusion (§4.2) only records
/// the substitution in `task.prologues`; this is the step that actually
/// applies it, run just before a schedule lowers a task's compute formula.
fn inline_prologues(expr: &Arc<ScalarExpr>, task: &Task) -> Arc<ScalarExpr> {
    match &**expr {
        ScalarExpr::TensorElement { base, indices } => {
            let indices: Vec<Arc<ScalarExpr>> = indices.iter().map(|i| inline_prologues(i, task)).collect();
            match task.prologues.get(&NodeKey::from(base)) {
                Some(prologue) => substitute_vars(&inline_prologues(&prologue.value, task), &prologue.indices, &indices),
                None => Arc::new(ScalarExpr::TensorElement { base: base.clone(), indices }),
            }
        }
        ScalarExpr::Unary { op, expr: e } => Arc::new(ScalarExpr::Unary { op: *op, expr: inline_prologues(e, task) }),
        ScalarExpr::Binary { op, a, b } => {
            Arc::new(ScalarExpr::Binary { op: *op, a: inline_prologues(a, task), b: inline_prologues(b, task) })
        }
        ScalarExpr::IfThenElse { cond, then_expr, else_expr } => Arc::new(ScalarExpr::IfThenElse {
            cond: inline_prologues(cond, task),
            then_expr: inline_prologues(then_expr, task),
            else_expr: inline_prologues(else_expr, task),
        }),
        ScalarExpr::Var(_) | ScalarExpr::Const(_, _) | ScalarExpr::ScalarInput(_) => expr.clone(),
    }
}

/// Substitutes each of `axes[i]` by `values[i]` throughout `expr` --
/// reconciles a prologue/epilogue carrier's own axis variables with the
/// index expressions of the read site it's spliced into.
fn substitute_vars(expr: &Arc<ScalarExpr>, axes: &[Arc<Var>], values: &[Arc<ScalarExpr>]) -> Arc<ScalarExpr> {
    match &**expr {
        ScalarExpr::Var(v) => match axes.iter().position(|a| Arc::ptr_eq(a, v)) {
            Some(pos) => values[pos].clone(),
            None => expr.clone(),
        },
        ScalarExpr::Const(_, _) | ScalarExpr::ScalarInput(_) => expr.clone(),
        ScalarExpr::Unary { op, expr: e } => Arc::new(ScalarExpr::Unary { op: *op, expr: substitute_vars(e, axes, values) }),
        ScalarExpr::Binary { op, a, b } => {
            Arc::new(ScalarExpr::Binary { op: *op, a: substitute_vars(a, axes, values), b: substitute_vars(b, axes, values) })
        }
        ScalarExpr::IfThenElse { cond, then_expr, else_expr } => Arc::new(ScalarExpr::IfThenElse {
            cond: substitute_vars(cond, axes, values),
            then_expr: substitute_vars(then_expr, axes, values),
            else_expr: substitute_vars(else_expr, axes, values),
        }),
        ScalarExpr::TensorElement { base, indices } => {
            Arc::new(ScalarExpr::TensorElement { base: base.clone(), indices: indices.iter().map(|i| substitute_vars(i, axes, values)).collect() })
        }
    }
}

/// Substitutes every occurrence of `target` in the lowered IR expression
/// `expr` by `replacement`. Used to splice an already-lowered base value
/// in for an `Epilogue::orig_value` placeholder.
fn substitute_expr_var(expr: &Expr, target: &Arc<Var>, replacement: &Expr) -> Expr {
    match expr {
        Expr::Var(v) if Arc::ptr_eq(v, target) => replacement.clone(),
        Expr::Var(_) | Expr::Constant { .. } => expr.clone(),
        Expr::Cast { expr: e, target: ty } => Expr::Cast { expr: Box::new(substitute_expr_var(e, target, replacement)), target: *ty },
        Expr::Unary { op, expr: e } => Expr::Unary { op: *op, expr: Box::new(substitute_expr_var(e, target, replacement)) },
        Expr::Binary { op, a, b } => Expr::Binary {
            op: *op,
            a: Box::new(substitute_expr_var(a, target, replacement)),
            b: Box::new(substitute_expr_var(b, target, replacement)),
        },
        Expr::Call { func, args } => {
            Expr::Call { func: func.clone(), args: args.iter().map(|a| substitute_expr_var(a, target, replacement)).collect() }
        }
        Expr::TensorElement { base, indices } => Expr::TensorElement {
            base: Box::new(substitute_expr_var(base, target, replacement)),
            indices: indices.iter().map(|i| substitute_expr_var(i, target, replacement)).collect(),
        },
        Expr::TensorSlice { base, starts, extents } => Expr::TensorSlice {
            base: Box::new(substitute_expr_var(base, target, replacement)),
            starts: starts.iter().map(|i| substitute_expr_var(i, target, replacement)).collect(),
            extents: extents.iter().map(|i| substitute_expr_var(i, target, replacement)).collect(),
        },
        Expr::IfThenElse { cond, then_expr, else_expr } => Expr::IfThenElse {
            cond: Box::new(substitute_expr_var(cond, target, replacement)),
            then_expr: Box::new(substitute_expr_var(then_expr, target, replacement)),
            else_expr: Box::new(substitute_expr_var(else_expr, target, replacement)),
        },
        Expr::Let { var, value, body } => Expr::Let {
            var: var.clone(),
            value: Box::new(substitute_expr_var(value, target, replacement)),
            body: Box::new(substitute_expr_var(body, target, replacement)),
        },
        Expr::Address { expr: e } => Expr::Address { expr: Box::new(substitute_expr_var(e, target, replacement)) },
        Expr::Dereference { expr: e } => Expr::Dereference { expr: Box::new(substitute_expr_var(e, target, replacement)) },
        Expr::Reference { expr: e } => Expr::Reference { expr: Box::new(substitute_expr_var(e, target, replacement)) },
    }
}

/// If `task`'s output carries an `Epilogue`, lowers its formula and
/// splices it in place of `base_value` (substituting `orig_value`),
/// returning the value and indices to store instead of the plain base
/// value at `axes`. A no-op when the output has no epilogue.
fn apply_epilogue(
    base_value: Expr,
    axes: &[Arc<Var>],
    task: &Task,
    out_node: &Arc<TensorNode>,
    params: &HashMap<NodeKey, Arc<Var>>,
    schedule: &'static str,
) -> Result<(Expr, Vec<Expr>), LowerError> {
    let default_indices: Vec<Expr> = axes.iter().map(|v| Expr::Var(v.clone())).collect();
    let Some(epilogue) = task.epilogues.get(&NodeKey::from(out_node)) else {
        return Ok((base_value, default_indices));
    };

    let inlined = inline_prologues(&epilogue.value, task);
    let lowered = lower_scalar_expr(&inlined, params, schedule)?;
    let spliced = substitute_expr_var(&lowered, &epilogue.orig_value, &base_value);

    let store_indices = if epilogue.out_indices.is_empty() {
        default_indices
    } else {
        epilogue.out_indices.iter().map(|i| lower_scalar_expr(i, params, schedule)).collect::<Result<Vec<_>, _>>()?
    };
    Ok((spliced, store_indices))
}

fn nest_for_loops(axes: &[Arc<Var>], shape: &[DimExpr], body: Stmt) -> Stmt {
    axes.iter().zip(shape).rev().fold(body, |acc, (var, dim)| Stmt::For {
        var: var.clone(),
        extent: dim_expr_to_expr(dim),
        unroll: None,
        body: Box::new(acc),
    })
}

/// One thread -- conceptually one loop iteration at this layer, before
/// codegen maps the outer axis onto a CUDA grid/block index -- per
/// output element, for tasks whose output formula contains no reduction.
pub struct ElementwiseSchedule;

impl KernelSchedule for ElementwiseSchedule {
    fn name(&self) -> &'static str {
        "elementwise"
    }

    fn applies_to(&self, task: &Task) -> bool {
        let Some(TensorNode::Compute(gc)) = task.outputs().first().map(Arc::as_ref) else { return false };
        task.outputs().len() == 1 && !contains_scalar_input(&gc.value)
    }

    fn implement_cuda(&self, task: &Task, _ctx: &PassContext) -> Result<IRModule, LowerError> {
        let TensorNode::Compute(gc) = task.outputs()[0].as_ref() else {
            return Err(LowerError::ScheduleDeclined { schedule: self.name(), task: task.name.clone(), reason: "output is not a computed grid".into() });
        };
        let params = param_map(task);
        let out_var = params.get(&NodeKey::from(&task.outputs()[0])).cloned().ok_or_else(|| LowerError::PassFailed {
            pass: self.name(),
            reason: "output node missing from its own task's parameter list".into(),
        })?;
        let inlined = inline_prologues(&gc.value, task);
        let value = lower_scalar_expr(&inlined, &params, self.name())?;
        let (value, indices) = apply_epilogue(value, &gc.axes, task, &task.outputs()[0], &params, self.name())?;
        let store = Stmt::BufferStore { buf: Expr::Var(out_var), indices, value };
        let body = nest_for_loops(&gc.axes, &gc.shape, store);

        let mut function = Function::new(entry_name(task), FunctionKind::CudaKernel, Type::Void);
        function.params = task.parameters.iter().enumerate().map(|(i, n)| (*param_var(n, i)).clone()).collect();
        function.body = body;
        Ok(IRModule { task: task.clone(), functions: vec![function] })
    }
}

fn reduce_identity(kind: ReduceKind, dtype: ScalarType) -> Expr {
    match kind {
        ReduceKind::Sum | ReduceKind::Avg => zero_of(dtype),
        ReduceKind::Max => extreme_of(dtype, false),
        ReduceKind::Min => extreme_of(dtype, true),
    }
}

fn zero_of(dtype: ScalarType) -> Expr {
    if dtype.is_float() { Expr::float(0.0, dtype) } else { Expr::int(0, dtype) }
}

fn extreme_of(dtype: ScalarType, most_negative: bool) -> Expr {
    let sign = if most_negative { -1.0 } else { 1.0 };
    if dtype.is_float() {
        return Expr::Constant { value: ConstantValue::Float(sign * f64::MAX), ty: dtype };
    }
    let bound = if most_negative { i64::MIN } else { i64::MAX };
    Expr::Constant { value: ConstantValue::Int(bound), ty: dtype }
}

fn reduce_combine(kind: ReduceKind, acc: Arc<Var>, value: Expr) -> Expr {
    match kind {
        ReduceKind::Sum | ReduceKind::Avg => Expr::Binary { op: BinaryOp::Add, a: Box::new(Expr::Var(acc)), b: Box::new(value) },
        ReduceKind::Max => Expr::IfThenElse {
            cond: Box::new(Expr::Binary { op: BinaryOp::Less, a: Box::new(Expr::Var(acc.clone())), b: Box::new(value.clone()) }),
            then_expr: Box::new(value),
            else_expr: Box::new(Expr::Var(acc)),
        },
        ReduceKind::Min => Expr::IfThenElse {
            cond: Box::new(Expr::Binary { op: BinaryOp::Less, a: Box::new(value.clone()), b: Box::new(Expr::Var(acc.clone())) }),
            then_expr: Box::new(value),
            else_expr: Box::new(Expr::Var(acc)),
        },
    }
}

/// A single shared-memory-free accumulator loop per output element, for
/// a task whose entire output formula is one reduction with no
/// surrounding elementwise wrapper (the shape `ops::reduce_sum`/
/// `ops::reduce_mean`, and fused matmul, produce). Fused prologues on the
/// reduction's own inputs and an epilogue on its output are both inlined
/// the same way `ElementwiseSchedule` inlines them.
pub struct ReductionSchedule;

impl KernelSchedule for ReductionSchedule {
    fn name(&self) -> &'static str {
        "reduction"
    }

    fn applies_to(&self, task: &Task) -> bool {
        let Some(TensorNode::Compute(gc)) = task.outputs().first().map(Arc::as_ref) else { return false };
        task.outputs().len() == 1 && matches!(gc.value.as_ref(), ScalarExpr::ScalarInput(node) if matches!(node.as_ref(), ScalarNode::Compute(_)))
    }

    fn implement_cuda(&self, task: &Task, _ctx: &PassContext) -> Result<IRModule, LowerError> {
        let TensorNode::Compute(gc) = task.outputs()[0].as_ref() else {
            return Err(LowerError::ScheduleDeclined { schedule: self.name(), task: task.name.clone(), reason: "output is not a computed grid".into() });
        };
        let ScalarExpr::ScalarInput(scalar_node) = gc.value.as_ref() else {
            return Err(LowerError::ScheduleDeclined { schedule: self.name(), task: task.name.clone(), reason: "output is not a bare reduction".into() });
        };
        let ScalarNode::Compute(rc) = scalar_node.as_ref() else {
            return Err(LowerError::ScheduleDeclined { schedule: self.name(), task: task.name.clone(), reason: "scalar input is not a reduction".into() });
        };

        let params = param_map(task);
        let out_var = params.get(&NodeKey::from(&task.outputs()[0])).cloned().ok_or_else(|| LowerError::PassFailed {
            pass: self.name(),
            reason: "output node missing from its own task's parameter list".into(),
        })?;
        let dtype = infer_scalar_type(&rc.value);
        let acc = Arc::new(Var::new("acc", Type::Scalar(dtype)));

        let inlined = inline_prologues(&rc.value, task);
        let element = lower_scalar_expr(&inlined, &params, self.name())?;
        let accumulate = Stmt::Assign { var: acc.clone(), value: reduce_combine(rc.kind, acc.clone(), element) };
        let inner_loop = nest_for_loops(&rc.axes, &rc.shape, accumulate);

        let mut steps = vec![Stmt::Assign { var: acc.clone(), value: reduce_identity(rc.kind, dtype) }, inner_loop];
        if matches!(rc.kind, ReduceKind::Avg) {
            let count: u64 = rc.shape.iter().map(|d| if let DimExpr::Const(n) = d { *n } else { 1 }).product::<u64>().max(1);
            steps.push(Stmt::Assign {
                var: acc.clone(),
                value: Expr::Binary { op: BinaryOp::Div, a: Box::new(Expr::Var(acc.clone())), b: Box::new(Expr::int(count as i64, dtype)) },
            });
        }
        let (final_value, store_indices) = apply_epilogue(Expr::Var(acc.clone()), &gc.axes, task, &task.outputs()[0], &params, self.name())?;
        steps.push(Stmt::BufferStore { buf: Expr::Var(out_var), indices: store_indices, value: final_value });
        let per_element = Stmt::Seq(steps);
        let body = nest_for_loops(&gc.axes, &gc.shape, per_element);

        let mut function = Function::new(entry_name(task), FunctionKind::CudaKernel, Type::Void);
        function.params = task.parameters.iter().enumerate().map(|(i, n)| (*param_var(n, i)).clone()).collect();
        function.local_vars = vec![(*acc).clone()];
        function.body = body;
        Ok(IRModule { task: task.clone(), functions: vec![function] })
    }
}

/// An ordered list of schedules tried in turn; the first one whose
/// `applies_to` accepts the task lowers it.
pub struct ScheduleRegistry {
    schedules: Vec<Box<dyn KernelSchedule>>,
}

impl ScheduleRegistry {
    pub fn new() -> Self {
        ScheduleRegistry { schedules: Vec::new() }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ElementwiseSchedule));
        registry.register(Box::new(ReductionSchedule));
        registry
    }

    pub fn register(&mut self, schedule: Box<dyn KernelSchedule>) {
        self.schedules.push(schedule);
    }

    pub fn implement_cuda(&self, task: &Task, ctx: &PassContext) -> Result<IRModule, LowerError> {
        let tried: Vec<&'static str> = self.schedules.iter().map(|s| s.name()).collect();
        for schedule in &self.schedules {
            if schedule.applies_to(task) {
                return schedule.implement_cuda(task, ctx);
            }
        }
        Err(LowerError::NoSchedule { task: task.name.clone(), tried: tried.join(", ") })
    }
}

impl Default for ScheduleRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgc_core::ops;
    use tgc_core::{DimExpr as Dim, ScalarType as ST};

    #[test]
    fn elementwise_schedule_lowers_relu_task() {
        let x = tgc_core::graph::Tensor::graph_input(ST::Float32, vec![Dim::Const(8)], tgc_core::graph::Device::Cpu);
        let op = ops::relu(x);
        let registry = ScheduleRegistry::with_defaults();
        let ctx = PassContext::default();
        let module = registry.implement_cuda(&op.task, &ctx).unwrap();
        assert_eq!(module.functions.len(), 1);
        assert!(matches!(module.functions[0].body, Stmt::For { .. }));
        assert_eq!(module.entry_name(), module.functions[0].name);
    }

    #[test]
    fn reduction_schedule_lowers_reduce_sum_task() {
        let x = tgc_core::graph::Tensor::graph_input(ST::Float32, vec![Dim::Const(4), Dim::Const(8)], tgc_core::graph::Device::Cpu);
        let op = ops::reduce_sum(x, 1).unwrap();
        let registry = ScheduleRegistry::with_defaults();
        let ctx = PassContext::default();
        let module = registry.implement_cuda(&op.task, &ctx).unwrap();
        assert_eq!(module.functions.len(), 1);
        let Stmt::For { body, .. } = &module.functions[0].body else { panic!("expected an outer loop over output axes") };
        assert!(matches!(body.as_ref(), Stmt::Seq(_)), "per-element body should init/accumulate/store");
    }

    #[test]
    fn elementwise_schedule_inlines_a_fused_prologue() {
        use tgc_core::graph::{Device, Tensor};
        use tgc_passes::fuse_prologue_pass;

        let x = Tensor::graph_input(ST::Float32, vec![Dim::Const(8)], Device::Cpu);
        let b = Tensor::graph_input(ST::Float32, vec![Dim::Const(8)], Device::Cpu);
        let add_op = ops::add(x, b).unwrap();
        let relu_op = ops::relu(add_op.outputs[0].clone());

        let graph = tgc_core::graph::FlowGraph::trace(vec![add_op.inputs[0].clone(), add_op.inputs[1].clone()], vec![relu_op.outputs[0].clone()]).unwrap();
        let ctx = PassContext::default();
        let fused = fuse_prologue_pass(&graph, &ctx).unwrap();
        assert_eq!(fused.nodes.len(), 1, "add should be absorbed into relu's prologue");
        let task = &fused.nodes[0].task;
        assert_eq!(task.parameters.len(), 3, "x, b, and the relu output -- the add's own output slot must be gone");

        let registry = ScheduleRegistry::with_defaults();
        let module = registry.implement_cuda(task, &ctx).unwrap();
        let Stmt::For { body, .. } = &module.functions[0].body else { panic!("expected an outer loop over output axes") };
        let Stmt::BufferStore { value, .. } = body.as_ref() else { panic!("expected a direct store, no intermediate add buffer") };
        let Expr::IfThenElse { cond, .. } = value else { panic!("relu(x + b) should lower straight to a select on (x + b), no intermediate add buffer") };
        assert!(matches!(cond.as_ref(), Expr::Binary { op: BinaryOp::Less, a, .. } if matches!(a.as_ref(), Expr::Binary { op: BinaryOp::Add, .. })));
    }

    #[test]
    fn reduction_schedule_applies_a_fused_epilogue() {
        use tgc_core::graph::{Device, Tensor};
        use tgc_passes::fuse_epilogue_pass;

        let a = Tensor::graph_input(ST::Float32, vec![Dim::Const(2), Dim::Const(3)], Device::Cpu);
        let b = Tensor::graph_input(ST::Float32, vec![Dim::Const(3), Dim::Const(4)], Device::Cpu);
        let matmul_op = ops::matmul(a, b).unwrap();
        let relu_op = ops::relu(matmul_op.outputs[0].clone());

        let graph = tgc_core::graph::FlowGraph::trace(vec![matmul_op.inputs[0].clone(), matmul_op.inputs[1].clone()], vec![relu_op.outputs[0].clone()]).unwrap();
        let ctx = PassContext::default();
        let fused = fuse_epilogue_pass(&graph, &ctx).unwrap();
        assert_eq!(fused.nodes.len(), 1, "relu should be absorbed into matmul's epilogue");
        let task = &fused.nodes[0].task;
        assert_eq!(task.parameters.len(), task.inputs().len() + task.outputs().len());

        let registry = ScheduleRegistry::with_defaults();
        let module = registry.implement_cuda(task, &ctx).unwrap();
        let Stmt::For { body, .. } = &module.functions[0].body else { panic!("expected an outer loop over output axes") };
        let Stmt::Seq(steps) = body.as_ref() else { panic!("expected init/accumulate/store per output element") };
        let store = steps.last().expect("accumulator body should end in a store");
        let Stmt::BufferStore { value, .. } = store else { panic!("expected the last step to be a buffer store") };
        assert!(matches!(value, Expr::IfThenElse { .. }), "the stored value should be max(acc, 0), not the bare accumulator");
    }

    #[test]
    fn registry_reports_every_schedule_it_tried() {
        let task = Task::new("opaque", Vec::new(), 0);
        let registry = ScheduleRegistry::with_defaults();
        let ctx = PassContext::default();
        let err = registry.implement_cuda(&task, &ctx).unwrap_err();
        match err {
            LowerError::NoSchedule { tried, .. } => {
                assert!(tried.contains("elementwise"));
                assert!(tried.contains("reduction"));
            }
            other => panic!("expected NoSchedule, got {other:?}"),
        }
    }
}
