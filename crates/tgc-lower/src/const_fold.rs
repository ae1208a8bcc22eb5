//! Low-level constant folding: collapses a `Binary`/`Unary` expression
//! over `Constant` operands of matching type into a single `Constant`,
//! and a `Stmt::If`/`Expr::IfThenElse` with a constant boolean condition
//! into whichever branch it selects. Distinct from
//! `tgc_passes::fold_const`, which folds whole graph-level operators
//! ahead of lowering -- this one runs after lowering, on the low-level
//! `Expr`/`Stmt` tree a `KernelSchedule` produced.

use tgc_core::{BinaryOp, ConstantValue, Expr, Function, IRModule, ScalarType, Stmt, UnaryOp};

use crate::error::LowerError;

fn eval_unary(op: UnaryOp, value: ConstantValue) -> Option<ConstantValue> {
    use ConstantValue::*;
    match (op, value) {
        (UnaryOp::Neg, Int(v)) => Some(Int(-v)),
        (UnaryOp::Neg, Float(v)) => Some(Float(-v)),
        (UnaryOp::Not, Bool(v)) => Some(Bool(!v)),
        (UnaryOp::BitwiseNot, Int(v)) => Some(Int(!v)),
        (UnaryOp::BitwiseNot, UInt(v)) => Some(UInt(!v)),
        _ => None,
    }
}

fn eval_binary(op: BinaryOp, a: ConstantValue, b: ConstantValue) -> Option<ConstantValue> {
    use BinaryOp::*;
    use ConstantValue::*;
    match (a, b) {
        (Int(x), Int(y)) => match op {
            Add => Some(Int(x.wrapping_add(y))),
            Sub => Some(Int(x.wrapping_sub(y))),
            Multiply => Some(Int(x.wrapping_mul(y))),
            Div | FloorDiv => (y != 0).then(|| Int(x.div_euclid(y))),
            Mod => (y != 0).then(|| Int(x.rem_euclid(y))),
            BitwiseAnd => Some(Int(x & y)),
            BitwiseOr => Some(Int(x | y)),
            LeftShift => Some(Int(x.wrapping_shl(y as u32))),
            RightShift => Some(Int(x.wrapping_shr(y as u32))),
            Less => Some(Bool(x < y)),
            LessEqual => Some(Bool(x <= y)),
            Equal => Some(Bool(x == y)),
            And | Or => None,
        },
        (UInt(x), UInt(y)) => match op {
            Add => Some(UInt(x.wrapping_add(y))),
            Sub => Some(UInt(x.wrapping_sub(y))),
            Multiply => Some(UInt(x.wrapping_mul(y))),
            Div | FloorDiv => (y != 0).then(|| UInt(x / y)),
            Mod => (y != 0).then(|| UInt(x % y)),
            BitwiseAnd => Some(UInt(x & y)),
            BitwiseOr => Some(UInt(x | y)),
            LeftShift => Some(UInt(x.wrapping_shl(y as u32))),
            RightShift => Some(UInt(x.wrapping_shr(y as u32))),
            Less => Some(Bool(x < y)),
            LessEqual => Some(Bool(x <= y)),
            Equal => Some(Bool(x == y)),
            And | Or => None,
        },
        (Float(x), Float(y)) => match op {
            Add => Some(Float(x + y)),
            Sub => Some(Float(x - y)),
            Multiply => Some(Float(x * y)),
            Div => Some(Float(x / y)),
            FloorDiv => Some(Float((x / y).floor())),
            Mod => Some(Float(x % y)),
            Less => Some(Bool(x < y)),
            LessEqual => Some(Bool(x <= y)),
            Equal => Some(Bool(x == y)),
            BitwiseAnd | BitwiseOr | LeftShift | RightShift | And | Or => None,
        },
        (Bool(x), Bool(y)) => match op {
            And => Some(Bool(x && y)),
            Or => Some(Bool(x || y)),
            Equal => Some(Bool(x == y)),
            _ => None,
        },
        _ => None,
    }
}

fn fold_expr(expr: Expr) -> Expr {
    match expr {
        Expr::Unary { op, expr } => {
            let inner = fold_expr(*expr);
            if let Expr::Constant { value, ty } = &inner {
                if let Some(folded) = eval_unary(op, *value) {
                    return Expr::Constant { value: folded, ty: *ty };
                }
            }
            Expr::Unary { op, expr: Box::new(inner) }
        }
        Expr::Binary { op, a, b } => {
            let a = fold_expr(*a);
            let b = fold_expr(*b);
            if let (Expr::Constant { value: av, ty: at }, Expr::Constant { value: bv, ty: bt }) = (&a, &b) {
                if at == bt {
                    if let Some(folded) = eval_binary(op, *av, *bv) {
                        let result_ty = if matches!(folded, ConstantValue::Bool(_)) { ScalarType::Bool } else { *at };
                        return Expr::Constant { value: folded, ty: result_ty };
                    }
                }
            }
            Expr::Binary { op, a: Box::new(a), b: Box::new(b) }
        }
        Expr::Cast { expr, target } => Expr::Cast { expr: Box::new(fold_expr(*expr)), target },
        Expr::Call { func, args } => Expr::Call { func, args: args.into_iter().map(fold_expr).collect() },
        Expr::TensorElement { base, indices } => {
            Expr::TensorElement { base: Box::new(fold_expr(*base)), indices: indices.into_iter().map(fold_expr).collect() }
        }
        Expr::TensorSlice { base, starts, extents } => Expr::TensorSlice {
            base: Box::new(fold_expr(*base)),
            starts: starts.into_iter().map(fold_expr).collect(),
            extents: extents.into_iter().map(fold_expr).collect(),
        },
        Expr::IfThenElse { cond, then_expr, else_expr } => {
            let cond = fold_expr(*cond);
            let then_expr = fold_expr(*then_expr);
            let else_expr = fold_expr(*else_expr);
            if let Expr::Constant { value: ConstantValue::Bool(b), .. } = &cond {
                return if *b { then_expr } else { else_expr };
            }
            Expr::IfThenElse { cond: Box::new(cond), then_expr: Box::new(then_expr), else_expr: Box::new(else_expr) }
        }
        Expr::Let { var, value, body } => Expr::Let { var, value: Box::new(fold_expr(*value)), body: Box::new(fold_expr(*body)) },
        Expr::Address { expr } => Expr::Address { expr: Box::new(fold_expr(*expr)) },
        Expr::Dereference { expr } => Expr::Dereference { expr: Box::new(fold_expr(*expr)) },
        Expr::Reference { expr } => Expr::Reference { expr: Box::new(fold_expr(*expr)) },
        other @ (Expr::Var(_) | Expr::Constant { .. }) => other,
    }
}

fn fold_stmt(stmt: Stmt) -> Stmt {
    match stmt {
        Stmt::Assign { var, value } => Stmt::Assign { var, value: fold_expr(value) },
        Stmt::BufferStore { buf, indices, value } => Stmt::BufferStore {
            buf: fold_expr(buf),
            indices: indices.into_iter().map(fold_expr).collect(),
            value: fold_expr(value),
        },
        Stmt::Evaluate { expr } => Stmt::Evaluate { expr: fold_expr(expr) },
        Stmt::Seq(stmts) => Stmt::Seq(stmts.into_iter().map(fold_stmt).collect()),
        Stmt::If { cond, then_branch, else_branch } => {
            let cond = fold_expr(cond);
            let then_branch = fold_stmt(*then_branch);
            let else_branch = else_branch.map(|b| fold_stmt(*b));
            if let Expr::Constant { value: ConstantValue::Bool(b), .. } = &cond {
                return if *b { then_branch } else { else_branch.unwrap_or(Stmt::Seq(Vec::new())) };
            }
            Stmt::If { cond, then_branch: Box::new(then_branch), else_branch: else_branch.map(Box::new) }
        }
        Stmt::For { var, extent, unroll, body } => Stmt::For { var, extent: fold_expr(extent), unroll, body: Box::new(fold_stmt(*body)) },
        Stmt::Let { var, value, body } => Stmt::Let { var, value: fold_expr(value), body: Box::new(fold_stmt(*body)) },
        Stmt::Return { value } => Stmt::Return { value: value.map(fold_expr) },
        Stmt::Assert { cond, message } => Stmt::Assert { cond: fold_expr(cond), message },
        Stmt::Asm { template, holes } => Stmt::Asm { template, holes: holes.into_iter().map(fold_expr).collect() },
        Stmt::BlackBox { template, holes } => Stmt::BlackBox { template, holes: holes.into_iter().map(fold_expr).collect() },
    }
}

fn fold_function(function: &Function) -> Function {
    let mut out = function.clone();
    out.body = fold_stmt(function.body.clone());
    out
}

pub fn const_fold_pass(module: &IRModule) -> Result<IRModule, LowerError> {
    let mut out = module.clone();
    out.functions = module.functions.iter().map(fold_function).collect();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgc_core::function::FunctionKind;
    use tgc_core::task::Task;
    use tgc_core::types::Type;

    fn module_of(body: Stmt) -> IRModule {
        let mut m = IRModule::new(Task::new("t", Vec::new(), 0));
        let mut f = Function::new("k", FunctionKind::CudaKernel, Type::Void);
        f.body = body;
        m.functions.push(f);
        m
    }

    #[test]
    fn folds_constant_arithmetic() {
        let body = Stmt::Evaluate {
            expr: Expr::Binary {
                op: BinaryOp::Add,
                a: Box::new(Expr::int(2, ScalarType::Int32)),
                b: Box::new(Expr::int(3, ScalarType::Int32)),
            },
        };
        let out = const_fold_pass(&module_of(body)).unwrap();
        let Stmt::Evaluate { expr: Expr::Constant { value: ConstantValue::Int(5), .. } } = &out.functions[0].body else {
            panic!("expected a folded constant")
        };
    }

    #[test]
    fn collapses_if_with_constant_condition() {
        let body = Stmt::If {
            cond: Expr::Constant { value: ConstantValue::Bool(true), ty: ScalarType::Bool },
            then_branch: Box::new(Stmt::Return { value: Some(Expr::int(1, ScalarType::Int32)) }),
            else_branch: Some(Box::new(Stmt::Return { value: Some(Expr::int(2, ScalarType::Int32)) })),
        };
        let out = const_fold_pass(&module_of(body)).unwrap();
        assert!(matches!(&out.functions[0].body, Stmt::Return { value: Some(Expr::Constant { value: ConstantValue::Int(1), .. }) }));
    }

    #[test]
    fn leaves_non_constant_arithmetic_untouched() {
        let v = std::sync::Arc::new(tgc_core::Var::new("v", Type::Scalar(ScalarType::Int32)));
        let body = Stmt::Evaluate {
            expr: Expr::Binary { op: BinaryOp::Add, a: Box::new(Expr::Var(v)), b: Box::new(Expr::int(1, ScalarType::Int32)) },
        };
        let out = const_fold_pass(&module_of(body)).unwrap();
        assert!(matches!(&out.functions[0].body, Stmt::Evaluate { expr: Expr::Binary { .. } }));
    }
}
