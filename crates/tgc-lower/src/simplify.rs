//! Algebraic identity simplification: `x+0`, `x*1`, `x*0`, and
//! double-negation collapse. Runs after `const_fold` so it only needs to
//! recognize a literal `Constant` zero/one on one side of a `Binary`, not
//! fold arbitrary sub-expressions down to one first.

use tgc_core::{BinaryOp, ConstantValue, Expr, Function, IRModule, Stmt, UnaryOp};

use crate::error::LowerError;

fn is_zero(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Constant { value: ConstantValue::Int(0) | ConstantValue::UInt(0), .. }
    ) || matches!(expr, Expr::Constant { value: ConstantValue::Float(v), .. } if *v == 0.0)
}

fn is_one(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Constant { value: ConstantValue::Int(1) | ConstantValue::UInt(1), .. }
    ) || matches!(expr, Expr::Constant { value: ConstantValue::Float(v), .. } if *v == 1.0)
}

fn simplify_expr(expr: Expr) -> Expr {
    match expr {
        Expr::Unary { op, expr } => {
            let inner = simplify_expr(*expr);
            if let Expr::Unary { op: inner_op, expr: innermost } = &inner {
                let cancels = matches!(
                    (op, inner_op),
                    (UnaryOp::Neg, UnaryOp::Neg) | (UnaryOp::Not, UnaryOp::Not) | (UnaryOp::BitwiseNot, UnaryOp::BitwiseNot)
                );
                if cancels {
                    return (**innermost).clone();
                }
            }
            Expr::Unary { op, expr: Box::new(inner) }
        }
        Expr::Binary { op, a, b } => {
            let a = simplify_expr(*a);
            let b = simplify_expr(*b);
            match op {
                BinaryOp::Add if is_zero(&a) => b,
                BinaryOp::Add if is_zero(&b) => a,
                BinaryOp::Sub if is_zero(&b) => a,
                BinaryOp::Sub if is_zero(&a) => Expr::Unary { op: UnaryOp::Neg, expr: Box::new(b) },
                BinaryOp::Multiply if is_one(&a) => b,
                BinaryOp::Multiply if is_one(&b) => a,
                BinaryOp::Multiply if is_zero(&a) => a,
                BinaryOp::Multiply if is_zero(&b) => b,
                _ => Expr::Binary { op, a: Box::new(a), b: Box::new(b) },
            }
        }
        Expr::Cast { expr, target } => Expr::Cast { expr: Box::new(simplify_expr(*expr)), target },
        Expr::Call { func, args } => Expr::Call { func, args: args.into_iter().map(simplify_expr).collect() },
        Expr::TensorElement { base, indices } => {
            Expr::TensorElement { base: Box::new(simplify_expr(*base)), indices: indices.into_iter().map(simplify_expr).collect() }
        }
        Expr::TensorSlice { base, starts, extents } => Expr::TensorSlice {
            base: Box::new(simplify_expr(*base)),
            starts: starts.into_iter().map(simplify_expr).collect(),
            extents: extents.into_iter().map(simplify_expr).collect(),
        },
        Expr::IfThenElse { cond, then_expr, else_expr } => Expr::IfThenElse {
            cond: Box::new(simplify_expr(*cond)),
            then_expr: Box::new(simplify_expr(*then_expr)),
            else_expr: Box::new(simplify_expr(*else_expr)),
        },
        Expr::Let { var, value, body } => Expr::Let { var, value: Box::new(simplify_expr(*value)), body: Box::new(simplify_expr(*body)) },
        Expr::Address { expr } => Expr::Address { expr: Box::new(simplify_expr(*expr)) },
        Expr::Dereference { expr } => Expr::Dereference { expr: Box::new(simplify_expr(*expr)) },
        Expr::Reference { expr } => Expr::Reference { expr: Box::new(simplify_expr(*expr)) },
        other @ (Expr::Var(_) | Expr::Constant { .. }) => other,
    }
}

fn simplify_stmt(stmt: Stmt) -> Stmt {
    match stmt {
        Stmt::Assign { var, value } => Stmt::Assign { var, value: simplify_expr(value) },
        Stmt::BufferStore { buf, indices, value } => Stmt::BufferStore {
            buf: simplify_expr(buf),
            indices: indices.into_iter().map(simplify_expr).collect(),
            value: simplify_expr(value),
        },
        Stmt::Evaluate { expr } => Stmt::Evaluate { expr: simplify_expr(expr) },
        Stmt::Seq(stmts) => Stmt::Seq(stmts.into_iter().map(simplify_stmt).collect()),
        Stmt::If { cond, then_branch, else_branch } => Stmt::If {
            cond: simplify_expr(cond),
            then_branch: Box::new(simplify_stmt(*then_branch)),
            else_branch: else_branch.map(|b| Box::new(simplify_stmt(*b))),
        },
        Stmt::For { var, extent, unroll, body } => Stmt::For { var, extent: simplify_expr(extent), unroll, body: Box::new(simplify_stmt(*body)) },
        Stmt::Let { var, value, body } => Stmt::Let { var, value: simplify_expr(value), body: Box::new(simplify_stmt(*body)) },
        Stmt::Return { value } => Stmt::Return { value: value.map(simplify_expr) },
        Stmt::Assert { cond, message } => Stmt::Assert { cond: simplify_expr(cond), message },
        Stmt::Asm { template, holes } => Stmt::Asm { template, holes: holes.into_iter().map(simplify_expr).collect() },
        Stmt::BlackBox { template, holes } => Stmt::BlackBox { template, holes: holes.into_iter().map(simplify_expr).collect() },
    }
}

fn simplify_function(function: &Function) -> Function {
    let mut out = function.clone();
    out.body = simplify_stmt(function.body.clone());
    out
}

pub fn simplify_pass(module: &IRModule) -> Result<IRModule, LowerError> {
    let mut out = module.clone();
    out.functions = module.functions.iter().map(simplify_function).collect();
    Ok(out)
}
