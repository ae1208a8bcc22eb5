//! Explicit-cast insertion (the one fully-specified, required lowering
//! pass): a post-order rewrite that inserts explicit `Cast` nodes
//! wherever the low-level IR currently relies on an implicit conversion
//! -- the two arithmetic operands of a promoting `BinaryOp`, and the
//! value side of an `Assign`/`BufferStore` whose destination type differs
//! from the value's inferred type.
//!
//! A `convert`-then-recurse shape: each expression/statement visitor
//! inserts a cast around a mismatched operand rather than rewriting the
//! type system itself -- this crate only needs `ScalarType` equality,
//! which `PartialEq` already gives for free.

use tgc_core::expr::{BinaryOp, Expr, Var};
use tgc_core::function::{Function, IRModule};
use tgc_core::stmt::Stmt;
use tgc_core::types::{ScalarType, Type};

use crate::error::LowerError;

/// Best-effort scalar type underlying a low-level IR type: unwraps
/// `Pointer`/`Reference` to their base, and reads the element type off
/// `Tensor`/`TensorPointer`. Mirrors the original's `visit_PointerType`/
/// `visit_TensorPointerType`/`visit_TensorType` dispatch, collapsed into
/// one recursive function since this crate has no separate `TypeChecker`
/// to dispatch through.
fn scalar_of_type(ty: &Type) -> ScalarType {
    match ty {
        Type::Scalar(s) => *s,
        Type::Tensor { scalar, .. } => *scalar,
        Type::TensorPointer { scalar, .. } => *scalar,
        Type::Pointer(inner) | Type::Reference(inner) => scalar_of_type(inner),
        Type::Void => ScalarType::Bool,
    }
}

/// Full (non-scalar-collapsed) type of an expression, needed to resolve
/// a `BufferStore`'s destination type from its `buf` expression the way
/// the original's `visit_BufferStoreStmt` does.
fn expr_type(expr: &Expr) -> Type {
    match expr {
        Expr::Var(v) => v.ty.clone(),
        Expr::Constant { ty, .. } => Type::Scalar(*ty),
        Expr::Cast { target, .. } => Type::Scalar(*target),
        Expr::Unary { expr, .. } => expr_type(expr),
        Expr::Binary { a, .. } => expr_type(a),
        // No function-signature table exists at this layer; external
        // calls are assumed to already return the caller's expected type.
        Expr::Call { .. } => Type::Scalar(ScalarType::Float32),
        Expr::TensorElement { base, .. } => Type::Scalar(scalar_of_type(&expr_type(base))),
        Expr::TensorSlice { base, .. } => expr_type(base),
        Expr::IfThenElse { then_expr, .. } => expr_type(then_expr),
        Expr::Let { body, .. } => expr_type(body),
        Expr::Address { expr } => Type::Pointer(Box::new(expr_type(expr))),
        Expr::Dereference { expr } => match expr_type(expr) {
            Type::Pointer(inner) | Type::Reference(inner) => *inner,
            other => other,
        },
        Expr::Reference { expr } => Type::Reference(Box::new(expr_type(expr))),
    }
}

fn expr_scalar_type(expr: &Expr) -> ScalarType {
    scalar_of_type(&expr_type(expr))
}

/// Converts `value` (of `source` type) to `target`, bridging through
/// `Float32` for the one pair (`Float16`/`BFloat16`) with no native
/// implicit conversion, and dropping the cast entirely when the two
/// types already match.
fn convert(value: Expr, source: ScalarType, target: ScalarType) -> Expr {
    if ScalarType::needs_bridge(source, target) {
        return Expr::Cast { expr: Box::new(Expr::Cast { expr: Box::new(value), target: ScalarType::Float32 }), target };
    }
    if source == target {
        return value;
    }
    Expr::Cast { expr: Box::new(value), target }
}

fn rewrite_expr(expr: Expr) -> Expr {
    match expr {
        Expr::Var(_) | Expr::Constant { .. } => expr,
        Expr::Cast { expr, target } => {
            let inner = rewrite_expr(*expr);
            let source = expr_scalar_type(&inner);
            convert(inner, source, target)
        }
        Expr::Unary { op, expr } => Expr::Unary { op, expr: Box::new(rewrite_expr(*expr)) },
        Expr::Binary { op, a, b } => {
            let a = rewrite_expr(*a);
            let b = rewrite_expr(*b);
            if !op.promotes_operands() {
                return Expr::Binary { op, a: Box::new(a), b: Box::new(b) };
            }
            let a_ty = expr_scalar_type(&a);
            let b_ty = expr_scalar_type(&b);
            if ScalarType::needs_bridge(a_ty, b_ty) {
                let a = convert(a, a_ty, ScalarType::Float32);
                let b = convert(b, b_ty, ScalarType::Float32);
                Expr::Binary { op, a: Box::new(a), b: Box::new(b) }
            } else if a_ty.rank() > b_ty.rank() {
                Expr::Binary { op, a: Box::new(a), b: Box::new(Expr::Cast { expr: Box::new(b), target: a_ty }) }
            } else if b_ty.rank() > a_ty.rank() {
                Expr::Binary { op, a: Box::new(Expr::Cast { expr: Box::new(a), target: b_ty }), b: Box::new(b) }
            } else {
                Expr::Binary { op, a: Box::new(a), b: Box::new(b) }
            }
        }
        Expr::Call { func, args } => Expr::Call { func, args: args.into_iter().map(rewrite_expr).collect() },
        Expr::TensorElement { base, indices } => Expr::TensorElement {
            base: Box::new(rewrite_expr(*base)),
            indices: indices.into_iter().map(rewrite_expr).collect(),
        },
        Expr::TensorSlice { base, starts, extents } => Expr::TensorSlice {
            base: Box::new(rewrite_expr(*base)),
            starts: starts.into_iter().map(rewrite_expr).collect(),
            extents: extents.into_iter().map(rewrite_expr).collect(),
        },
        Expr::IfThenElse { cond, then_expr, else_expr } => Expr::IfThenElse {
            cond: Box::new(rewrite_expr(*cond)),
            then_expr: Box::new(rewrite_expr(*then_expr)),
            else_expr: Box::new(rewrite_expr(*else_expr)),
        },
        Expr::Let { var, value, body } => {
            Expr::Let { var, value: Box::new(rewrite_expr(*value)), body: Box::new(rewrite_expr(*body)) }
        }
        Expr::Address { expr } => Expr::Address { expr: Box::new(rewrite_expr(*expr)) },
        Expr::Dereference { expr } => Expr::Dereference { expr: Box::new(rewrite_expr(*expr)) },
        Expr::Reference { expr } => Expr::Reference { expr: Box::new(rewrite_expr(*expr)) },
    }
}

fn rewrite_stmt(stmt: Stmt) -> Stmt {
    match stmt {
        Stmt::Assign { var, value } => {
            let value = rewrite_expr(value);
            let source = expr_scalar_type(&value);
            let target = scalar_of_type(&var.ty);
            Stmt::Assign { var, value: convert(value, source, target) }
        }
        Stmt::BufferStore { buf, indices, value } => {
            let buf = rewrite_expr(buf);
            let indices = indices.into_iter().map(rewrite_expr).collect();
            let value = rewrite_expr(value);
            let source = expr_scalar_type(&value);
            let target = scalar_of_type(&expr_type(&buf));
            Stmt::BufferStore { buf, indices, value: convert(value, source, target) }
        }
        Stmt::Evaluate { expr } => Stmt::Evaluate { expr: rewrite_expr(expr) },
        Stmt::Seq(stmts) => Stmt::Seq(stmts.into_iter().map(rewrite_stmt).collect()),
        Stmt::If { cond, then_branch, else_branch } => Stmt::If {
            cond: rewrite_expr(cond),
            then_branch: Box::new(rewrite_stmt(*then_branch)),
            else_branch: else_branch.map(|b| Box::new(rewrite_stmt(*b))),
        },
        Stmt::For { var, extent, unroll, body } => {
            Stmt::For { var, extent: rewrite_expr(extent), unroll, body: Box::new(rewrite_stmt(*body)) }
        }
        Stmt::Let { var, value, body } => Stmt::Let { var, value: rewrite_expr(value), body: Box::new(rewrite_stmt(*body)) },
        Stmt::Return { value } => Stmt::Return { value: value.map(rewrite_expr) },
        Stmt::Assert { cond, message } => Stmt::Assert { cond: rewrite_expr(cond), message },
        Stmt::Asm { template, holes } => Stmt::Asm { template, holes: holes.into_iter().map(rewrite_expr).collect() },
        Stmt::BlackBox { template, holes } => {
            Stmt::BlackBox { template, holes: holes.into_iter().map(rewrite_expr).collect() }
        }
    }
}

fn rewrite_function(function: &Function) -> Function {
    let mut out = function.clone();
    out.body = rewrite_stmt(function.body.clone());
    out
}

/// Runs the pass over every function in `module`.
pub fn add_explicit_cast_pass(module: &IRModule) -> Result<IRModule, LowerError> {
    let mut out = module.clone();
    out.functions = module.functions.iter().map(rewrite_function).collect();
    Ok(out)
}
