//! Low-level IR expressions.
//!
//! A single closed `Expr` enum matched exhaustively by every pass and by
//! the codegen printer, following the "favor tagged unions" design note:
//! no visitor double-dispatch, just `match`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::{ScalarType, Type};

/// A named, typed value slot: a function parameter, local, extern var, or
/// a bound loop/let variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Var {
    pub name: String,
    pub ty: Type,
}

impl Var {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Var { name: name.into(), ty }
    }
}

/// Unary arithmetic/logic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
    BitwiseNot,
}

/// Binary arithmetic/logic/comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Multiply,
    Div,
    FloorDiv,
    Mod,
    And,
    Or,
    Less,
    LessEqual,
    Equal,
    BitwiseAnd,
    BitwiseOr,
    LeftShift,
    RightShift,
}

impl BinaryOp {
    /// Whether this operator participates in the cast-insertion pass's
    /// operand-promotion rule. Comparison/logic ops are excluded: their
    /// result type is `Bool` regardless of operand type, so promoting
    /// operands would be spurious work with no lowering benefit.
    pub fn promotes_operands(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Multiply | BinaryOp::Div
        )
    }
}

/// A low-level IR expression. Closed variant set, matched exhaustively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    Var(Arc<Var>),
    Constant { value: ConstantValue, ty: ScalarType },
    Cast { expr: Box<Expr>, target: ScalarType },
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary { op: BinaryOp, a: Box<Expr>, b: Box<Expr> },
    Call { func: String, args: Vec<Expr> },
    TensorElement { base: Box<Expr>, indices: Vec<Expr> },
    TensorSlice { base: Box<Expr>, starts: Vec<Expr>, extents: Vec<Expr> },
    IfThenElse { cond: Box<Expr>, then_expr: Box<Expr>, else_expr: Box<Expr> },
    Let { var: Arc<Var>, value: Box<Expr>, body: Box<Expr> },
    Address { expr: Box<Expr> },
    Dereference { expr: Box<Expr> },
    Reference { expr: Box<Expr> },
}

/// A scalar literal. Stored at full precision; `ScalarType` on the
/// containing `Expr::Constant` determines how it lowers to source text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ConstantValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    /// Stored as f64 regardless of declared width -- f32 has no `Eq`
    /// impl (NaN), so narrowing happens only at codegen time.
    Float(f64),
}

impl Expr {
    pub fn var(v: Arc<Var>) -> Self {
        Expr::Var(v)
    }

    pub fn int(value: i64, ty: ScalarType) -> Self {
        Expr::Constant { value: ConstantValue::Int(value), ty }
    }

    pub fn float(value: f64, ty: ScalarType) -> Self {
        Expr::Constant { value: ConstantValue::Float(value), ty }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_roundtrip_var() {
        let v = Var::new("x", Type::Scalar(ScalarType::Int32));
        let json = serde_json::to_string(&v).unwrap();
        let back: Var = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn promotes_operands_only_arithmetic() {
        assert!(BinaryOp::Add.promotes_operands());
        assert!(BinaryOp::Div.promotes_operands());
        assert!(!BinaryOp::Less.promotes_operands());
        assert!(!BinaryOp::And.promotes_operands());
    }

    #[test]
    fn serde_roundtrip_expr() {
        let e = Expr::Binary {
            op: BinaryOp::Add,
            a: Box::new(Expr::int(1, ScalarType::Int32)),
            b: Box::new(Expr::int(2, ScalarType::Int32)),
        };
        let json = serde_json::to_string(&e).unwrap();
        let back: Expr = serde_json::from_str(&json).unwrap();
        assert_eq!(serde_json::to_string(&back).unwrap(), json);
    }
}
