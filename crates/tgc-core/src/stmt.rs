//! Low-level IR statements.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::expr::{Expr, Var};

/// Hint attached to a `For` loop requesting unrolling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnrollHint {
    Full,
    Factor(u32),
}

/// A low-level IR statement. Closed variant set, matched exhaustively by
/// every lowering pass and the codegen printer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    Assign { var: Arc<Var>, value: Expr },
    BufferStore { buf: Expr, indices: Vec<Expr>, value: Expr },
    Evaluate { expr: Expr },
    Seq(Vec<Stmt>),
    If { cond: Expr, then_branch: Box<Stmt>, else_branch: Option<Box<Stmt>> },
    For {
        var: Arc<Var>,
        extent: Expr,
        unroll: Option<UnrollHint>,
        body: Box<Stmt>,
    },
    Let { var: Arc<Var>, value: Expr, body: Box<Stmt> },
    Return { value: Option<Expr> },
    Assert { cond: Expr, message: String },
    Asm { template: String, holes: Vec<Expr> },
    /// An opaque, backend-specific statement template with substitution
    /// holes, used for constructs (warp shuffles, tensor-core intrinsics)
    /// that have no generic IR representation.
    BlackBox { template: String, holes: Vec<Expr> },
}

impl Stmt {
    pub fn seq(stmts: Vec<Stmt>) -> Stmt {
        Stmt::Seq(stmts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ConstantValue;
    use crate::types::{ScalarType, Type};

    #[test]
    fn serde_roundtrip_seq() {
        let v = Arc::new(Var::new("i", Type::Scalar(ScalarType::Int32)));
        let stmt = Stmt::seq(vec![
            Stmt::Assign {
                var: v.clone(),
                value: Expr::int(0, ScalarType::Int32),
            },
            Stmt::Return { value: None },
        ]);
        let json = serde_json::to_string(&stmt).unwrap();
        let back: Stmt = serde_json::from_str(&json).unwrap();
        assert_eq!(serde_json::to_string(&back).unwrap(), json);
    }

    #[test]
    fn for_loop_with_unroll_hint() {
        let v = Arc::new(Var::new("j", Type::Scalar(ScalarType::Int32)));
        let stmt = Stmt::For {
            var: v.clone(),
            extent: Expr::int(16, ScalarType::Int32),
            unroll: Some(UnrollHint::Factor(4)),
            body: Box::new(Stmt::Evaluate {
                expr: Expr::Constant { value: ConstantValue::Bool(true), ty: ScalarType::Bool },
            }),
        };
        let json = serde_json::to_string(&stmt).unwrap();
        let back: Stmt = serde_json::from_str(&json).unwrap();
        assert_eq!(serde_json::to_string(&back).unwrap(), json);
    }
}
