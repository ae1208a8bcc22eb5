//! Flattens nested `Stmt::Seq` lists produced by schedules that build up
//! a body through repeated `Seq(vec![... , Seq(vec![...])])` nesting, so
//! later passes and codegen see one flat statement list per block.

use tgc_core::{Function, IRModule, Stmt};

use crate::error::LowerError;

fn flatten_into(stmt: Stmt, out: &mut Vec<Stmt>) {
    match stmt {
        Stmt::Seq(stmts) => {
            for s in stmts {
                flatten_into(flatten_stmt(s), out);
            }
        }
        other => out.push(other),
    }
}

fn flatten_stmt(stmt: Stmt) -> Stmt {
    match stmt {
        Stmt::Seq(stmts) => {
            let mut out = Vec::new();
            for s in stmts {
                flatten_into(flatten_stmt(s), &mut out);
            }
            Stmt::Seq(out)
        }
        Stmt::If { cond, then_branch, else_branch } => Stmt::If {
            cond,
            then_branch: Box::new(flatten_stmt(*then_branch)),
            else_branch: else_branch.map(|b| Box::new(flatten_stmt(*b))),
        },
        Stmt::For { var, extent, unroll, body } => Stmt::For { var, extent, unroll, body: Box::new(flatten_stmt(*body)) },
        Stmt::Let { var, value, body } => Stmt::Let { var, value, body: Box::new(flatten_stmt(*body)) },
        other => other,
    }
}

fn flatten_function(function: &Function) -> Function {
    let mut out = function.clone();
    out.body = flatten_stmt(function.body.clone());
    out
}

pub fn flatten_pass(module: &IRModule) -> Result<IRModule, LowerError> {
    let mut out = module.clone();
    out.functions = module.functions.iter().map(flatten_function).collect();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgc_core::function::FunctionKind;
    use tgc_core::task::Task;
    use tgc_core::types::{ScalarType, Type};
    use tgc_core::Expr;

    fn module_of(body: Stmt) -> IRModule {
        let mut m = IRModule::new(Task::new("t", Vec::new(), 0));
        let mut f = Function::new("k", FunctionKind::CudaKernel, Type::Void);
        f.body = body;
        m.functions.push(f);
        m
    }

    #[test]
    fn flattens_nested_seq() {
        let inner = Stmt::Seq(vec![
            Stmt::Evaluate { expr: Expr::int(1, ScalarType::Int32) },
            Stmt::Seq(vec![Stmt::Evaluate { expr: Expr::int(2, ScalarType::Int32) }]),
        ]);
        let body = Stmt::Seq(vec![inner, Stmt::Evaluate { expr: Expr::int(3, ScalarType::Int32) }]);
        let out = flatten_pass(&module_of(body)).unwrap();
        let Stmt::Seq(stmts) = &out.functions[0].body else { panic!("expected seq") };
        assert_eq!(stmts.len(), 3);
        for s in stmts {
            assert!(matches!(s, Stmt::Evaluate { .. }));
        }
    }

    #[test]
    fn flattens_seq_nested_inside_for_body() {
        let var = std::sync::Arc::new(tgc_core::Var::new("i", Type::Scalar(ScalarType::Int32)));
        let body = Stmt::For {
            var,
            extent: Expr::int(4, ScalarType::Int32),
            unroll: None,
            body: Box::new(Stmt::Seq(vec![Stmt::Seq(vec![Stmt::Evaluate { expr: Expr::int(1, ScalarType::Int32) }])])),
        };
        let out = flatten_pass(&module_of(body)).unwrap();
        let Stmt::For { body, .. } = &out.functions[0].body else { panic!("expected for") };
        let Stmt::Seq(stmts) = body.as_ref() else { panic!("expected seq") };
        assert_eq!(stmts.len(), 1);
    }
}
