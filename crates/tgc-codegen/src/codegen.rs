//! Textual CUDA source emission.
//!
//! `emit_module` walks an `IRModule`'s functions and renders each as CUDA
//! C source text via the shared `Doc` pretty-printer (`tgc_core::doc`),
//! using a recursive attribute/extern-var/statement-visitor shape. Two
//! runs over structurally identical IR produce byte-identical text
//! because nothing here mints a fresh name from a process-wide counter
//! -- the build cache's fingerprint is only meaningful if that holds.

use std::fmt::Write as _;

use tgc_core::doc::Doc;
use tgc_core::expr::{BinaryOp, ConstantValue, Expr, UnaryOp, Var};
use tgc_core::function::{Function, FunctionKind, IRModule};
use tgc_core::stmt::{Stmt, UnrollHint};
use tgc_core::types::{ScalarType, Type};

fn c_scalar_type(ty: ScalarType) -> &'static str {
    match ty {
        ScalarType::Bool => "bool",
        ScalarType::Int8 => "int8_t",
        ScalarType::Int16 => "int16_t",
        ScalarType::Int32 => "int32_t",
        ScalarType::Int64 => "int64_t",
        ScalarType::UInt8 => "uint8_t",
        ScalarType::UInt16 => "uint16_t",
        ScalarType::UInt32 => "uint32_t",
        ScalarType::UInt64 => "uint64_t",
        ScalarType::Float16 => "half",
        ScalarType::BFloat16 => "nv_bfloat16",
        ScalarType::Float32 => "float",
        ScalarType::Float64 => "double",
    }
}

fn c_type(ty: &Type) -> String {
    match ty {
        Type::Scalar(s) => c_scalar_type(*s).to_string(),
        Type::Tensor { scalar, .. } | Type::TensorPointer { scalar, .. } => format!("{}*", c_scalar_type(*scalar)),
        Type::Pointer(inner) => format!("{}*", c_type(inner)),
        Type::Reference(inner) => format!("{}&", c_type(inner)),
        Type::Void => "void".to_string(),
    }
}

fn var_decl(var: &Var) -> Doc {
    Doc::text(format!("{} {}", c_type(&var.ty), var.name))
}

fn constant_literal(value: ConstantValue, ty: ScalarType) -> String {
    match value {
        ConstantValue::Bool(b) => if b { "true".into() } else { "false".into() },
        ConstantValue::Int(v) => v.to_string(),
        ConstantValue::UInt(v) => format!("{v}u"),
        ConstantValue::Float(v) => {
            if ty == ScalarType::Float32 {
                format!("{}f", v as f32)
            } else {
                v.to_string()
            }
        }
    }
}

fn unary_op_text(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Neg => "-",
        UnaryOp::Not => "!",
        UnaryOp::BitwiseNot => "~",
    }
}

fn binary_op_text(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Multiply => "*",
        BinaryOp::Div | BinaryOp::FloorDiv => "/",
        BinaryOp::Mod => "%",
        BinaryOp::And => "&&",
        BinaryOp::Or => "||",
        BinaryOp::Less => "<",
        BinaryOp::LessEqual => "<=",
        BinaryOp::Equal => "==",
        BinaryOp::BitwiseAnd => "&",
        BinaryOp::BitwiseOr => "|",
        BinaryOp::LeftShift => "<<",
        BinaryOp::RightShift => ">>",
    }
}

/// Whether `func` names a `CudaKernel` function declared in `module` --
/// such a call's first two arguments are the launch grid/block dims
/// rather than ordinary kernel parameters (see `emit_expr`'s `Call` arm).
fn is_kernel_launch(module: &IRModule, func: &str) -> bool {
    module.functions.iter().any(|f| f.name == func && f.kind == FunctionKind::CudaKernel)
}

fn emit_expr(module: &IRModule, expr: &Expr) -> Doc {
    match expr {
        Expr::Var(v) => Doc::text(v.name.clone()),
        Expr::Constant { value, ty } => Doc::text(constant_literal(*value, *ty)),
        Expr::Cast { expr, target } => {
            Doc::text(format!("(({})", c_scalar_type(*target))) + emit_expr(module, expr) + Doc::text(")")
        }
        Expr::Unary { op, expr } => Doc::text(format!("({}", unary_op_text(*op))) + emit_expr(module, expr) + Doc::text(")"),
        Expr::Binary { op, a, b } => {
            Doc::text("(") + emit_expr(module, a) + Doc::text(format!(" {} ", binary_op_text(*op))) + emit_expr(module, b) + Doc::text(")")
        }
        Expr::Call { func, args } if is_kernel_launch(module, func) => {
            let grid = args.first().map(|e| emit_expr(module, e)).unwrap_or_else(|| Doc::text("1"));
            let block = args.get(1).map(|e| emit_expr(module, e)).unwrap_or_else(|| Doc::text("1"));
            let kernel_args = Doc::join(args.iter().skip(2).map(|a| emit_expr(module, a)), ", ");
            Doc::text(format!("{func}<<<")) + grid + Doc::text(", ") + block + Doc::text(">>>(") + kernel_args + Doc::text(")")
        }
        Expr::Call { func, args } => {
            Doc::text(format!("{func}(")) + Doc::join(args.iter().map(|a| emit_expr(module, a)), ", ") + Doc::text(")")
        }
        Expr::TensorElement { base, indices } => {
            let mut doc = emit_expr(module, base);
            for idx in indices {
                doc += Doc::text("[") + emit_expr(module, idx) + Doc::text("]");
            }
            doc
        }
        Expr::TensorSlice { base, starts, .. } => {
            let mut doc = Doc::text("(") + emit_expr(module, base);
            for s in starts {
                doc += Doc::text(" + ") + emit_expr(module, s);
            }
            doc + Doc::text(")")
        }
        Expr::IfThenElse { cond, then_expr, else_expr } => {
            Doc::text("(") + emit_expr(module, cond) + Doc::text(" ? ") + emit_expr(module, then_expr) + Doc::text(" : ") + emit_expr(module, else_expr) + Doc::text(")")
        }
        Expr::Let { var, value, body } => {
            Doc::text(format!("({{ {} = ", var_decl(var))) + emit_expr(module, value) + Doc::text("; ") + emit_expr(module, body) + Doc::text("; })")
        }
        Expr::Address { expr } => Doc::text("(&") + emit_expr(module, expr) + Doc::text(")"),
        Expr::Dereference { expr } => Doc::text("(*") + emit_expr(module, expr) + Doc::text(")"),
        Expr::Reference { expr } => emit_expr(module, expr),
    }
}

fn emit_stmt(module: &IRModule, stmt: &Stmt, indent: u32) -> Doc {
    match stmt {
        Stmt::Assign { var, value } => Doc::text(format!("{} = ", var.name)) + emit_expr(module, value) + Doc::text(";"),
        Stmt::BufferStore { buf, indices, value } => {
            let mut lhs = emit_expr(module, buf);
            for idx in indices {
                lhs += Doc::text("[") + emit_expr(module, idx) + Doc::text("]");
            }
            lhs + Doc::text(" = ") + emit_expr(module, value) + Doc::text(";")
        }
        Stmt::Evaluate { expr } => emit_expr(module, expr) + Doc::text(";"),
        Stmt::Seq(stmts) => {
            let mut doc = Doc::new();
            for (i, s) in stmts.iter().enumerate() {
                if i > 0 {
                    doc += Doc::newline().indent(indent);
                }
                doc += emit_stmt(module, s, indent);
            }
            doc
        }
        Stmt::If { cond, then_branch, else_branch } => {
            let mut doc = Doc::text("if (") + emit_expr(module, cond) + Doc::text(") {") + Doc::newline().indent(indent + 1);
            doc += emit_stmt(module, then_branch, indent + 1);
            doc += Doc::newline().indent(indent) + Doc::text("}");
            if let Some(else_branch) = else_branch {
                doc += Doc::text(" else {") + Doc::newline().indent(indent + 1);
                doc += emit_stmt(module, else_branch, indent + 1);
                doc += Doc::newline().indent(indent) + Doc::text("}");
            }
            doc
        }
        Stmt::For { var, extent, unroll, body } => {
            let mut doc = Doc::new();
            if let Some(hint) = unroll {
                let pragma = match hint {
                    UnrollHint::Full => "#pragma unroll".to_string(),
                    UnrollHint::Factor(n) => format!("#pragma unroll {n}"),
                };
                doc += Doc::text(pragma) + Doc::newline().indent(indent);
            }
            doc += Doc::text(format!("for (int32_t {0} = 0; {0} < ", var.name)) + emit_expr(module, extent) + Doc::text(format!("; {}++) {{", var.name));
            doc += Doc::newline().indent(indent + 1);
            doc += emit_stmt(module, body, indent + 1);
            doc += Doc::newline().indent(indent) + Doc::text("}");
            doc
        }
        Stmt::Let { var, value, body } => {
            let mut doc = Doc::text(format!("{} = ", var_decl(var))) + emit_expr(module, value) + Doc::text(";") + Doc::newline().indent(indent);
            doc += emit_stmt(module, body, indent);
            doc
        }
        Stmt::Return { value } => match value {
            Some(e) => Doc::text("return ") + emit_expr(module, e) + Doc::text(";"),
            None => Doc::text("return;"),
        },
        Stmt::Assert { cond, message } => {
            Doc::text("assert(") + emit_expr(module, cond) + Doc::text(format!(" && \"{}\");", message.replace('"', "\\\"")))
        }
        Stmt::Asm { template, holes } | Stmt::BlackBox { template, holes } => {
            let mut rendered = template.clone();
            for (i, hole) in holes.iter().enumerate() {
                rendered = rendered.replacen(&format!("{{{i}}}"), &emit_expr(module, hole).to_string(), 1);
            }
            Doc::text(rendered)
        }
    }
}

fn launch_bounds_comment(function: &Function) -> Option<String> {
    let block_dim = function.attr_int("cuda_block_dim")?;
    Some(match function.attr_int("cuda_min_blocks") {
        Some(mb) => format!("__launch_bounds__({block_dim}, {mb})"),
        None => format!("__launch_bounds__({block_dim})"),
    })
}

fn emit_function(module: &IRModule, function: &Function) -> Doc {
    let mut doc = Doc::new();
    match function.kind {
        FunctionKind::CudaKernel => {
            doc += Doc::text("extern \"C\" __global__ ");
            if let Some(bounds) = launch_bounds_comment(function) {
                doc += Doc::text(format!("{bounds} "));
            }
        }
        FunctionKind::CudaDevice => doc += Doc::text("__device__ "),
        FunctionKind::Host => doc += Doc::text("extern \"C\" "),
    }
    let params = Doc::join(function.params.iter().map(var_decl), ", ");
    doc += Doc::text(format!("{} {}(", c_type(&function.ret_type), function.name)) + params + Doc::text(") {");
    doc += Doc::newline().indent(1);

    if matches!(function.kind, FunctionKind::CudaKernel | FunctionKind::CudaDevice) {
        doc += Doc::text("// available as builtins: blockIdx.{x,y,z}, threadIdx.{x,y,z}") + Doc::newline().indent(1);
    }

    for local in &function.local_vars {
        doc += var_decl(local) + Doc::text(";") + Doc::newline().indent(1);
    }

    doc += emit_stmt(module, &function.body, 1);
    doc += Doc::newline() + Doc::text("}");
    doc
}

/// Renders `module` as a complete CUDA translation unit: standard
/// includes, then one function per `module.functions` entry in order.
pub fn emit_module(module: &IRModule) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "#include <cstdint>");
    let _ = writeln!(out, "#include <cassert>");
    let _ = writeln!(out, "#include <cuda_fp16.h>");
    let _ = writeln!(out, "#include <cuda_bf16.h>");
    out.push('\n');

    for (i, function) in module.functions.iter().enumerate() {
        if i > 0 {
            out.push_str("\n\n");
        }
        out.push_str(&emit_function(module, function).to_string());
    }
    out.push('\n');
    out
}
