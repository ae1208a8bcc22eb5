//! Low-level IR functions and modules.
//!
//! A `Function` is the unit the codegen printer emits as one GPU source
//! function; an `IRModule` bundles the functions produced by lowering a
//! single `Task` plus the Task it was lowered from (kept for diagnostics
//! and re-lowering).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::expr::Var;
use crate::stmt::Stmt;
use crate::task::Task;
use crate::types::{AttrValue, Type};

/// What kind of function this is, and therefore which calling convention
/// and launch syntax the codegen printer uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionKind {
    /// Ordinary host-callable entry point (`extern "C"` linkage).
    Host,
    /// A `__global__` GPU kernel, callable only via a launch expression.
    CudaKernel,
    /// A `__device__` helper, callable only from kernel/device code.
    CudaDevice,
}

/// A single lowered function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub kind: FunctionKind,
    pub params: Vec<Var>,
    pub body: Stmt,
    pub ret_type: Type,
    pub local_vars: Vec<Var>,
    pub extern_vars: Vec<Var>,
    pub attrs: HashMap<String, AttrValue>,
}

impl Function {
    pub fn new(name: impl Into<String>, kind: FunctionKind, ret_type: Type) -> Self {
        Function {
            name: name.into(),
            kind,
            params: Vec::new(),
            body: Stmt::Seq(Vec::new()),
            ret_type,
            local_vars: Vec::new(),
            extern_vars: Vec::new(),
            attrs: HashMap::new(),
        }
    }

    pub fn attr_int(&self, key: &str) -> Option<i64> {
        match self.attrs.get(key) {
            Some(AttrValue::Int(v)) => Some(*v),
            _ => None,
        }
    }
}

/// The output of lowering one Task: the functions it produced (typically
/// one `CudaKernel` entry plus any `CudaDevice` helpers it calls) and the
/// Task they were lowered from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IRModule {
    pub task: Task,
    pub functions: Vec<Function>,
}

impl IRModule {
    pub fn new(task: Task) -> Self {
        IRModule { task, functions: Vec::new() }
    }

    /// The function lowering is expected to designate as the callable
    /// entry point, by convention named `tgc_<task.name>`.
    pub fn entry_name(&self) -> String {
        format!("tgc_{}", self.task.name)
    }

    pub fn entry_function(&self) -> Option<&Function> {
        let entry = self.entry_name();
        self.functions.iter().find(|f| f.name == entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    #[test]
    fn entry_name_follows_task_name() {
        let task = Task::new("add", Vec::new(), 0);
        let module = IRModule::new(task);
        assert_eq!(module.entry_name(), "tgc_add");
    }

    #[test]
    fn attr_int_reads_matching_variant() {
        let mut f = Function::new("k", FunctionKind::CudaKernel, Type::Void);
        f.attrs.insert("cuda_block_dim".into(), AttrValue::Int(256));
        assert_eq!(f.attr_int("cuda_block_dim"), Some(256));
        assert_eq!(f.attr_int("missing"), None);
        f.attrs.insert("cuda_block_dim".into(), AttrValue::Str("x".into()));
        assert_eq!(f.attr_int("cuda_block_dim"), None);
    }
}
