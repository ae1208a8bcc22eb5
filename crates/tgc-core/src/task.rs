//! `Task`: the unit of scheduling and lowering, plus its fusion carriers
//! `Prologue`/`Epilogue` and the `InverseMap` that lets an epilogue
//! recover the producing index from an output index.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::compute::{NodeKey, TensorNode};
use crate::error::CoreError;
use crate::expr::Var;

/// Maps an output index tuple back to the index tuple that produced it in
/// the upstream operator -- needed so an epilogue can read extra inputs
/// at the right coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InverseMap {
    pub index_vars: Vec<Arc<Var>>,
    pub input_from_output: Vec<Arc<crate::compute::ScalarExpr>>,
}

impl InverseMap {
    pub fn identity(axes: &[Arc<Var>]) -> Self {
        InverseMap {
            index_vars: axes.to_vec(),
            input_from_output: axes
                .iter()
                .map(|v| Arc::new(crate::compute::ScalarExpr::Var(v.clone())))
                .collect(),
        }
    }
}

/// A fused elementwise producer feeding one of this Task's parameters,
/// attached during prologue fusion (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prologue {
    pub extra_inputs: Vec<Arc<TensorNode>>,
    pub indices: Vec<Arc<Var>>,
    pub value: Arc<crate::compute::ScalarExpr>,
}

/// A fused elementwise consumer of one of this Task's parameters, attached
/// during epilogue fusion (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epilogue {
    pub extra_inputs: Vec<Arc<TensorNode>>,
    pub indices: Vec<Arc<Var>>,
    pub orig_value: Arc<Var>,
    pub value: Arc<crate::compute::ScalarExpr>,
    pub out_indices: Vec<Arc<crate::compute::ScalarExpr>>,
    pub out_tensor: Arc<TensorNode>,
}

/// The unit of scheduling and lowering: named parameters (inputs followed
/// by outputs), an inverse map for epilogue index recovery, and the
/// prologues/epilogues fused onto individual parameters.
///
/// `prologues`/`epilogues` are keyed by [`NodeKey`] (pointer identity of
/// the carried `TensorNode`) and stored in an [`IndexMap`] so iteration
/// order is deterministic -- required for idempotent, repeatable lowering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub parameters: Vec<Arc<TensorNode>>,
    pub num_inputs: usize,
    pub inverse_map: IndexMap<NodeKey, InverseMap>,
    pub prologues: IndexMap<NodeKey, Prologue>,
    pub epilogues: IndexMap<NodeKey, Epilogue>,
}

impl Task {
    pub fn new(name: impl Into<String>, parameters: Vec<Arc<TensorNode>>, num_inputs: usize) -> Self {
        Task {
            name: name.into(),
            parameters,
            num_inputs,
            inverse_map: IndexMap::new(),
            prologues: IndexMap::new(),
            epilogues: IndexMap::new(),
        }
    }

    pub fn inputs(&self) -> &[Arc<TensorNode>] {
        &self.parameters[..self.num_inputs]
    }

    pub fn outputs(&self) -> &[Arc<TensorNode>] {
        &self.parameters[self.num_inputs..]
    }

    /// Checks the invariants from §3/§4.5: every prologue/epilogue carrier
    /// key names a real parameter, and no parameter carries both.
    pub fn validate(&self) -> Result<(), CoreError> {
        let param_keys: std::collections::HashSet<NodeKey> =
            self.parameters.iter().map(NodeKey::from).collect();

        for key in self.prologues.keys() {
            if !param_keys.contains(key) {
                return Err(CoreError::DanglingCarrier {
                    task: self.name.clone(),
                    site: "prologues",
                });
            }
        }
        for key in self.epilogues.keys() {
            if !param_keys.contains(key) {
                return Err(CoreError::DanglingCarrier {
                    task: self.name.clone(),
                    site: "epilogues",
                });
            }
        }
        for (index, param) in self.parameters.iter().enumerate() {
            let key = NodeKey::from(param);
            if self.prologues.contains_key(&key) && self.epilogues.contains_key(&key) {
                return Err(CoreError::ConflictingCarriers { task: self.name.clone(), index });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::DimExpr;
    use crate::types::ScalarType;

    fn input(name: &str) -> Arc<TensorNode> {
        Arc::new(TensorNode::Input {
            name: name.into(),
            shape: vec![DimExpr::Const(4)],
            dtype: ScalarType::Float32,
        })
    }

    #[test]
    fn inputs_and_outputs_split_by_num_inputs() {
        let a = input("a");
        let b = input("b");
        let out = input("out");
        let task = Task::new("add", vec![a.clone(), b.clone(), out.clone()], 2);
        assert_eq!(task.inputs().len(), 2);
        assert_eq!(task.outputs().len(), 1);
    }

    #[test]
    fn validate_rejects_dangling_prologue() {
        let a = input("a");
        let out = input("out");
        let mut task = Task::new("t", vec![a.clone(), out.clone()], 1);
        let stray = input("stray");
        task.prologues.insert(
            NodeKey::from(&stray),
            Prologue { extra_inputs: vec![], indices: vec![], value: Arc::new(crate::compute::ScalarExpr::Const(crate::expr::ConstantValue::Int(0), ScalarType::Int32)) },
        );
        assert!(matches!(task.validate(), Err(CoreError::DanglingCarrier { .. })));
    }

    #[test]
    fn validate_rejects_conflicting_carriers() {
        let a = input("a");
        let out = input("out");
        let mut task = Task::new("t", vec![a.clone(), out.clone()], 1);
        let key = NodeKey::from(&a);
        let zero = || Arc::new(crate::compute::ScalarExpr::Const(crate::expr::ConstantValue::Int(0), ScalarType::Int32));
        task.prologues.insert(key, Prologue { extra_inputs: vec![], indices: vec![], value: zero() });
        task.epilogues.insert(
            key,
            Epilogue {
                extra_inputs: vec![],
                indices: vec![],
                orig_value: Arc::new(crate::expr::Var::new("v", crate::types::Type::Scalar(ScalarType::Float32))),
                value: zero(),
                out_indices: vec![],
                out_tensor: out.clone(),
            },
        );
        assert!(matches!(task.validate(), Err(CoreError::ConflictingCarriers { .. })));
    }
}
