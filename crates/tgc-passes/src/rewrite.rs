//! Shared graph-surgery helper: replacing one `Operator` inside a
//! `FlowGraph` with a new one and propagating the change to every
//! downstream tensor/operator that (transitively) reads it, while
//! leaving every untouched subgraph shared by `Arc` clone rather than
//! rebuilt.

use std::collections::HashMap;
use std::sync::Arc;

use tgc_core::graph::{Device, OpKey, Operator, Tensor, TensorKey};
use tgc_core::{DimExpr, FlowGraph, ScalarType};

use crate::error::PassError;

pub struct Rewrite<'a> {
    old_op: &'a Arc<Operator>,
    new_op: &'a Arc<Operator>,
    tensor_memo: HashMap<TensorKey, Arc<Tensor>>,
    op_memo: HashMap<OpKey, Arc<Operator>>,
}

impl<'a> Rewrite<'a> {
    pub fn new(old_op: &'a Arc<Operator>, new_op: &'a Arc<Operator>) -> Self {
        Rewrite { old_op, new_op, tensor_memo: HashMap::new(), op_memo: HashMap::new() }
    }

    fn rebuild_operator(&mut self, op: &Arc<Operator>) -> Arc<Operator> {
        if OpKey::from(op) == OpKey::from(self.old_op) {
            return self.new_op.clone();
        }
        if let Some(cached) = self.op_memo.get(&OpKey::from(op)) {
            return cached.clone();
        }
        let new_inputs: Vec<Arc<Tensor>> = op.inputs.iter().map(|t| self.rebuild_tensor(t)).collect();
        let changed = new_inputs.iter().zip(op.inputs.iter()).any(|(a, b)| !Arc::ptr_eq(a, b));
        let result = if !changed {
            op.clone()
        } else {
            let output_meta: Vec<(ScalarType, Vec<DimExpr>, Device)> =
                op.outputs.iter().map(|t| (t.dtype, t.shape.clone(), t.device)).collect();
            let mut rebuilt = Arc::new(Operator {
                name: op.name.clone(),
                inputs: new_inputs,
                outputs: Vec::new(),
                attrs: op.attrs.clone(),
                task: op.task.clone(),
                is_barrier: op.is_barrier,
            });
            let outs: Vec<Arc<Tensor>> = output_meta
                .into_iter()
                .enumerate()
                .map(|(i, (dtype, shape, device))| Tensor::operator_output(&rebuilt, i, dtype, shape, device))
                .collect();
            Arc::get_mut(&mut rebuilt).unwrap().outputs = outs;
            rebuilt
        };
        self.op_memo.insert(OpKey::from(op), result.clone());
        result
    }

    fn rebuild_tensor(&mut self, tensor: &Arc<Tensor>) -> Arc<Tensor> {
        if let Some(cached) = self.tensor_memo.get(&TensorKey::from(tensor)) {
            return cached.clone();
        }
        let result = match &tensor.producer {
            None => tensor.clone(),
            Some((producer, index)) => {
                let rebuilt_producer = self.rebuild_operator(producer);
                if Arc::ptr_eq(&rebuilt_producer, producer) {
                    tensor.clone()
                } else {
                    rebuilt_producer.outputs[*index].clone()
                }
            }
        };
        self.tensor_memo.insert(TensorKey::from(tensor), result.clone());
        result
    }

    /// Applies the substitution to every graph output and re-traces.
    pub fn apply(mut self, graph: &FlowGraph) -> Result<FlowGraph, PassError> {
        let new_outputs: Vec<Arc<Tensor>> = graph.outputs.iter().map(|t| self.rebuild_tensor(t)).collect();
        let mut new_graph = FlowGraph { inputs: graph.inputs.clone(), outputs: new_outputs, nodes: Vec::new() };
        new_graph.update_nodes()?;
        Ok(new_graph)
    }
}
