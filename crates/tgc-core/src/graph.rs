//! `FlowGraph`: the traced dataflow graph tying `Tensor`s to the
//! `Operator`s that produce them.
//!
//! `Tensor`/`Operator` form the primary, `Arc`-linked representation (a
//! producer backlink on `Tensor`, forward input/output links on
//! `Operator`) -- the shape a tracer naturally builds. `FlowGraph::trace`
//! additionally builds a `petgraph::StableGraph` over operator identity
//! purely to get a correct, validated topological order via
//! `petgraph::algo::toposort`; that graph is scratch state, not kept.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::stable_graph::StableGraph;
use petgraph::Directed;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::task::Task;
use crate::types::{AttrValue, ScalarType};

use crate::compute::DimExpr;

/// Where a tensor's data resides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
    Cpu,
    Cuda(u32),
}

/// Constant tensor payload, opaque at this layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorData {
    pub bytes: Vec<u8>,
}

/// A tensor value in the flow graph: a graph input, a constant, or the
/// output of an `Operator` at a given output position. Exactly one of
/// `producer`/`data` distinguishes the three (enforced by the
/// constructors below, not by a runtime check on arbitrary structs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tensor {
    pub dtype: ScalarType,
    pub shape: Vec<DimExpr>,
    pub device: Device,
    pub producer: Option<(Arc<Operator>, usize)>,
    pub data: Option<Arc<TensorData>>,
}

impl Tensor {
    pub fn graph_input(dtype: ScalarType, shape: Vec<DimExpr>, device: Device) -> Arc<Tensor> {
        Arc::new(Tensor { dtype, shape, device, producer: None, data: None })
    }

    pub fn constant(dtype: ScalarType, shape: Vec<DimExpr>, data: Vec<u8>) -> Arc<Tensor> {
        Arc::new(Tensor {
            dtype,
            shape,
            device: Device::Cpu,
            producer: None,
            data: Some(Arc::new(TensorData { bytes: data })),
        })
    }

    pub fn from_operator(op: &Arc<Operator>, index: usize) -> Arc<Tensor> {
        let out = &op.outputs[index];
        Arc::new(Tensor {
            dtype: out.dtype,
            shape: out.shape.clone(),
            device: out.device,
            producer: Some((op.clone(), index)),
            data: None,
        })
    }

    /// Builds an operator-output tensor directly from known metadata,
    /// for the case where `op.outputs` cannot yet be consulted (it is
    /// still being constructed) -- see graph-surgery passes that rebuild
    /// an `Operator` with new inputs but the same output shapes.
    pub fn operator_output(op: &Arc<Operator>, index: usize, dtype: ScalarType, shape: Vec<DimExpr>, device: Device) -> Arc<Tensor> {
        Arc::new(Tensor { dtype, shape, device, producer: Some((op.clone(), index)), data: None })
    }

    pub fn is_graph_input(&self) -> bool {
        self.producer.is_none() && self.data.is_none()
    }

    pub fn is_constant(&self) -> bool {
        self.data.is_some()
    }
}

/// A node in the flow graph: a named operation over `inputs`, producing
/// `outputs`, with an attached `Task` describing how to compute them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operator {
    pub name: String,
    pub inputs: Vec<Arc<Tensor>>,
    pub outputs: Vec<Arc<Tensor>>,
    pub attrs: HashMap<String, AttrValue>,
    pub task: Task,
    /// When set, fusion passes must not absorb this operator's task into
    /// a neighbor, nor absorb a neighbor into it.
    pub is_barrier: bool,
}

/// Identifies an `Operator` by pointer identity, used for the scratch
/// petgraph node mapping and the usage map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpKey(usize);

impl From<&Arc<Operator>> for OpKey {
    fn from(op: &Arc<Operator>) -> Self {
        OpKey(Arc::as_ptr(op) as usize)
    }
}

/// Identifies a `Tensor` by pointer identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorKey(usize);

impl From<&Arc<Tensor>> for TensorKey {
    fn from(t: &Arc<Tensor>) -> Self {
        TensorKey(Arc::as_ptr(t) as usize)
    }
}

/// One consumer of a tensor: either an operator's input slot, or the
/// graph's own output list (a "virtual" use with no operator).
#[derive(Debug, Clone)]
pub enum Use {
    OperatorInput { consumer: Arc<Operator>, input_index: usize },
    GraphOutput { index: usize },
}

pub type UsageMap = HashMap<TensorKey, Vec<Use>>;

/// A traced dataflow graph: the designated inputs/outputs and every
/// operator reachable backward from the outputs, in topological order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowGraph {
    pub inputs: Vec<Arc<Tensor>>,
    pub outputs: Vec<Arc<Tensor>>,
    pub nodes: Vec<Arc<Operator>>,
}

impl FlowGraph {
    /// Traces backward from `outputs`, collecting every reachable
    /// operator and topologically ordering them via a scratch
    /// `StableGraph` over operator identity.
    pub fn trace(inputs: Vec<Arc<Tensor>>, outputs: Vec<Arc<Tensor>>) -> Result<Self, CoreError> {
        let mut graph = FlowGraph { inputs, outputs, nodes: Vec::new() };
        graph.update_nodes()?;
        Ok(graph)
    }

    /// Recomputes `nodes` from the current `outputs`. Idempotent: calling
    /// this twice in a row with no intervening graph edit produces the
    /// same `nodes` list both times (§8 invariant 1).
    pub fn update_nodes(&mut self) -> Result<(), CoreError> {
        let mut pg: StableGraph<Arc<Operator>, (), Directed, u32> = StableGraph::new();
        let mut index_of: HashMap<OpKey, petgraph::graph::NodeIndex<u32>> = HashMap::new();

        let mut stack: Vec<Arc<Operator>> = Vec::new();
        let mut seen: std::collections::HashSet<OpKey> = std::collections::HashSet::new();
        for out in &self.outputs {
            if let Some((op, _)) = &out.producer {
                if seen.insert(OpKey::from(op)) {
                    stack.push(op.clone());
                }
            }
        }
        while let Some(op) = stack.pop() {
            index_of.entry(OpKey::from(&op)).or_insert_with(|| pg.add_node(op.clone()));
            for input in &op.inputs {
                if let Some((producer, _)) = &input.producer {
                    if seen.insert(OpKey::from(producer)) {
                        stack.push(producer.clone());
                    }
                }
            }
        }
        // Second pass: now that every node exists, add producer->consumer edges.
        let ops: Vec<Arc<Operator>> = pg.node_weights().cloned().collect();
        for op in &ops {
            let consumer_idx = index_of[&OpKey::from(op)];
            for input in &op.inputs {
                if let Some((producer, _)) = &input.producer {
                    let producer_idx = index_of[&OpKey::from(producer)];
                    pg.add_edge(producer_idx, consumer_idx, ());
                }
            }
        }

        let order = toposort(&pg, None).map_err(|cycle| CoreError::GraphInconsistency {
            reason: format!("cycle detected at operator graph node {:?}", cycle.node_id()),
        })?;

        self.nodes = order.into_iter().map(|idx| pg[idx].clone()).collect();
        Ok(())
    }

    /// Builds the usage map (§4.1): for every tensor reachable in this
    /// graph, every operator-input slot that reads it, plus a virtual
    /// `GraphOutput` use for tensors that are themselves graph outputs.
    pub fn usage(&self) -> UsageMap {
        let mut map: UsageMap = HashMap::new();
        for op in &self.nodes {
            for (i, input) in op.inputs.iter().enumerate() {
                map.entry(TensorKey::from(input)).or_default().push(Use::OperatorInput {
                    consumer: op.clone(),
                    input_index: i,
                });
            }
        }
        for (i, out) in self.outputs.iter().enumerate() {
            map.entry(TensorKey::from(out)).or_default().push(Use::GraphOutput { index: i });
        }
        map
    }
}
