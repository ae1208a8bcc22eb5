//! Graph-exchange-format node schema (§6): a neutral JSON document
//! describing declared inputs, an ordered list of `op_type` nodes, and a
//! list of output names. This module consumes that schema only -- it is
//! not a general-purpose importer (no opset versioning, no vendor file
//! formats) -- that belongs to the graph-exchange-format reader itself,
//! treated as an external collaborator.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use tgc_core::compute::DimExpr;
use tgc_core::graph::{Device, FlowGraph, Tensor};
use tgc_core::ops::build_operator;
use tgc_core::types::{AttrValue, ScalarType};

use crate::error::CliError;

#[derive(Debug, Deserialize)]
pub struct GraphDoc {
    pub inputs: Vec<InputSpec>,
    pub nodes: Vec<NodeSpec>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct InputSpec {
    pub name: String,
    pub dtype: String,
    pub shape: Vec<DimSpec>,
    #[serde(default)]
    pub device: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum DimSpec {
    Const(u64),
    Sym(String),
}

impl From<&DimSpec> for DimExpr {
    fn from(spec: &DimSpec) -> Self {
        match spec {
            DimSpec::Const(n) => DimExpr::Const(*n),
            DimSpec::Sym(s) => DimExpr::Sym(s.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NodeSpec {
    pub op_type: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    #[serde(default)]
    pub attrs: HashMap<String, AttrValue>,
}

fn parse_dtype(s: &str) -> Result<ScalarType, CliError> {
    Ok(match s {
        "bool" => ScalarType::Bool,
        "i8" => ScalarType::Int8,
        "i16" => ScalarType::Int16,
        "i32" => ScalarType::Int32,
        "i64" => ScalarType::Int64,
        "u8" => ScalarType::UInt8,
        "u16" => ScalarType::UInt16,
        "u32" => ScalarType::UInt32,
        "u64" => ScalarType::UInt64,
        "f16" => ScalarType::Float16,
        "bf16" => ScalarType::BFloat16,
        "f32" => ScalarType::Float32,
        "f64" => ScalarType::Float64,
        other => return Err(CliError::UnsupportedDtype(other.to_string())),
    })
}

fn parse_device(s: Option<&str>) -> Device {
    match s {
        Some(d) if d.starts_with("cuda") => {
            let index = d.strip_prefix("cuda:").and_then(|n| n.parse().ok()).unwrap_or(0);
            Device::Cuda(index)
        }
        _ => Device::Cpu,
    }
}

/// Reads and parses a graph document from `path`.
pub fn load_graph_doc(path: &Path) -> Result<GraphDoc, CliError> {
    let text = fs::read_to_string(path).map_err(|source| CliError::ReadGraphFile { path: path.display().to_string(), source })?;
    serde_json::from_str(&text).map_err(|source| CliError::ParseGraphJson { path: path.display().to_string(), source })
}

/// Builds a traced `FlowGraph` from a parsed document: materializes each
/// declared input as a graph-input `Tensor`, dispatches each node to
/// `tgc_core::ops::build_operator` in document order (threading a
/// name -> Tensor symbol table forward, so a node may only reference
/// names already bound by an earlier input or node), then traces from
/// the named outputs.
pub fn build_flow_graph(doc: &GraphDoc) -> Result<FlowGraph, CliError> {
    let mut symbols: HashMap<String, Arc<Tensor>> = HashMap::new();
    let mut graph_inputs = Vec::with_capacity(doc.inputs.len());

    for input in &doc.inputs {
        let dtype = parse_dtype(&input.dtype)?;
        let shape = input.shape.iter().map(DimExpr::from).collect();
        let device = parse_device(input.device.as_deref());
        let tensor = Tensor::graph_input(dtype, shape, device);
        symbols.insert(input.name.clone(), tensor.clone());
        graph_inputs.push(tensor);
    }

    for (index, node) in doc.nodes.iter().enumerate() {
        let mut resolved = Vec::with_capacity(node.inputs.len());
        for name in &node.inputs {
            let tensor = symbols.get(name).cloned().ok_or_else(|| CliError::UnknownInput {
                index,
                op_type: node.op_type.clone(),
                name: name.clone(),
            })?;
            resolved.push(tensor);
        }

        let op = build_operator(&node.op_type, resolved, &node.attrs)?;
        for (name, tensor) in node.outputs.iter().zip(op.outputs.iter()) {
            symbols.insert(name.clone(), tensor.clone());
        }
    }

    let mut outputs = Vec::with_capacity(doc.outputs.len());
    for name in &doc.outputs {
        let tensor = symbols.get(name).cloned().ok_or_else(|| CliError::UnknownOutput { name: name.clone() })?;
        outputs.push(tensor);
    }

    Ok(FlowGraph::trace(graph_inputs, outputs)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_flow_graph_from_single_relu_node() {
        let doc: GraphDoc = serde_json::from_str(
            r#"{
                "inputs": [{"name": "x", "dtype": "f32", "shape": [4, 4]}],
                "nodes": [{"op_type": "Relu", "inputs": ["x"], "outputs": ["y"], "attrs": {}}],
                "outputs": ["y"]
            }"#,
        )
        .unwrap();

        let graph = build_flow_graph(&doc).unwrap();
        assert_eq!(graph.inputs.len(), 1);
        assert_eq!(graph.outputs.len(), 1);
        assert_eq!(graph.nodes.len(), 1);
    }

    #[test]
    fn unknown_input_reference_is_an_error() {
        let doc: GraphDoc = serde_json::from_str(
            r#"{
                "inputs": [{"name": "x", "dtype": "f32", "shape": [4]}],
                "nodes": [{"op_type": "Relu", "inputs": ["missing"], "outputs": ["y"], "attrs": {}}],
                "outputs": ["y"]
            }"#,
        )
        .unwrap();

        assert!(matches!(build_flow_graph(&doc), Err(CliError::UnknownInput { .. })));
    }

    #[test]
    fn unknown_output_reference_is_an_error() {
        let doc: GraphDoc = serde_json::from_str(
            r#"{
                "inputs": [{"name": "x", "dtype": "f32", "shape": [4]}],
                "nodes": [{"op_type": "Relu", "inputs": ["x"], "outputs": ["y"], "attrs": {}}],
                "outputs": ["z"]
            }"#,
        )
        .unwrap();

        assert!(matches!(build_flow_graph(&doc), Err(CliError::UnknownOutput { .. })));
    }
}
