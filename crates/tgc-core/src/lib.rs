pub mod compute;
pub mod doc;
pub mod error;
pub mod expr;
pub mod function;
pub mod graph;
pub mod id;
pub mod namer;
pub mod ops;
pub mod stmt;
pub mod task;
pub mod types;

// Re-export commonly used types
pub use compute::{DimExpr, GridCompute, NodeKey, ReduceCompute, ReduceKind, ScalarExpr, ScalarNode, TensorNode};
pub use doc::Doc;
pub use error::CoreError;
pub use expr::{BinaryOp, ConstantValue, Expr, UnaryOp, Var};
pub use function::{Function, FunctionKind, IRModule};
pub use graph::{Device, FlowGraph, OpKey, Operator, Tensor, TensorData, TensorKey, Use, UsageMap};
pub use id::{EdgeId, OperatorId, TaskId, TensorId};
pub use namer::Namer;
pub use stmt::{Stmt, UnrollHint};
pub use task::{Epilogue, InverseMap, Prologue, Task};
pub use types::{AttrValue, Layout, MemoryScope, ScalarType, Type};
