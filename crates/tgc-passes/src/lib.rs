//! Graph-level optimization passes (§4): usage/injectivity analysis,
//! prologue/epilogue fusion, constant folding, pattern rewriting, variant
//! resolution, barrier elimination, and the fixed-order pipeline tying
//! them together.

pub mod context;
pub mod eliminate_barriers;
pub mod error;
pub mod fold_const;
pub mod fuse_epilogue;
pub mod fuse_prologue;
pub mod patterns;
pub mod pipeline;
pub mod resolve_variant;
pub mod rewrite;
pub mod usage;

pub use context::{MmaKind, ParallelK, PassContext, Precision, ReducePrecision};
pub use eliminate_barriers::eliminate_barriers_pass;
pub use error::PassError;
pub use fold_const::fold_const_pass;
pub use fuse_epilogue::fuse_epilogue_pass;
pub use fuse_prologue::fuse_prologue_pass;
pub use patterns::{graph_patterns_pass, subgraph_rewrite, Conv2dBiasPattern, GraphPattern};
pub use pipeline::{run_pipeline, run_pipeline_with_patterns};
pub use resolve_variant::resolve_variant_pass;
pub use rewrite::Rewrite;
pub use usage::{analyze_usage, is_barrier, is_injective};
