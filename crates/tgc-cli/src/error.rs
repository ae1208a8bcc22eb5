//! CLI-level error type wrapping every library error this binary can hit.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to read graph file {path}: {source}")]
    ReadGraphFile { path: String, #[source] source: std::io::Error },

    #[error("failed to parse graph JSON in {path}: {source}")]
    ParseGraphJson { path: String, #[source] source: serde_json::Error },

    #[error("node {index} (op_type `{op_type}`) references unknown input `{name}`")]
    UnknownInput { index: usize, op_type: String, name: String },

    #[error("graph declares no output named `{name}`")]
    UnknownOutput { name: String },

    #[error("unsupported dtype `{0}` in graph document")]
    UnsupportedDtype(String),

    #[error("invalid value `{value}` for --{flag}")]
    InvalidOption { flag: &'static str, value: String },

    #[error(transparent)]
    Core(#[from] tgc_core::error::CoreError),

    #[error(transparent)]
    Pass(#[from] tgc_passes::PassError),

    #[error(transparent)]
    Cache(#[from] std::io::Error),
}
