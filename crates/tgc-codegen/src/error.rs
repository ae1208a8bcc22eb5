//! Codegen/build/load/execution error types.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("lowering failed: {0}")]
    Lowering(#[from] tgc_lower::LowerError),

    #[error("toolchain invocation for `{task}` exited with status {status}; see {log_path}")]
    ToolchainFailed { task: String, status: i32, log_path: PathBuf },

    #[error("failed to launch toolchain for `{task}`: {source}")]
    ToolchainSpawnFailed { task: String, #[source] source: std::io::Error },

    #[error("I/O error writing build artifacts: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open shared library at {path}: {source}")]
    OpenFailed { path: PathBuf, #[source] source: libloading::Error },

    #[error("symbol `{symbol}` not found in {path}")]
    SymbolNotFound { path: PathBuf, symbol: String },
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("task `{task}` expected {expected} input buffers, got {actual}")]
    WrongInputCount { task: String, expected: usize, actual: usize },

    #[error("task `{task}` expected {expected} output buffers, got {actual}")]
    WrongOutputCount { task: String, expected: usize, actual: usize },

    #[error("entry point for task `{task}` returned non-zero status {status}")]
    EntryPointFailed { task: String, status: i32 },

    #[error(transparent)]
    Load(#[from] LoadError),
}
