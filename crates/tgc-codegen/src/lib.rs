//! GPU codegen, build scheduling, shared-library loading, and execution
//! for lowered tensor-program tasks.
//!
//! # Modules
//!
//! - [`codegen`] -- textual CUDA source emission from an `IRModule`
//! - [`build`] -- parallel build scheduler invoking the external toolchain
//! - [`library`] -- loaded-shared-library refcounting (`LibraryTable`)
//! - [`exec`] -- entry-point binding and execution (`CompiledFunction`)
//! - [`error`] -- error types for all of the above

pub mod build;
pub mod codegen;
pub mod error;
pub mod exec;
pub mod library;

pub use build::{batch_build, BuildInstance};
pub use codegen::emit_module;
pub use error::{BuildError, ExecError, LoadError};
pub use exec::{execute, load_task_function, CompiledFunction, TensorBuffer};
pub use library::{LibraryTable, SharedLibraryHandle};
