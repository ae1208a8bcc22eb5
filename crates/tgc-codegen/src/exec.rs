//! Entry-point binding and execution.
//!
//! `TensorBuffer` is minimal owned host memory; device/GPU allocation is
//! out of scope (spec §1's "external collaborators" -- the runtime loader
//! that actually dispatches onto the GPU is named external, this module
//! only builds the binding metadata and makes the raw C-ABI call).

use std::path::Path;

use tgc_core::task::Task;
use tgc_core::types::ScalarType;

use crate::error::{ExecError, LoadError};
use crate::library::{LibraryTable, SharedLibraryHandle};

#[derive(Debug, Clone, PartialEq)]
pub struct TensorBuffer {
    pub dtype: ScalarType,
    pub shape: Vec<usize>,
    pub bytes: Vec<u8>,
}

impl TensorBuffer {
    pub fn zeroed(dtype: ScalarType, shape: Vec<usize>) -> Self {
        let elems: usize = shape.iter().product();
        let bytes = vec![0u8; elems * scalar_size(dtype)];
        TensorBuffer { dtype, shape, bytes }
    }
}

fn scalar_size(dtype: ScalarType) -> usize {
    match dtype {
        ScalarType::Bool | ScalarType::Int8 | ScalarType::UInt8 => 1,
        ScalarType::Int16 | ScalarType::UInt16 | ScalarType::Float16 | ScalarType::BFloat16 => 2,
        ScalarType::Int32 | ScalarType::UInt32 | ScalarType::Float32 => 4,
        ScalarType::Int64 | ScalarType::UInt64 | ScalarType::Float64 => 8,
    }
}

/// A compiled Task entry point bound to the shared library it was loaded
/// from. Owns the `SharedLibraryHandle` so the library cannot be
/// unloaded while a function referencing it is still alive.
pub struct CompiledFunction {
    _handle: SharedLibraryHandle,
    symbol: libloading::Symbol<'static, unsafe extern "C" fn(*mut *mut u8) -> i32>,
    task_name: String,
    num_inputs: usize,
    num_outputs: usize,
}

/// Resolves `tgc_<task.name>` in the library at `lib_path` and binds it
/// into a `CompiledFunction` carrying the parameter arity from `task`.
pub fn load_task_function(table: &std::sync::Arc<LibraryTable>, lib_path: &Path, task: &Task) -> Result<CompiledFunction, LoadError> {
    let handle = table.open(lib_path)?;
    let symbol_name = format!("tgc_{}", task.name);
    // SAFETY: the symbol's lifetime is tied to `handle.library()`, which
    // `CompiledFunction` keeps alive for as long as the symbol is held.
    let symbol: libloading::Symbol<'static, unsafe extern "C" fn(*mut *mut u8) -> i32> = unsafe {
        let raw: libloading::Symbol<unsafe extern "C" fn(*mut *mut u8) -> i32> = handle
            .library()
            .get(symbol_name.as_bytes())
            .map_err(|_| LoadError::SymbolNotFound { path: lib_path.to_path_buf(), symbol: symbol_name.clone() })?;
        std::mem::transmute(raw)
    };
    Ok(CompiledFunction {
        _handle: handle,
        symbol,
        task_name: task.name.clone(),
        num_inputs: task.inputs().len(),
        num_outputs: task.outputs().len(),
    })
}

/// Invokes `func` with `inputs` bound to the task's input parameter
/// slots, returning freshly allocated output buffers bound to the
/// remaining parameter slots, in `task.parameters` order.
pub fn execute(func: &CompiledFunction, inputs: &[TensorBuffer], output_shapes: &[(ScalarType, Vec<usize>)]) -> Result<Vec<TensorBuffer>, ExecError> {
    if inputs.len() != func.num_inputs {
        return Err(ExecError::WrongInputCount { task: func.task_name.clone(), expected: func.num_inputs, actual: inputs.len() });
    }
    if output_shapes.len() != func.num_outputs {
        return Err(ExecError::WrongOutputCount { task: func.task_name.clone(), expected: func.num_outputs, actual: output_shapes.len() });
    }

    let mut outputs: Vec<TensorBuffer> = output_shapes.iter().map(|(dtype, shape)| TensorBuffer::zeroed(*dtype, shape.clone())).collect();

    let mut arg_ptrs: Vec<*mut u8> = Vec::with_capacity(inputs.len() + outputs.len());
    for buf in inputs {
        arg_ptrs.push(buf.bytes.as_ptr() as *mut u8);
    }
    for buf in &mut outputs {
        arg_ptrs.push(buf.bytes.as_mut_ptr());
    }

    let status = unsafe { (func.symbol)(arg_ptrs.as_mut_ptr()) };
    if status != 0 {
        return Err(ExecError::EntryPointFailed { task: func.task_name.clone(), status });
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_buffer_has_correct_byte_length() {
        let buf = TensorBuffer::zeroed(ScalarType::Float32, vec![2, 3]);
        assert_eq!(buf.bytes.len(), 2 * 3 * 4);
    }

    #[test]
    fn scalar_size_matches_known_widths() {
        assert_eq!(scalar_size(ScalarType::Float64), 8);
        assert_eq!(scalar_size(ScalarType::Bool), 1);
        assert_eq!(scalar_size(ScalarType::Float16), 2);
    }
}
