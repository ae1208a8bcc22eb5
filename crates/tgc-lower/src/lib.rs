//! Lowers a `Task` (the tensor-level compute IR) to a CUDA-kernel
//! `IRModule` (the low-level imperative IR), then runs a fixed pipeline
//! of cleanup passes over that module before it reaches codegen.

pub mod add_explicit_cast;
pub mod const_fold;
pub mod error;
pub mod flatten;
pub mod registry;
pub mod simplify;

pub use add_explicit_cast::add_explicit_cast_pass;
pub use const_fold::const_fold_pass;
pub use error::LowerError;
pub use flatten::flatten_pass;
pub use registry::{ElementwiseSchedule, KernelSchedule, ReductionSchedule, ScheduleRegistry};
pub use simplify::simplify_pass;

use tgc_core::{IRModule, Task};
use tgc_passes::PassContext;

/// Lowers `task` to an `IRModule` via the registry's first matching
/// schedule, then runs the fixed cleanup pipeline: constant folding,
/// algebraic simplification, explicit-cast insertion, and statement-list
/// flattening, in that order -- folding and simplifying first so the
/// cast pass sees the smallest possible tree to annotate.
pub fn lower_task(task: &Task, registry: &ScheduleRegistry, ctx: &PassContext) -> Result<IRModule, LowerError> {
    let module = registry.implement_cuda(task, ctx)?;
    run_lowering_pipeline(&module)
}

pub fn run_lowering_pipeline(module: &IRModule) -> Result<IRModule, LowerError> {
    let module = const_fold_pass(module)?;
    let module = simplify_pass(&module)?;
    let module = add_explicit_cast_pass(&module)?;
    let module = flatten_pass(&module)?;
    Ok(module)
}
